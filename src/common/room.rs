use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::models::UserId;

/// Collection under which call documents live in the presence store.
pub const CALL_COLLECTION: &str = "video_calls";

/// Identifier of the two-party call room. Both sides derive it independently,
/// so it must not depend on who initiates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Joins both ids in ascending order of their decimal text, so `10` sorts
    /// before `9`. Web clients derive the same key this way.
    pub fn between(a: UserId, b: UserId) -> Self {
        let (a, b) = (a.to_string(), b.to_string());
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        RoomId(format!("{}_{}", low, high))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key (and pub/sub channel) of the room document.
    pub fn document_key(&self) -> String {
        format!("{}:{}", CALL_COLLECTION, self.0)
    }

    pub fn participants(&self) -> Option<(UserId, UserId)> {
        let (a, b) = self.0.split_once('_')?;
        Some((a.parse().ok()?, b.parse().ok()?))
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
