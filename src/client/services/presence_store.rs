//! Call signaling documents, one per room.
//!
//! A room document exists while a call offer is published. Observers get a
//! snapshot of the current document as soon as they start watching and another
//! one on every change. Each store handle has its own origin id so that a
//! writer can recognise the echo of its own write (`from_local_write`).
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::common::{ClientError, ClientResult, RoomId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallOffer {
    pub id: Uuid,
    pub caller_id: UserId,
    pub sdp: String,
    pub created_at: DateTime<Utc>,
}

impl CallOffer {
    pub fn new(caller_id: UserId, sdp: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            caller_id,
            sdp: sdp.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    /// `None` when the room document does not exist.
    pub offer: Option<CallOffer>,
    /// The change was made through this same store handle.
    pub from_local_write: bool,
}

/// Stream of snapshots for one room. Dropping it cancels the subscription.
pub struct PresenceWatch {
    rx: mpsc::UnboundedReceiver<RoomSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl PresenceWatch {
    pub fn new(rx: mpsc::UnboundedReceiver<RoomSnapshot>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    pub async fn next(&mut self) -> Option<RoomSnapshot> {
        self.rx.recv().await
    }
}

impl Drop for PresenceWatch {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn watch(&self, room: &RoomId) -> ClientResult<PresenceWatch>;

    /// Creates or replaces the room document with `offer`.
    async fn put_offer(&self, room: &RoomId, offer: &CallOffer) -> ClientResult<()>;

    /// Removes the room document; observers see a snapshot without offer.
    async fn delete(&self, room: &RoomId) -> ClientResult<()>;
}

/// What is stored under the room key and published on every change.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoomDocument {
    origin: Uuid,
    offer: Option<CallOffer>,
}

impl RoomDocument {
    fn into_snapshot(self, local_origin: Uuid) -> RoomSnapshot {
        RoomSnapshot {
            from_local_write: self.origin == local_origin,
            offer: self.offer,
        }
    }
}

/// Presence store backed by Redis: `SET`/`DEL` on the room key plus a `PUBLISH`
/// on a channel of the same name so that watchers learn about changes.
pub struct RedisPresenceStore {
    client: redis::Client,
    redis_manager: Arc<Mutex<ConnectionManager>>,
    origin: Uuid,
}

impl RedisPresenceStore {
    pub async fn new(redis_url: &str) -> ClientResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let redis_manager = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            redis_manager: Arc::new(Mutex::new(redis_manager)),
            origin: Uuid::new_v4(),
        })
    }

    async fn publish(&self, key: &str, doc: &RoomDocument) -> ClientResult<()> {
        let json = serde_json::to_string(doc)?;
        let mut conn = self.redis_manager.lock().await;
        let _: () = redis::cmd("PUBLISH").arg(key).arg(&json).query_async(&mut *conn).await?;
        Ok(())
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn watch(&self, room: &RoomId) -> ClientResult<PresenceWatch> {
        let key = room.document_key();

        // Subscribe before reading so no change can slip between the two.
        let mut pubsub = self.client.get_async_connection().await?.into_pubsub();
        pubsub.subscribe(&key).await?;

        let current: Option<String> = {
            let mut conn = self.redis_manager.lock().await;
            redis::cmd("GET").arg(&key).query_async(&mut *conn).await?
        };
        let initial = match current {
            Some(json) => serde_json::from_str::<RoomDocument>(&json)?.into_snapshot(self.origin),
            None => RoomSnapshot { offer: None, from_local_write: false },
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(initial);

        let origin = self.origin;
        let task = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        log::warn!("[PRESENCE] Unreadable payload on {}: {}", key, e);
                        continue;
                    }
                };
                match serde_json::from_str::<RoomDocument>(&payload) {
                    Ok(doc) => {
                        if tx.send(doc.into_snapshot(origin)).is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("[PRESENCE] Invalid room document on {}: {}", key, e),
                }
            }
            log::debug!("[PRESENCE] Watch on {} ended", key);
        });

        Ok(PresenceWatch::new(rx, Some(task)))
    }

    async fn put_offer(&self, room: &RoomId, offer: &CallOffer) -> ClientResult<()> {
        let key = room.document_key();
        let doc = RoomDocument { origin: self.origin, offer: Some(offer.clone()) };
        let json = serde_json::to_string(&doc)?;
        {
            let mut conn = self.redis_manager.lock().await;
            let _: () = redis::cmd("SET").arg(&key).arg(&json).query_async(&mut *conn).await?;
        }
        self.publish(&key, &doc).await?;
        log::debug!("[PRESENCE] Published offer {} in room {}", offer.id, room);
        Ok(())
    }

    async fn delete(&self, room: &RoomId) -> ClientResult<()> {
        let key = room.document_key();
        {
            let mut conn = self.redis_manager.lock().await;
            let _: () = redis::cmd("DEL").arg(&key).query_async(&mut *conn).await?;
        }
        self.publish(&key, &RoomDocument { origin: self.origin, offer: None }).await?;
        log::debug!("[PRESENCE] Deleted room {}", room);
        Ok(())
    }
}

struct StoredOffer {
    origin: Uuid,
    offer: CallOffer,
}

struct Watcher {
    origin: Uuid,
    tx: mpsc::UnboundedSender<RoomSnapshot>,
}

#[derive(Default)]
struct Rooms {
    docs: HashMap<RoomId, StoredOffer>,
    watchers: HashMap<RoomId, Vec<Watcher>>,
}

impl Rooms {
    fn notify(&mut self, room: &RoomId, writer: Uuid, offer: Option<&CallOffer>) {
        if let Some(watchers) = self.watchers.get_mut(room) {
            watchers.retain(|w| {
                w.tx
                    .send(RoomSnapshot { offer: offer.cloned(), from_local_write: w.origin == writer })
                    .is_ok()
            });
        }
    }
}

/// In-process presence store. Handles created with [`MemoryPresenceStore::session`]
/// share the same rooms but act as different writers.
pub struct MemoryPresenceStore {
    rooms: Arc<parking_lot::Mutex<Rooms>>,
    origin: Uuid,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(parking_lot::Mutex::new(Rooms::default())),
            origin: Uuid::new_v4(),
        }
    }

    /// Another participant's handle on the same rooms.
    pub fn session(&self) -> Self {
        Self { rooms: self.rooms.clone(), origin: Uuid::new_v4() }
    }

    pub fn document(&self, room: &RoomId) -> Option<CallOffer> {
        self.rooms.lock().docs.get(room).map(|stored| stored.offer.clone())
    }

    /// Live watchers on `room`, across all sessions.
    pub fn watcher_count(&self, room: &RoomId) -> usize {
        let mut rooms = self.rooms.lock();
        match rooms.watchers.get_mut(room) {
            Some(watchers) => {
                watchers.retain(|w| !w.tx.is_closed());
                watchers.len()
            }
            None => 0,
        }
    }
}

impl Default for MemoryPresenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn watch(&self, room: &RoomId) -> ClientResult<PresenceWatch> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut rooms = self.rooms.lock();
        let initial = match rooms.docs.get(room) {
            Some(stored) => RoomSnapshot {
                offer: Some(stored.offer.clone()),
                from_local_write: stored.origin == self.origin,
            },
            None => RoomSnapshot { offer: None, from_local_write: false },
        };
        tx.send(initial)
            .map_err(|_| ClientError::Presence("watch closed".to_string()))?;
        let watchers = rooms.watchers.entry(room.clone()).or_default();
        watchers.retain(|w| !w.tx.is_closed());
        watchers.push(Watcher { origin: self.origin, tx });
        Ok(PresenceWatch::new(rx, None))
    }

    async fn put_offer(&self, room: &RoomId, offer: &CallOffer) -> ClientResult<()> {
        let mut rooms = self.rooms.lock();
        rooms
            .docs
            .insert(room.clone(), StoredOffer { origin: self.origin, offer: offer.clone() });
        rooms.notify(room, self.origin, Some(offer));
        Ok(())
    }

    async fn delete(&self, room: &RoomId) -> ClientResult<()> {
        let mut rooms = self.rooms.lock();
        rooms.docs.remove(room);
        rooms.notify(room, self.origin, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watch_starts_with_current_document() {
        let store = MemoryPresenceStore::new();
        let room = RoomId::between(3, 7);
        let offer = CallOffer::new(3, "v=0");
        store.put_offer(&room, &offer).await.unwrap();

        let remote = store.session();
        let mut watch = remote.watch(&room).await.unwrap();
        let first = watch.next().await.unwrap();
        assert_eq!(first.offer, Some(offer));
        assert!(!first.from_local_write);
    }

    #[tokio::test]
    async fn own_writes_are_flagged_local() {
        let caller = MemoryPresenceStore::new();
        let callee = caller.session();
        let room = RoomId::between(3, 7);
        let mut mine = caller.watch(&room).await.unwrap();
        let mut theirs = callee.watch(&room).await.unwrap();
        assert_eq!(mine.next().await.unwrap().offer, None);
        assert_eq!(theirs.next().await.unwrap().offer, None);

        caller.put_offer(&room, &CallOffer::new(3, "v=0")).await.unwrap();
        assert!(mine.next().await.unwrap().from_local_write);
        assert!(!theirs.next().await.unwrap().from_local_write);

        callee.delete(&room).await.unwrap();
        let seen = mine.next().await.unwrap();
        assert_eq!(seen.offer, None);
        assert!(!seen.from_local_write);
        assert!(caller.document(&room).is_none());
    }

    #[tokio::test]
    async fn dropped_watch_is_pruned() {
        let store = MemoryPresenceStore::new();
        let room = RoomId::between(1, 2);
        let watch = store.watch(&room).await.unwrap();
        assert_eq!(store.watcher_count(&room), 1);
        drop(watch);
        assert_eq!(store.watcher_count(&room), 0);
    }

    #[tokio::test]
    async fn rewatching_a_quiet_room_does_not_accumulate() {
        let store = MemoryPresenceStore::new();
        let room = RoomId::between(3, 7);
        for _ in 0..10 {
            let watch = store.watch(&room).await.unwrap();
            drop(watch);
        }
        let _current = store.watch(&room).await.unwrap();
        assert_eq!(store.rooms.lock().watchers[&room].len(), 1);
    }
}
