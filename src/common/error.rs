//! Error type shared by the gateway, the realtime channel, the presence store
//! and both coordinators.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gateway returned {status} for {path}")]
    Status { status: u16, path: String },

    #[error("Unauthorized, please login again")]
    Unauthorized,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Realtime channel error: {0}")]
    Channel(String),

    #[error("Presence store error: {0}")]
    Presence(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("Message is empty")]
    EmptyMessage,

    #[error("No chat partner selected")]
    NoPartner,

    #[error("Only teachers can do this")]
    NotTeacher,

    #[error("A call is already in progress")]
    CallInProgress,

    #[error("There is no incoming call")]
    NoIncomingCall,

    #[error("Not in a call")]
    NotInCall,
}

impl ClientError {
    /// Local input errors are rejected before any network call is made.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ClientError::EmptyMessage
                | ClientError::NoPartner
                | ClientError::NotTeacher
                | ClientError::CallInProgress
                | ClientError::NoIncomingCall
                | ClientError::NotInCall
        )
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
