use keyring::Entry;

use crate::common::{ClientError, ClientResult, Identity};

const SERVICE: &str = "lesson_chat";
const USER: &str = "lesson_chat_session";

fn fallback_enabled() -> bool {
    std::env::var("KEYRING_FALLBACK").unwrap_or_default() == "true"
}

fn fallback_path() -> std::path::PathBuf {
    std::path::Path::new("data").join("session_token.txt")
}

pub fn save_session_token(token: &str) -> ClientResult<()> {
    let entry = Entry::new(SERVICE, USER);
    match entry.set_password(token) {
        Ok(()) => Ok(()),
        Err(e) => {
            // Keyring failed, fall back to a local file only when explicitly allowed
            if fallback_enabled() {
                let path = fallback_path();
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                std::fs::write(&path, token).map_err(|e| ClientError::Keyring(e.to_string()))?;
                log::warn!("[SESSION_STORE] Keyring unavailable, persisted token to fallback file");
                Ok(())
            } else {
                Err(ClientError::Keyring(format!("keyring unavailable and file fallback disabled: {}", e)))
            }
        }
    }
}

pub fn load_session_token() -> Option<String> {
    let entry = Entry::new(SERVICE, USER);
    match entry.get_password() {
        Ok(t) => {
            if t.trim().is_empty() { None } else { Some(t) }
        }
        Err(_) => {
            if !fallback_enabled() {
                return None;
            }
            let s = std::fs::read_to_string(fallback_path()).ok()?;
            let t = s.trim().to_string();
            if t.is_empty() { None } else { Some(t) }
        }
    }
}

pub fn clear_session_token() -> ClientResult<()> {
    let entry = Entry::new(SERVICE, USER);
    let _ = entry.delete_password();
    if fallback_enabled() {
        let path = fallback_path();
        if path.exists() {
            let _ = std::fs::remove_file(&path);
        }
    }
    Ok(())
}

/// Authenticated identity plus bearer token for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct SessionStore {
    identity: Identity,
    token: Option<String>,
}

impl SessionStore {
    pub fn new(identity: Identity, token: Option<String>) -> Self {
        Self { identity, token }
    }

    /// Rebuilds a session from the token persisted at login.
    pub fn restore(identity: Identity) -> Self {
        Self::new(identity, load_session_token())
    }

    /// Stores a freshly issued token in memory and in the keyring.
    pub fn login(identity: Identity, token: String) -> Self {
        if let Err(e) = save_session_token(&token) {
            log::warn!("[SESSION_STORE] Could not persist session token: {}", e);
        }
        Self::new(identity, Some(token))
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn logout(&mut self) -> ClientResult<()> {
        self.token = None;
        clear_session_token()
    }
}
