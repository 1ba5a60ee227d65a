use std::sync::atomic::{AtomicBool, Ordering};

/// Incoming-call ring tone. `stop` must be safe to call when nothing is ringing.
pub trait Ringer: Send + Sync {
    fn start(&self);
    fn stop(&self);
}

/// Ringer for headless clients: it only logs transitions.
#[derive(Debug, Default)]
pub struct LogRinger {
    ringing: AtomicBool,
}

impl LogRinger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ringing(&self) -> bool {
        self.ringing.load(Ordering::SeqCst)
    }
}

impl Ringer for LogRinger {
    fn start(&self) {
        if !self.ringing.swap(true, Ordering::SeqCst) {
            log::info!("[RINGER] Ringing");
        }
    }

    fn stop(&self) {
        if self.ringing.swap(false, Ordering::SeqCst) {
            log::info!("[RINGER] Stopped");
        }
    }
}
