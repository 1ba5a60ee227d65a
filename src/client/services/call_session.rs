//! Call signaling between the local user and the active partner.
//!
//! Both sides derive the same [`RoomId`] from the two user ids and meet on the
//! room document of the presence store. While idle, a watcher waits for a remote
//! offer on that room; once a call exists, a session watcher takes its place and
//! notices when the other side removes the document.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::client::services::presence_store::{CallOffer, PresenceStore, PresenceWatch, RoomSnapshot};
use crate::client::services::ringer::Ringer;
use crate::common::{ClientError, ClientResult, RoomId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CallState {
    #[default]
    Idle,
    /// Started locally, waiting for the connection to be established.
    Outgoing { room: RoomId },
    /// A remote offer is ringing.
    Incoming { room: RoomId, caller_id: UserId },
    Active { room: RoomId, direction: CallDirection },
}

impl CallState {
    pub fn room(&self) -> Option<&RoomId> {
        match self {
            CallState::Idle => None,
            CallState::Outgoing { room } | CallState::Incoming { room, .. } | CallState::Active { room, .. } => {
                Some(room)
            }
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, CallState::Idle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchMode {
    /// Idle: waits for a remote offer.
    IncomingCalls,
    /// A call exists: waits for the room document to disappear.
    Session,
}

struct Armed {
    mode: WatchMode,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct CallInner {
    partner: Option<UserId>,
    state: CallState,
    generation: u64,
    // offer behind the current call
    current_offer: Option<Uuid>,
    // declined or ended offer that must not ring again
    dismissed_offer: Option<Uuid>,
}

struct Shared {
    me: UserId,
    store: Arc<dyn PresenceStore>,
    ringer: Arc<dyn Ringer>,
    inner: Mutex<CallInner>,
    state_tx: watch::Sender<CallState>,
    // released synchronously, also on drop
    watcher: parking_lot::Mutex<Option<Armed>>,
    // set once the session is dropped; checked under the watcher lock
    closed: AtomicBool,
}

impl Shared {
    fn set_state(&self, inner: &mut CallInner, state: CallState) {
        if inner.state != state {
            log::info!("[CALL] {:?} -> {:?}", inner.state, state);
        }
        inner.state = state.clone();
        self.state_tx.send_replace(state);
    }

    fn disarm(&self, inner: &mut CallInner) {
        if let Some(armed) = self.watcher.lock().take() {
            log::debug!("[CALL] Stopping {:?} watcher", armed.mode);
            armed.task.abort();
        }
        inner.generation += 1;
    }

    /// Starts the watcher that fits the current state. Requires a partner.
    fn arm<'a>(self: &'a Arc<Self>, inner: &'a mut CallInner) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let Some(partner) = inner.partner else {
                return;
            };
            let room = RoomId::between(self.me, partner);
            let mode = if inner.state.is_idle() { WatchMode::IncomingCalls } else { WatchMode::Session };
            inner.generation += 1;
            let generation = inner.generation;

            match self.store.watch(&room).await {
                Ok(watch) => {
                    let mut slot = self.watcher.lock();
                    if self.closed.load(Ordering::SeqCst) {
                        return;
                    }
                    log::debug!("[CALL] Watching room {} ({:?})", room, mode);
                    let task = tokio::spawn(run_watcher(self.clone(), watch, mode, generation));
                    *slot = Some(Armed { mode, task });
                }
                Err(e) => log::error!("[CALL] Failed to watch room {}: {}", room, e),
            }
        })
    }

    /// Returns true when the watcher has to be replaced.
    fn on_idle_snapshot(&self, inner: &mut CallInner, snapshot: RoomSnapshot) -> bool {
        let Some(offer) = snapshot.offer else {
            inner.dismissed_offer = None;
            return false;
        };
        if snapshot.from_local_write || offer.caller_id == self.me {
            return false;
        }
        if inner.dismissed_offer == Some(offer.id) || !inner.state.is_idle() {
            return false;
        }
        let Some(partner) = inner.partner else {
            return false;
        };
        log::info!("[CALL] Incoming call from {}", offer.caller_id);
        inner.current_offer = Some(offer.id);
        self.set_state(
            inner,
            CallState::Incoming { room: RoomId::between(self.me, partner), caller_id: offer.caller_id },
        );
        self.start_ringing();
        true
    }

    fn start_ringing(&self) {
        let _slot = self.watcher.lock();
        if !self.closed.load(Ordering::SeqCst) {
            self.ringer.start();
        }
    }

    fn on_session_snapshot(&self, inner: &mut CallInner, snapshot: RoomSnapshot, seen_offer: &mut bool) -> bool {
        // the callee only has a call because an offer exists
        let offer_expected = *seen_offer
            || matches!(
                inner.state,
                CallState::Incoming { .. } | CallState::Active { direction: CallDirection::Incoming, .. }
            );
        match snapshot.offer {
            Some(offer) => {
                *seen_offer = true;
                inner.current_offer.get_or_insert(offer.id);
                false
            }
            None if offer_expected && !snapshot.from_local_write => {
                log::info!("[CALL] Call ended by the other side");
                self.ringer.stop();
                inner.current_offer = None;
                inner.dismissed_offer = None;
                self.set_state(inner, CallState::Idle);
                true
            }
            None => false,
        }
    }
}

async fn run_watcher(shared: Arc<Shared>, mut watch: PresenceWatch, mode: WatchMode, generation: u64) {
    let mut seen_offer = false;
    while let Some(snapshot) = watch.next().await {
        let mut inner = shared.inner.lock().await;
        if inner.generation != generation || shared.closed.load(Ordering::SeqCst) {
            return;
        }
        let replace = match mode {
            WatchMode::IncomingCalls => shared.on_idle_snapshot(&mut inner, snapshot),
            WatchMode::Session => shared.on_session_snapshot(&mut inner, snapshot, &mut seen_offer),
        };
        if replace {
            // detach without aborting, this task ends right after handing over
            drop(shared.watcher.lock().take());
            shared.arm(&mut inner).await;
            return;
        }
    }
    log::debug!("[CALL] Room watch closed");
}

/// Call state for one local user. All transitions are published on [`CallSession::subscribe`].
pub struct CallSession {
    shared: Arc<Shared>,
}

impl CallSession {
    pub fn new(me: UserId, store: Arc<dyn PresenceStore>, ringer: Arc<dyn Ringer>) -> Self {
        let (state_tx, _) = watch::channel(CallState::Idle);
        Self {
            shared: Arc::new(Shared {
                me,
                store,
                ringer,
                inner: Mutex::new(CallInner::default()),
                state_tx,
                watcher: parking_lot::Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> CallState {
        self.shared.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallState> {
        self.shared.state_tx.subscribe()
    }

    pub async fn partner(&self) -> Option<UserId> {
        self.shared.inner.lock().await.partner
    }

    /// Switches the partner. A call with the previous partner is torn down first.
    pub async fn set_partner(&self, partner: Option<UserId>) {
        let mut inner = self.shared.inner.lock().await;
        if inner.partner == partner {
            return;
        }
        self.shared.disarm(&mut inner);
        self.shared.ringer.stop();
        match inner.state.clone() {
            CallState::Outgoing { room } | CallState::Active { room, .. } => {
                if let Err(e) = self.shared.store.delete(&room).await {
                    log::error!("[CALL] Failed to remove room {} on partner change: {}", room, e);
                }
            }
            CallState::Incoming { .. } | CallState::Idle => {}
        }
        inner.partner = partner;
        inner.current_offer = None;
        inner.dismissed_offer = None;
        self.shared.set_state(&mut inner, CallState::Idle);
        self.shared.arm(&mut inner).await;
    }

    /// Idle → Outgoing. Refused while any call exists.
    pub async fn start_call(&self) -> ClientResult<RoomId> {
        let mut inner = self.shared.inner.lock().await;
        let partner = inner.partner.ok_or(ClientError::NoPartner)?;
        if !inner.state.is_idle() {
            return Err(ClientError::CallInProgress);
        }
        self.shared.disarm(&mut inner);
        self.shared.ringer.stop();
        let room = RoomId::between(self.shared.me, partner);
        inner.current_offer = None;
        self.shared.set_state(&mut inner, CallState::Outgoing { room: room.clone() });
        self.shared.arm(&mut inner).await;
        Ok(room)
    }

    /// Publishes the local offer for an outgoing call.
    pub async fn send_offer(&self, sdp: &str) -> ClientResult<CallOffer> {
        let mut inner = self.shared.inner.lock().await;
        let CallState::Outgoing { room } = inner.state.clone() else {
            return Err(ClientError::NotInCall);
        };
        let offer = CallOffer::new(self.shared.me, sdp);
        if let Err(e) = self.shared.store.put_offer(&room, &offer).await {
            log::error!("[CALL] Failed to publish offer in room {}: {}", room, e);
            return Err(e);
        }
        inner.current_offer = Some(offer.id);
        Ok(offer)
    }

    /// Outgoing → Active, once the peer connection is up.
    pub async fn connected(&self) -> ClientResult<()> {
        let mut inner = self.shared.inner.lock().await;
        let CallState::Outgoing { room } = inner.state.clone() else {
            return Err(ClientError::NotInCall);
        };
        self.shared
            .set_state(&mut inner, CallState::Active { room, direction: CallDirection::Outgoing });
        Ok(())
    }

    pub async fn accept(&self) -> ClientResult<RoomId> {
        let mut inner = self.shared.inner.lock().await;
        let CallState::Incoming { room, .. } = inner.state.clone() else {
            return Err(ClientError::NoIncomingCall);
        };
        self.shared.ringer.stop();
        self.shared.set_state(
            &mut inner,
            CallState::Active { room: room.clone(), direction: CallDirection::Incoming },
        );
        Ok(room)
    }

    /// Incoming → Idle without telling the caller.
    pub async fn decline(&self) -> ClientResult<()> {
        let mut inner = self.shared.inner.lock().await;
        if !matches!(inner.state, CallState::Incoming { .. }) {
            return Err(ClientError::NoIncomingCall);
        }
        self.decline_locked(&mut inner).await;
        Ok(())
    }

    /// Ends the current call. The room document is removed on a best-effort
    /// basis: the state is Idle afterwards even if the removal failed.
    pub async fn end_call(&self) -> ClientResult<()> {
        let mut inner = self.shared.inner.lock().await;
        let room = match inner.state.clone() {
            CallState::Idle => return Err(ClientError::NotInCall),
            CallState::Incoming { .. } => {
                self.decline_locked(&mut inner).await;
                return Ok(());
            }
            CallState::Outgoing { room } | CallState::Active { room, .. } => room,
        };
        self.shared.disarm(&mut inner);
        self.shared.ringer.stop();
        inner.dismissed_offer = inner.current_offer.take();
        if let Err(e) = self.shared.store.delete(&room).await {
            log::error!("[CALL] Failed to remove room {}: {}", room, e);
        }
        self.shared.set_state(&mut inner, CallState::Idle);
        self.shared.arm(&mut inner).await;
        Ok(())
    }

    /// Tears down the call and every watcher.
    pub async fn shutdown(&self) {
        self.set_partner(None).await;
    }

    async fn decline_locked(&self, inner: &mut CallInner) {
        self.shared.disarm(inner);
        self.shared.ringer.stop();
        inner.dismissed_offer = inner.current_offer.take();
        self.shared.set_state(inner, CallState::Idle);
        self.shared.arm(inner).await;
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        let armed = {
            let mut slot = self.shared.watcher.lock();
            self.shared.closed.store(true, Ordering::SeqCst);
            slot.take()
        };
        if let Some(armed) = armed {
            armed.task.abort();
        }
        self.shared.ringer.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_has_no_room() {
        assert_eq!(CallState::Idle.room(), None);
        assert!(CallState::Idle.is_idle());
    }

    #[test]
    fn every_call_state_carries_its_room() {
        let room = RoomId::between(3, 7);
        let states = [
            CallState::Outgoing { room: room.clone() },
            CallState::Incoming { room: room.clone(), caller_id: 3 },
            CallState::Active { room: room.clone(), direction: CallDirection::Incoming },
        ];
        for state in states {
            assert_eq!(state.room(), Some(&room));
            assert!(!state.is_idle());
        }
    }
}
