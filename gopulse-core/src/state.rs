use std::{
    num::NonZeroU64,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::watch;

use crate::models::{identity::Identity, presence::PresenceSnapshot};
use crate::utils::coerce::clamp_count;

/// Current and historical-maximum online users.
///
/// Writes are whole-snapshot replaces, so interleaved writers can only ever
/// produce last-write-wins, never a torn or partially updated value.
pub struct PresenceCounter {
    tx: watch::Sender<PresenceSnapshot>,
}

impl PresenceCounter {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(PresenceSnapshot::default());
        Self { tx }
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PresenceSnapshot> {
        self.tx.subscribe()
    }

    pub(crate) fn set(&self, online: Option<i64>, max_online: Option<i64>) -> PresenceSnapshot {
        let snapshot = PresenceSnapshot::coerce(online, max_online);
        self.tx.send_replace(snapshot);
        snapshot
    }
}

impl Default for PresenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// The signed-in identity (if any) and its unread notification count.
pub struct SessionCounter {
    tx: watch::Sender<Option<Identity>>,
}

impl SessionCounter {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn identity(&self) -> Option<Identity> {
        self.tx.borrow().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.tx.borrow().as_ref().is_some_and(|me| me.is_admin)
    }

    pub fn unread_count(&self) -> Option<u64> {
        self.tx.borrow().as_ref().map(|me| me.unread_count)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.tx.subscribe()
    }

    pub fn set_identity(&self, identity: Identity) {
        self.tx.send_replace(Some(identity));
    }

    pub fn clear_identity(&self) {
        self.tx.send_replace(None);
    }

    /// Overwrites the unread count. Anonymous sessions have nothing to update
    /// and return `false`.
    pub(crate) fn set_unread(&self, unread: Option<i64>) -> bool {
        self.write_unread(None, unread)
    }

    /// Like [`SessionCounter::set_unread`], but only while `uid` is the one
    /// signed in. The check and the write happen under the same lock.
    pub(crate) fn set_unread_for(&self, uid: NonZeroU64, unread: Option<i64>) -> bool {
        self.write_unread(Some(uid), unread)
    }

    fn write_unread(&self, uid: Option<NonZeroU64>, unread: Option<i64>) -> bool {
        let unread = clamp_count(unread);
        let mut written = false;
        self.tx.send_if_modified(|current| match current {
            Some(me) if uid.is_none_or(|uid| uid == me.id) => {
                written = true;
                let changed = me.unread_count != unread;
                me.unread_count = unread;
                changed
            }
            _ => false,
        });
        written
    }
}

impl Default for SessionCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Revocable permission for a background task to write shared state.
///
/// Each started channel session or poller owns one. Writes run while the lock
/// is held, so once [`WriteLease::revoke`] returns no write is in progress and
/// none can start.
#[derive(Clone)]
pub struct WriteLease {
    live: Arc<Mutex<bool>>,
}

impl WriteLease {
    pub fn new() -> Self {
        Self {
            live: Arc::new(Mutex::new(true)),
        }
    }

    pub fn is_live(&self) -> bool {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `write` if the lease is still live. Returns whether it ran.
    pub fn apply(&self, write: impl FnOnce()) -> bool {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if !*live {
            return false;
        }
        write();
        true
    }

    pub fn revoke(&self) {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

impl Default for WriteLease {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-session context shared by the channel, the poller and the gate.
#[derive(Clone, Default)]
pub struct AppState {
    pub presence: Arc<PresenceCounter>,
    pub session: Arc<SessionCounter>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }
}
