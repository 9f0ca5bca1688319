//! The session record shared between the read loop and the heartbeat task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use super::ConnectionState;

/// Mutable session state: ID, sequence, heartbeat interval, ack flag and
/// the observable connection state.
///
/// The read loop owns all transitions; the heartbeat task only reads the
/// sequence and flips the ack flag. Critical sections are short and never
/// held across an await point.
pub struct SessionState {
    session_id: Mutex<Option<String>>,
    sequence: Mutex<Option<u64>>,
    heartbeat_interval: Mutex<Option<Duration>>,
    acked: AtomicBool,
    state_tx: watch::Sender<ConnectionState>,
}

impl SessionState {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            session_id: Mutex::new(None),
            sequence: Mutex::new(None),
            heartbeat_interval: Mutex::new(None),
            acked: AtomicBool::new(true),
            state_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn set_state(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next.clone());
        if previous != next {
            debug!(?previous, state = ?next, "gateway connection state changed");
        }
    }

    pub fn session_id(&self) -> Option<String> {
        lock(&self.session_id).clone()
    }

    pub(crate) fn set_session_id(&self, id: String) {
        *lock(&self.session_id) = Some(id);
    }

    pub fn sequence(&self) -> Option<u64> {
        *lock(&self.sequence)
    }

    /// Records a dispatch sequence number. Stale values are ignored: the
    /// sequence never decreases within one session.
    pub(crate) fn observe_sequence(&self, seq: u64) {
        let mut current = lock(&self.sequence);
        match *current {
            Some(known) if seq < known => {
                warn!(known, received = seq, "ignoring stale gateway sequence");
            }
            _ => *current = Some(seq),
        }
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        *lock(&self.heartbeat_interval)
    }

    pub(crate) fn set_heartbeat_interval(&self, interval: Duration) {
        *lock(&self.heartbeat_interval) = Some(interval);
    }

    pub(crate) fn heartbeat_acknowledged(&self) -> bool {
        self.acked.load(Ordering::Acquire)
    }

    pub(crate) fn mark_heartbeat_sent(&self) {
        self.acked.store(false, Ordering::Release);
    }

    pub(crate) fn mark_ack_received(&self) {
        self.acked.store(true, Ordering::Release);
    }

    /// Session identity for a Resume frame, when one exists.
    pub fn resume_info(&self) -> Option<(String, u64)> {
        let id = lock(&self.session_id).clone()?;
        let seq = (*lock(&self.sequence))?;
        Some((id, seq))
    }

    /// Forgets the session entirely: ID, sequence, interval and ack flag.
    /// The entity cache is cleared separately, only when the server says the
    /// session is non-resumable.
    pub(crate) fn clear(&self) {
        *lock(&self.session_id) = None;
        *lock(&self.sequence) = None;
        *lock(&self.heartbeat_interval) = None;
        self.acked.store(true, Ordering::Release);
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let session = SessionState::new();
        assert_eq!(session.sequence(), None);

        session.observe_sequence(5);
        session.observe_sequence(9);
        session.observe_sequence(3);
        assert_eq!(session.sequence(), Some(9));
    }

    #[test]
    fn resume_info_requires_both_fields() {
        let session = SessionState::new();
        assert_eq!(session.resume_info(), None);

        session.set_session_id("abc".to_string());
        assert_eq!(session.resume_info(), None);

        session.observe_sequence(7);
        assert_eq!(session.resume_info(), Some(("abc".to_string(), 7)));
    }

    #[test]
    fn clear_resets_everything() {
        let session = SessionState::new();
        session.set_session_id("abc".to_string());
        session.observe_sequence(7);
        session.set_heartbeat_interval(Duration::from_millis(100));
        session.mark_heartbeat_sent();

        session.clear();
        assert_eq!(session.session_id(), None);
        assert_eq!(session.sequence(), None);
        assert_eq!(session.heartbeat_interval(), None);
        assert!(session.heartbeat_acknowledged());
    }

    #[test]
    fn state_changes_are_observable() {
        let session = SessionState::new();
        let rx = session.subscribe();
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);

        session.set_state(ConnectionState::Connecting);
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert_eq!(*rx.borrow(), ConnectionState::Connecting);
    }
}
