use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::update::UserId;

/// Type-erased session value
pub type Value = Arc<dyn Any + Send + Sync>;

/// Current FSM node of a user: which conversation, and where in it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateLabel {
    pub flow: &'static str,
    pub node: &'static str,
}

impl StateLabel {
    pub const fn new(flow: &'static str, node: &'static str) -> Self {
        Self { flow, node }
    }
}

impl std::fmt::Display for StateLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.flow, self.node)
    }
}

/// Task Guard slot: present iff the user has a call in flight
struct FlightSlot {
    ticket: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct Session {
    /// Identity of the currently open conversation
    epoch: u64,
    state: Option<StateLabel>,
    data: HashMap<String, Value>,
    flight: Option<FlightSlot>,
}

impl Session {
    fn is_empty(&self) -> bool {
        self.state.is_none() && self.data.is_empty() && self.flight.is_none()
    }

    fn wipe_conversation(&mut self) {
        self.state = None;
        self.epoch = 0;
        self.data.clear();
    }
}

/// Per-user state label and key/value bag.
///
/// One reader/writer lock guards the whole map: `get` calls share the read
/// side, every mutation takes the write side. Nothing here awaits, so the
/// lock is never held across I/O. Entries are created lazily on the first
/// write and removed as soon as they hold nothing.
pub struct SessionStore {
    sessions: RwLock<HashMap<UserId, Session>>,
    next_epoch: AtomicU64,
    next_ticket: AtomicU64,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_epoch: AtomicU64::new(1),
            next_ticket: AtomicU64::new(1),
        }
    }

    pub fn get<T>(&self, user: UserId, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let sessions = self.sessions.read();
        sessions
            .get(&user)?
            .data
            .get(key)?
            .downcast_ref::<T>()
            .cloned()
    }

    pub fn set<T>(&self, user: UserId, key: impl Into<String>, value: T)
    where
        T: Send + Sync + 'static,
    {
        let mut sessions = self.sessions.write();
        sessions
            .entry(user)
            .or_default()
            .data
            .insert(key.into(), Arc::new(value));
    }

    pub fn remove(&self, user: UserId, key: &str) -> bool {
        let mut sessions = self.sessions.write();
        let Some(session) = sessions.get_mut(&user) else {
            return false;
        };
        let removed = session.data.remove(key).is_some();
        if session.is_empty() {
            sessions.remove(&user);
        }
        removed
    }

    /// Remove the user's state and every data key.
    ///
    /// A live flight slot survives until its own `end_flight`, so a cancelled
    /// call still counts as running until it has actually wound down.
    pub fn clear(&self, user: UserId) {
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get_mut(&user) {
            session.wipe_conversation();
            if session.is_empty() {
                sessions.remove(&user);
            }
        }
    }

    /// Clear only if `epoch` is still the open conversation. Returns whether it did.
    pub fn clear_if_epoch(&self, user: UserId, epoch: u64) -> bool {
        let mut sessions = self.sessions.write();
        let Some(session) = sessions.get_mut(&user) else {
            return false;
        };
        if session.state.is_none() || session.epoch != epoch {
            return false;
        }
        session.wipe_conversation();
        if session.is_empty() {
            sessions.remove(&user);
        }
        true
    }

    pub fn state(&self, user: UserId) -> Option<StateLabel> {
        let sessions = self.sessions.read();
        sessions.get(&user)?.state
    }

    /// State and epoch of the open conversation, read together
    pub fn current(&self, user: UserId) -> Option<(StateLabel, u64)> {
        let sessions = self.sessions.read();
        let session = sessions.get(&user)?;
        session.state.map(|label| (label, session.epoch))
    }

    /// Open a new conversation at `label`, discarding any leftover data.
    /// Returns the epoch identifying it.
    pub fn open(&self, user: UserId, label: StateLabel) -> u64 {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let mut sessions = self.sessions.write();
        let session = sessions.entry(user).or_default();
        session.data.clear();
        session.state = Some(label);
        session.epoch = epoch;
        epoch
    }

    /// Move the conversation identified by `epoch` to `label`
    pub fn set_state_if(&self, user: UserId, epoch: u64, label: StateLabel) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(&user) {
            Some(session) if session.state.is_some() && session.epoch == epoch => {
                session.state = Some(label);
                true
            }
            _ => false,
        }
    }

    /// Atomically claim the user's flight slot.
    /// Returns `None` if a flight is already registered.
    pub fn begin_flight(&self, user: UserId) -> Option<(u64, CancellationToken)> {
        let mut sessions = self.sessions.write();
        let session = sessions.entry(user).or_default();
        if session.flight.is_some() {
            return None;
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        session.flight = Some(FlightSlot {
            ticket,
            token: token.clone(),
        });
        Some((ticket, token))
    }

    pub fn flight_token(&self, user: UserId) -> Option<CancellationToken> {
        let sessions = self.sessions.read();
        sessions
            .get(&user)?
            .flight
            .as_ref()
            .map(|f| f.token.clone())
    }

    pub fn is_processing(&self, user: UserId) -> bool {
        let sessions = self.sessions.read();
        sessions.get(&user).map_or(false, |s| s.flight.is_some())
    }

    /// Release the flight slot. With `Some(ticket)` only that flight is
    /// released; `None` releases whatever is there.
    pub fn end_flight(&self, user: UserId, ticket: Option<u64>) -> bool {
        let mut sessions = self.sessions.write();
        let Some(session) = sessions.get_mut(&user) else {
            return false;
        };
        let matches = match (&session.flight, ticket) {
            (Some(slot), Some(t)) => slot.ticket == t,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if matches {
            session.flight = None;
        }
        if session.is_empty() {
            sessions.remove(&user);
        }
        matches
    }

    /// Number of users with any bookkeeping held
    pub fn active_users(&self) -> usize {
        self.sessions.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const SEARCH: StateLabel = StateLabel::new("content", "await_query");

    #[test]
    fn test_set_then_get() {
        let store = SessionStore::new();
        store.set(1, "content_query", "rust".to_string());
        assert_eq!(store.get::<String>(1, "content_query"), Some("rust".to_string()));
    }

    #[test]
    fn test_get_wrong_type_is_not_found() {
        let store = SessionStore::new();
        store.set(1, "n", 7u32);
        assert_eq!(store.get::<String>(1, "n"), None);
        assert_eq!(store.get::<u32>(1, "n"), Some(7));
    }

    #[test]
    fn test_users_are_isolated() {
        let store = SessionStore::new();
        store.set(1, "k", 1i64);
        store.set(2, "k", 2i64);
        assert_eq!(store.get::<i64>(1, "k"), Some(1));
        assert_eq!(store.get::<i64>(2, "k"), Some(2));
        store.clear(1);
        assert_eq!(store.get::<i64>(2, "k"), Some(2));
    }

    #[test]
    fn test_clear_removes_every_key_and_entry() {
        let store = SessionStore::new();
        store.open(1, SEARCH);
        store.set(1, "a", 1u8);
        store.set(1, "b", "x".to_string());
        store.clear(1);
        assert!(store.get::<u8>(1, "a").is_none());
        assert!(store.get::<String>(1, "b").is_none());
        assert!(store.state(1).is_none());
        assert_eq!(store.active_users(), 0);
    }

    #[test]
    fn test_read_creates_nothing() {
        let store = SessionStore::new();
        assert!(store.get::<u8>(9, "missing").is_none());
        assert!(store.state(9).is_none());
        assert!(!store.is_processing(9));
        assert_eq!(store.active_users(), 0);
    }

    #[test]
    fn test_remove_prunes_empty_entry() {
        let store = SessionStore::new();
        store.set(1, "k", 1u8);
        assert!(store.remove(1, "k"));
        assert!(!store.remove(1, "k"));
        assert_eq!(store.active_users(), 0);
    }

    #[test]
    fn test_open_resets_data_and_bumps_epoch() {
        let store = SessionStore::new();
        let first = store.open(1, SEARCH);
        store.set(1, "content_query", "old".to_string());
        let second = store.open(1, SEARCH);
        assert_ne!(first, second);
        assert!(store.get::<String>(1, "content_query").is_none());
        assert_eq!(store.current(1), Some((SEARCH, second)));
    }

    #[test]
    fn test_current_pairs_state_with_epoch() {
        let store = SessionStore::new();
        assert!(store.current(1).is_none());
        let epoch = store.open(1, SEARCH);
        assert_eq!(store.current(1), Some((SEARCH, epoch)));
        assert!(store.clear_if_epoch(1, epoch));
        assert!(store.current(1).is_none());

        // A live flight keeps the entry but not the conversation
        store.begin_flight(1).unwrap();
        assert!(store.current(1).is_none());
    }

    #[test]
    fn test_stale_epoch_cannot_touch_new_conversation() {
        let store = SessionStore::new();
        let old = store.open(1, SEARCH);
        store.clear(1);
        let new = store.open(1, SEARCH);
        assert!(!store.clear_if_epoch(1, old));
        assert!(!store.set_state_if(1, old, StateLabel::new("content", "x")));
        assert_eq!(store.state(1), Some(SEARCH));
        assert!(store.clear_if_epoch(1, new));
        assert!(store.state(1).is_none());
    }

    #[test]
    fn test_flight_survives_clear_until_released() {
        let store = SessionStore::new();
        store.open(1, SEARCH);
        let (ticket, _token) = store.begin_flight(1).unwrap();
        store.clear(1);
        assert!(store.state(1).is_none());
        assert!(store.is_processing(1));
        assert!(store.begin_flight(1).is_none());
        assert!(store.end_flight(1, Some(ticket)));
        assert!(!store.is_processing(1));
        assert_eq!(store.active_users(), 0);
    }

    #[test]
    fn test_end_flight_with_stale_ticket_is_noop() {
        let store = SessionStore::new();
        let (first, _) = store.begin_flight(1).unwrap();
        assert!(store.end_flight(1, Some(first)));
        let (_second, _) = store.begin_flight(1).unwrap();
        assert!(!store.end_flight(1, Some(first)));
        assert!(store.is_processing(1));
    }

    #[test]
    fn test_concurrent_begin_flight_single_winner() {
        let store = Arc::new(SessionStore::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || store.begin_flight(42).is_some())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_concurrent_writers_different_users() {
        let store = Arc::new(SessionStore::new());
        let handles: Vec<_> = (0..8u64)
            .map(|user| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 0..100u64 {
                        store.set(user, "counter", i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for user in 0..8u64 {
            assert_eq!(store.get::<u64>(user, "counter"), Some(99));
        }
    }
}
