//! Conversational memory keyed by (knowledge base, session id).
//!
//! Each session sits behind its own `tokio::sync::Mutex`; the chat path
//! holds that lock from reading history until the new turn is appended, so
//! concurrent calls on one session serialize while other sessions proceed.
//! The map itself uses a short-lived `std::sync::Mutex` that is never held
//! across an `.await`.
//!
//! Memory is bounded two ways: each session keeps at most `max_turns` recent
//! turns, and sessions idle for longer than `idle_ttl` are purged lazily on
//! every lookup. Nothing is persisted; a restart drops all sessions.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use multi_kb_rag_core::models::Turn;
use tracing::debug;

use crate::config::SessionConfig;

/// Ordered turns of one conversation.
#[derive(Debug, Default)]
pub struct Session {
    turns: VecDeque<Turn>,
    max_turns: usize,
}

impl Session {
    fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns,
        }
    }

    pub fn history(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Append a turn, dropping the oldest when over the cap.
    pub fn append(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        if self.max_turns > 0 {
            while self.turns.len() > self.max_turns {
                self.turns.pop_front();
            }
        }
    }
}

pub type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

type SessionKey = (String, String);

struct Entry {
    handle: SessionHandle,
    last_access: Instant,
}

pub struct SessionStore {
    sessions: Mutex<HashMap<SessionKey, Entry>>,
    max_turns: usize,
    idle_ttl: Option<Duration>,
}

impl SessionStore {
    /// `max_turns == 0` keeps every turn; `idle_ttl == None` never expires.
    pub fn new(max_turns: usize, idle_ttl: Option<Duration>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_turns,
            idle_ttl,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        let ttl = (config.idle_ttl_secs > 0).then(|| Duration::from_secs(config.idle_ttl_secs));
        Self::new(config.max_turns, ttl)
    }

    fn map(&self) -> MutexGuard<'_, HashMap<SessionKey, Entry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve the session for `(collection, session_id)`, creating it on
    /// first use.
    pub fn get_or_create(&self, collection: &str, session_id: &str) -> SessionHandle {
        self.purge_idle();
        let mut map = self.map();
        let entry = map
            .entry((collection.to_string(), session_id.to_string()))
            .or_insert_with(|| {
                debug!(collection, session = session_id, "new session");
                Entry {
                    handle: Arc::new(tokio::sync::Mutex::new(Session::new(self.max_turns))),
                    last_access: Instant::now(),
                }
            });
        entry.last_access = Instant::now();
        entry.handle.clone()
    }

    pub fn get(&self, collection: &str, session_id: &str) -> Option<SessionHandle> {
        self.purge_idle();
        let mut map = self.map();
        map.get_mut(&(collection.to_string(), session_id.to_string()))
            .map(|e| {
                e.last_access = Instant::now();
                e.handle.clone()
            })
    }

    /// Discard one session. Returns `false` if it did not exist.
    pub fn clear(&self, collection: &str, session_id: &str) -> bool {
        self.map()
            .remove(&(collection.to_string(), session_id.to_string()))
            .is_some()
    }

    /// Discard every session scoped to `collection`, returning how many.
    pub fn drop_collection(&self, collection: &str) -> usize {
        let mut map = self.map();
        let before = map.len();
        map.retain(|(c, _), _| c != collection);
        before - map.len()
    }

    /// Drop sessions idle past the TTL. Sessions currently locked by a chat
    /// call are kept.
    pub fn purge_idle(&self) -> usize {
        let Some(ttl) = self.idle_ttl else {
            return 0;
        };
        let mut map = self.map();
        let before = map.len();
        map.retain(|_, e| e.last_access.elapsed() < ttl || Arc::strong_count(&e.handle) > 1);
        let purged = before - map.len();
        if purged > 0 {
            debug!(purged, "purged idle sessions");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(i: usize) -> Turn {
        Turn {
            question: format!("q{}", i),
            answer: format!("a{}", i),
        }
    }

    #[tokio::test]
    async fn sessions_are_created_lazily_and_shared() {
        let store = SessionStore::new(0, None);
        assert!(store.get("kb_a", "s1").is_none());

        let h1 = store.get_or_create("kb_a", "s1");
        h1.lock().await.append(turn(1));
        let h2 = store.get_or_create("kb_a", "s1");
        assert_eq!(h2.lock().await.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn sessions_are_isolated_per_kb() {
        let store = SessionStore::new(0, None);
        store.get_or_create("kb_a", "s1").lock().await.append(turn(1));
        assert!(store.get_or_create("kb_b", "s1").lock().await.is_empty());
    }

    #[tokio::test]
    async fn turn_cap_drops_oldest() {
        let store = SessionStore::new(2, None);
        let h = store.get_or_create("kb_a", "s1");
        let mut s = h.lock().await;
        for i in 0..5 {
            s.append(turn(i));
        }
        let history = s.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].question, "q3");
        assert_eq!(history[1].question, "q4");
    }

    #[test]
    fn clear_reports_missing_sessions() {
        let store = SessionStore::new(0, None);
        assert!(!store.clear("kb_a", "never"));
        store.get_or_create("kb_a", "s1");
        assert!(store.clear("kb_a", "s1"));
        assert!(store.is_empty());
    }

    #[test]
    fn drop_collection_only_touches_that_kb() {
        let store = SessionStore::new(0, None);
        store.get_or_create("kb_a", "s1");
        store.get_or_create("kb_a", "s2");
        store.get_or_create("kb_b", "s1");
        assert_eq!(store.drop_collection("kb_a"), 2);
        assert_eq!(store.len(), 1);
        assert!(store.get("kb_b", "s1").is_some());
    }

    #[test]
    fn idle_sessions_are_purged() {
        let store = SessionStore::new(0, Some(Duration::from_millis(10)));
        drop(store.get_or_create("kb_a", "old"));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(store.purge_idle(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn sessions_in_use_survive_purge() {
        let store = SessionStore::new(0, Some(Duration::from_millis(10)));
        let held = store.get_or_create("kb_a", "busy");
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(store.purge_idle(), 0);
        drop(held);
        assert_eq!(store.purge_idle(), 1);
    }

    #[test]
    fn zero_ttl_config_never_expires() {
        let store = SessionStore::from_config(&SessionConfig {
            max_turns: 20,
            idle_ttl_secs: 0,
        });
        store.get_or_create("kb_a", "s1");
        assert_eq!(store.purge_idle(), 0);
    }
}
