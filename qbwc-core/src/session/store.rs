//! Concurrency-safe mapping from ticket to session.
//!
//! All access goes through one store-wide lock.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::session::{Session, Ticket};

/// Owned, lifecycle-scoped session map.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<Ticket, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Poisoning is ignored: mutations are plain field stores.
    fn lock(&self) -> MutexGuard<'_, HashMap<Ticket, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert (or replace) the session under its own ticket.
    pub fn insert(&self, session: Session) {
        self.lock().insert(session.ticket.clone(), session);
    }

    /// Snapshot of the session for `ticket`.
    pub fn get(&self, ticket: &Ticket) -> Option<Session> {
        self.lock().get(ticket).cloned()
    }

    /// Remove the session for `ticket`. Idempotent.
    pub fn remove(&self, ticket: &Ticket) -> Option<Session> {
        self.lock().remove(ticket)
    }

    /// Run `f` against the session for `ticket` while holding the lock.
    ///
    /// This is the only way to mutate a session, which makes every
    /// read-modify-write (cursor advance in particular) atomic with
    /// respect to concurrent calls for the same ticket. Returns `None`
    /// when the ticket is unknown; `f` is not called in that case.
    pub fn update<R>(&self, ticket: &Ticket, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(ticket)?;
        session.touch();
        Some(f(session))
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove and return every session idle for longer than `max_idle`.
    pub fn drain_idle(&self, max_idle: Duration) -> Vec<Session> {
        let mut sessions = self.lock();
        let idle: Vec<Ticket> = sessions
            .values()
            .filter(|s| s.idle_for() > max_idle)
            .map(|s| s.ticket.clone())
            .collect();
        idle.into_iter()
            .filter_map(|ticket| sessions.remove(&ticket))
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn session(ticket: &str) -> Session {
        Session::new(Ticket::from(ticket), "admin")
    }

    #[test]
    fn insert_get_remove() {
        let store = SessionStore::new();
        store.insert(session("a"));
        assert_eq!(store.len(), 1);
        assert!(store.get(&Ticket::from("a")).is_some());
        assert_eq!(store.get(&Ticket::from("a")).unwrap().username, "admin");

        assert!(store.remove(&Ticket::from("a")).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let store = SessionStore::new();
        store.insert(session("a"));
        assert!(store.remove(&Ticket::from("a")).is_some());
        assert!(store.remove(&Ticket::from("a")).is_none());
        assert!(store.remove(&Ticket::from("never")).is_none());
    }

    #[test]
    fn update_unknown_ticket_does_not_create() {
        let store = SessionStore::new();
        let called = store.update(&Ticket::from("ghost"), |s| s.cursor += 1);
        assert!(called.is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn update_mutates_in_place() {
        let store = SessionStore::new();
        store.insert(session("a"));
        let cursor = store.update(&Ticket::from("a"), |s| {
            s.cursor += 2;
            s.cursor
        });
        assert_eq!(cursor, Some(2));
        assert_eq!(store.get(&Ticket::from("a")).unwrap().cursor, 2);
    }

    #[test]
    fn concurrent_advances_are_not_lost() {
        let store = Arc::new(SessionStore::new());
        store.insert(session("a"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        store.update(&Ticket::from("a"), |s| s.cursor += 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.get(&Ticket::from("a")).unwrap().cursor, 2000);
    }

    #[test]
    fn drain_idle_removes_only_stale_sessions() {
        let store = SessionStore::new();
        store.insert(session("old"));
        std::thread::sleep(Duration::from_millis(20));
        store.insert(session("fresh"));

        let drained = store.drain_idle(Duration::from_millis(10));
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].ticket, Ticket::from("old"));
        assert_eq!(store.len(), 1);
        assert!(store.get(&Ticket::from("fresh")).is_some());
    }

    #[test]
    fn update_refreshes_last_seen() {
        let store = SessionStore::new();
        store.insert(session("a"));
        std::thread::sleep(Duration::from_millis(20));
        store.update(&Ticket::from("a"), |_| ());
        assert!(store.drain_idle(Duration::from_millis(10)).is_empty());
        assert_eq!(store.len(), 1);
    }
}
