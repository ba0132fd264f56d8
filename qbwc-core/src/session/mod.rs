//! Sessions, tickets, and the concurrency-safe session store.

mod phase;
mod store;

pub use phase::CyclePhase;
pub use store::SessionStore;

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use uuid::Uuid;

// ── Ticket ───────────────────────────────────────────────────────

/// Opaque session identifier handed to the client at authentication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ticket(String);

impl Ticket {
    /// Generate a fresh, never-reused ticket.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Ticket {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Ticket {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Session ──────────────────────────────────────────────────────

/// Extension key for the company file the client has open.
pub const EXT_COMPANY_FILE: &str = "company_file";
/// Extension key for the client's country edition.
pub const EXT_COUNTRY: &str = "country";
/// Extension key for the qbXML version the client supports.
pub const EXT_QBXML_VERSION: &str = "qbxml_version";

/// State for one authenticated client session.
#[derive(Debug, Clone)]
pub struct Session {
    pub ticket: Ticket,
    /// Position in the catalog; always within `[0, catalog size]`.
    pub cursor: usize,
    /// Username supplied at authentication.
    pub username: String,
    pub created_at: Instant,
    /// Refreshed by every protocol operation on this session.
    pub last_seen: Instant,
    /// Most recent error reported by the client, if any.
    pub last_error: Option<String>,
    /// Free-form host context recorded from the client.
    pub extensions: HashMap<String, String>,
}

impl Session {
    pub fn new(ticket: Ticket, username: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            ticket,
            cursor: 0,
            username: username.into(),
            created_at: now,
            last_seen: now,
            last_error: None,
            extensions: HashMap::new(),
        }
    }

    /// Current cycle phase for a catalog of `catalog_size` entries.
    pub fn phase(&self, catalog_size: usize) -> CyclePhase {
        CyclePhase::of(self.cursor, catalog_size)
    }

    /// Mark the session as used now.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// How long since the session was last used.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }
}
