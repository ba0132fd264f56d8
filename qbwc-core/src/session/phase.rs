//! Per-session cycle state.
//!
//! A session walks the catalog circularly until it is closed:
//!
//! ```text
//!   Idle ──► Issuing ──► CycleComplete
//!    ▲                        │
//!    └────────────────────────┘   (next issue wraps the cursor to 0)
//! ```
//!
//! The phase is derived from the cursor and the catalog size; it is
//! never stored.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// Nothing issued yet in this cycle (cursor is 0).
    Idle,

    /// Part-way through the catalog; `cursor` entries have been issued.
    Issuing { cursor: usize },

    /// Every entry has been issued. The next issue resets to `Idle` and
    /// hands the client an empty payload.
    CycleComplete,
}

impl CyclePhase {
    /// Derive the phase for `cursor` in a catalog of `size` entries.
    ///
    /// An empty catalog is always `CycleComplete`.
    pub fn of(cursor: usize, size: usize) -> Self {
        if cursor >= size {
            Self::CycleComplete
        } else if cursor == 0 {
            Self::Idle
        } else {
            Self::Issuing { cursor }
        }
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Issuing { .. } => write!(f, "Issuing"),
            Self::CycleComplete => write!(f, "CycleComplete"),
        }
    }
}
