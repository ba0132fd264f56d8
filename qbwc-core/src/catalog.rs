//! Ordered catalog of outbound request payloads.
//!
//! The catalog is built once at startup from an ordered list of source
//! identifiers. Its order *is* the protocol cycle: cursor `i` always names
//! the same entry for the lifetime of the process.

use std::path::Path;

use tracing::{info, warn};

use crate::error::ConnectorError;

// ── CatalogEntry ─────────────────────────────────────────────────

/// A named request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Canonical name (source identifier without its extension).
    pub name: String,
    /// Opaque request payload handed to the client verbatim.
    pub payload: String,
}

// ── RequestCatalog ───────────────────────────────────────────────

/// Immutable, ordered, name-keyed collection of request payloads.
#[derive(Debug, Clone, Default)]
pub struct RequestCatalog {
    entries: Vec<CatalogEntry>,
}

impl RequestCatalog {
    /// Load every source in `sources` (in order) from `directory`.
    ///
    /// Sources that cannot be read, are blank, or repeat an earlier
    /// canonical name are skipped with a warning. Never fails: an empty
    /// catalog is valid.
    pub fn load(directory: &Path, sources: &[String]) -> Self {
        if sources.is_empty() {
            warn!("no request sources configured; catalog is empty");
            return Self::default();
        }

        let mut catalog = Self::default();
        for source_id in sources {
            match read_source(directory, source_id) {
                Ok(payload) => {
                    info!(source = %source_id, "loaded request payload");
                    catalog.push(canonical_name(source_id), payload);
                }
                Err(e) => warn!(directory = %directory.display(), "skipping source: {e}"),
            }
        }

        info!(count = catalog.size(), "request catalog ready");
        catalog
    }

    /// Build a catalog from in-memory `(name, payload)` pairs, in order.
    ///
    /// The same skipping rules as [`load`](Self::load) apply.
    pub fn from_entries<N, P, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (N, P)>,
        N: Into<String>,
        P: Into<String>,
    {
        let mut catalog = Self::default();
        for (name, payload) in entries {
            catalog.push(name.into(), payload.into());
        }
        catalog
    }

    fn push(&mut self, name: String, payload: String) {
        if payload.trim().is_empty() {
            warn!(name = %name, "skipping blank request payload");
            return;
        }
        if self.position(&name).is_some() {
            warn!(name = %name, "duplicate request name; keeping first occurrence");
            return;
        }
        self.entries.push(CatalogEntry { name, payload });
    }

    /// Number of entries in one protocol cycle.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical name of the entry at `index`.
    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|e| e.name.as_str())
    }

    /// Payload of the entry at `index`.
    pub fn payload_at(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|e| e.payload.as_str())
    }

    /// Index of the entry named `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }
}

/// Strip the final extension from a source identifier.
pub fn canonical_name(source_id: &str) -> String {
    Path::new(source_id)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_id.to_string())
}

fn read_source(directory: &Path, source_id: &str) -> Result<String, ConnectorError> {
    std::fs::read_to_string(directory.join(source_id)).map_err(|source| {
        ConnectorError::CatalogSource {
            source_id: source_id.to_string(),
            source,
        }
    })
}

// ── Tests ────────────────────────────────────────────────────────
