//! Translation table for error codes reported by the client.
//!
//! Used for log messages only; no protocol decision depends on whether a
//! code is known.

/// Vendor error code → human-readable message.
#[derive(Debug, Clone)]
pub struct ErrorCodeTable {
    entries: &'static [(&'static str, &'static str)],
}

const KNOWN_CODES: &[(&str, &str)] = &[
    (
        "0x80040400",
        "QuickBooks found an error when parsing the provided XML text stream.",
    ),
    ("0x80040401", "Could not access QuickBooks."),
    (
        "0x80040402",
        "Unexpected error. Check the qbsdklog.txt file for additional information.",
    ),
];

impl Default for ErrorCodeTable {
    fn default() -> Self {
        Self {
            entries: KNOWN_CODES,
        }
    }
}

impl ErrorCodeTable {
    /// Friendly message for `code`; surrounding whitespace and hex-digit
    /// case are ignored.
    pub fn lookup(&self, code: &str) -> Option<&'static str> {
        let code = code.trim();
        self.entries
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(code))
            .map(|(_, message)| *message)
    }

    /// The mapped message, or `fallback` when the code is unknown.
    pub fn describe<'a>(&self, code: &str, fallback: &'a str) -> &'a str {
        self.lookup(code).unwrap_or(fallback)
    }
}
