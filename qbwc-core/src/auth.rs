//! Credential verification and session creation.
//!
//! The configured secret holds two BLAKE3 digests joined by `||`:
//! `<hashedPassword>||<hashedUsername>`. Authentication never fails at
//! the protocol level. A bad attempt still receives a fresh ticket, but
//! no session is created and the second slot carries [`INVALID_USER`].

use tracing::{error, info};

use crate::error::ConnectorError;
use crate::session::{Session, SessionStore, Ticket};

/// Separator between the two digests in the secret.
pub const SECRET_DELIMITER: &str = "||";

/// Second-slot sentinel the client recognises as "not a valid user".
pub const INVALID_USER: &str = "nvu";

/// Lowercase hex BLAKE3 digest of `plaintext`, as stored in the secret.
pub fn hash_credential(plaintext: &str) -> String {
    blake3::hash(plaintext.as_bytes()).to_hex().to_string()
}

// ── Credentials ──────────────────────────────────────────────────

/// Parsed form of the configured secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    password: blake3::Hash,
    username: blake3::Hash,
}

impl Credentials {
    /// Parse `<hashedPassword>||<hashedUsername>`.
    ///
    /// Empty parts are discarded before counting; parts beyond the
    /// second are ignored.
    pub fn parse(secret: &str) -> Result<Self, ConnectorError> {
        let parts: Vec<&str> = secret
            .split(SECRET_DELIMITER)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() < 2 {
            return Err(ConnectorError::SecretMalformed { parts: parts.len() });
        }
        Ok(Self {
            password: parse_digest(parts[0])?,
            username: parse_digest(parts[1])?,
        })
    }

    /// Check a username/password pair against the stored digests.
    ///
    /// Both comparisons always run; `blake3::Hash` equality is
    /// constant-time.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let user_ok = blake3::hash(username.as_bytes()) == self.username;
        let pass_ok = blake3::hash(password.as_bytes()) == self.password;
        user_ok & pass_ok
    }
}

fn parse_digest(hex: &str) -> Result<blake3::Hash, ConnectorError> {
    blake3::Hash::from_hex(hex.to_ascii_lowercase())
        .map_err(|e| ConnectorError::InvalidHash(e.to_string()))
}

// ── AuthReply ────────────────────────────────────────────────────

/// The two-slot result of `authenticate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthReply {
    /// Always a fresh ticket, even on failure.
    pub ticket: Ticket,
    /// Company file path (empty = client's open file), or [`INVALID_USER`].
    pub company: String,
}

impl AuthReply {
    pub fn is_authenticated(&self) -> bool {
        self.company != INVALID_USER
    }

    /// Wire order: `[ticket, company]`.
    pub fn into_array(self) -> [String; 2] {
        [self.ticket.to_string(), self.company]
    }
}

// ── Authenticator ────────────────────────────────────────────────

/// Validates credentials and opens sessions.
#[derive(Debug, Clone)]
pub struct Authenticator {
    secret: Option<String>,
    company_file_path: String,
}

impl Authenticator {
    /// `company_file_path` is returned on success; leave it empty to let
    /// the client use whichever company file it has open.
    pub fn new(secret: Option<String>, company_file_path: impl Into<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.trim().is_empty()),
            company_file_path: company_file_path.into(),
        }
    }

    fn credentials(&self) -> Result<Credentials, ConnectorError> {
        let secret = self.secret.as_deref().ok_or(ConnectorError::SecretMissing)?;
        Credentials::parse(secret)
    }

    /// Authenticate and, on success, insert a new session into `store`.
    pub fn authenticate(&self, username: &str, password: &str, store: &SessionStore) -> AuthReply {
        info!(username, "authenticating user");

        let ticket = Ticket::generate();
        let credentials = match self.credentials() {
            Ok(c) => c,
            Err(e) => {
                error!("cannot authenticate: {e}");
                return AuthReply {
                    ticket,
                    company: INVALID_USER.to_string(),
                };
            }
        };

        if !credentials.verify(username, password) {
            info!(username, ticket = %ticket, "invalid user");
            return AuthReply {
                ticket,
                company: INVALID_USER.to_string(),
            };
        }

        store.insert(Session::new(ticket.clone(), username));
        info!(username, ticket = %ticket, "user authenticated");

        AuthReply {
            ticket,
            company: self.company_file_path.clone(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(password: &str, username: &str) -> String {
        format!(
            "{}{SECRET_DELIMITER}{}",
            hash_credential(password),
            hash_credential(username)
        )
    }

    #[test]
    fn parse_and_verify() {
        let creds = Credentials::parse(&secret("hunter2", "qbuser")).unwrap();
        assert!(creds.verify("qbuser", "hunter2"));
        assert!(!creds.verify("qbuser", "wrong"));
        assert!(!creds.verify("other", "hunter2"));
    }

    #[test]
    fn parse_rejects_single_part() {
        let err = Credentials::parse("abc||").unwrap_err();
        assert!(matches!(err, ConnectorError::SecretMalformed { parts: 1 }));
    }

    #[test]
    fn parse_rejects_non_hex() {
        let err = Credentials::parse("not-hex||also-not").unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidHash(_)));
    }

    #[test]
    fn parse_accepts_uppercase_digests() {
        let upper = secret("pw", "user").to_uppercase();
        let creds = Credentials::parse(&upper).unwrap();
        assert!(creds.verify("user", "pw"));
    }

    #[test]
    fn success_creates_session() {
        let store = SessionStore::new();
        let auth = Authenticator::new(Some(secret("pw", "user")), "C:\\Company.qbw");

        let reply = auth.authenticate("user", "pw", &store);
        assert!(reply.is_authenticated());
        assert_eq!(reply.company, "C:\\Company.qbw");

        let session = store.get(&reply.ticket).unwrap();
        assert_eq!(session.cursor, 0);
        assert_eq!(session.username, "user");
    }

    #[test]
    fn bad_password_issues_ticket_without_session() {
        let store = SessionStore::new();
        let auth = Authenticator::new(Some(secret("pw", "user")), "");

        let reply = auth.authenticate("user", "nope", &store);
        assert_eq!(reply.company, INVALID_USER);
        assert!(!reply.ticket.as_str().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn missing_secret_fails_quietly() {
        let store = SessionStore::new();
        let auth = Authenticator::new(None, "");
        let reply = auth.authenticate("user", "pw", &store);
        assert!(!reply.is_authenticated());
        assert!(store.is_empty());

        let blank = Authenticator::new(Some("   ".into()), "");
        assert!(!blank.authenticate("user", "pw", &store).is_authenticated());
    }

    #[test]
    fn malformed_secret_fails_quietly() {
        let store = SessionStore::new();
        let auth = Authenticator::new(Some(hash_credential("pw")), "");
        assert!(!auth.authenticate("user", "pw", &store).is_authenticated());
        assert!(store.is_empty());
    }

    #[test]
    fn every_attempt_gets_a_new_ticket() {
        let store = SessionStore::new();
        let auth = Authenticator::new(Some(secret("pw", "user")), "");
        let a = auth.authenticate("user", "pw", &store);
        let b = auth.authenticate("user", "pw", &store);
        assert_ne!(a.ticket, b.ticket);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn reply_array_order() {
        let reply = AuthReply {
            ticket: Ticket::from("t"),
            company: String::new(),
        };
        assert_eq!(reply.into_array(), ["t".to_string(), String::new()]);
    }
}
