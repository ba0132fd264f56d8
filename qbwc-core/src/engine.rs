//! The poll-protocol state machine.
//!
//! Every public operation maps to one remote call and resolves to a value
//! of that call's return type. Unknown tickets, bad credentials,
//! client-reported failures and handler trouble all become sentinels;
//! nothing here returns an error to the caller.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::auth::{AuthReply, Authenticator};
use crate::catalog::RequestCatalog;
use crate::dispatch::{Dispatcher, DispatchStats};
use crate::error_codes::ErrorCodeTable;
use crate::session::{
    CyclePhase, EXT_COMPANY_FILE, EXT_COUNTRY, EXT_QBXML_VERSION, SessionStore, Ticket,
};

/// Reply to `clientVersion`: optional update to 1.0, never blocking.
pub const CLIENT_VERSION_REPLY: &str = "O:1.0";

/// Progress returned by `receive_result` when the client reports an error.
pub const EXECUTION_ERROR: i32 = -101;

/// Progress value for a finished cycle.
pub const PROGRESS_DONE: i32 = 100;

/// Reply to `connectionError`: tells the client to stop this cycle.
pub const CONNECTION_ERROR_REPLY: &str = "DONE";

/// Reply to `closeConnection`.
pub const CLOSE_REPLY: &str = "OK";

/// `last_error` for a live session with nothing recorded.
pub const GENERIC_ERROR: &str = "Error!";

// ── HostContext ──────────────────────────────────────────────────

/// Context the client sends alongside each request poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostContext {
    /// Hash of the previous host response (opaque).
    pub prev_response_hash: String,
    pub company_file: String,
    pub country: String,
    pub major_version: i32,
    pub minor_version: i32,
}

// ── ProtocolEngine ───────────────────────────────────────────────

/// Owns the catalog, the session store and the dispatcher.
#[derive(Debug)]
pub struct ProtocolEngine {
    catalog: Arc<RequestCatalog>,
    sessions: Arc<SessionStore>,
    authenticator: Authenticator,
    dispatcher: Dispatcher,
    error_codes: ErrorCodeTable,
}

impl ProtocolEngine {
    pub fn new(catalog: RequestCatalog, authenticator: Authenticator, dispatcher: Dispatcher) -> Self {
        Self {
            catalog: Arc::new(catalog),
            sessions: Arc::new(SessionStore::new()),
            authenticator,
            dispatcher,
            error_codes: ErrorCodeTable::default(),
        }
    }

    pub fn catalog(&self) -> &RequestCatalog {
        &self.catalog
    }

    /// Shared handle to the session store (for the idle reaper).
    pub fn sessions(&self) -> Arc<SessionStore> {
        Arc::clone(&self.sessions)
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Stop handing responses to handlers and wait up to `grace` for the
    /// outstanding ones. Results received afterwards still report
    /// progress; their payloads are dropped.
    pub async fn shutdown_dispatch(&self, grace: Duration) -> DispatchStats {
        self.dispatcher.shutdown(grace).await
    }

    // ── Version handshake ────────────────────────────────────────

    pub fn client_version(&self, version: &str) -> String {
        info!(version, "client version reported");
        CLIENT_VERSION_REPLY.to_string()
    }

    pub fn server_version(&self) -> String {
        format!("qbwc-connector v{}", env!("CARGO_PKG_VERSION"))
    }

    // ── Authentication ───────────────────────────────────────────

    pub fn authenticate(&self, username: &str, password: &str) -> AuthReply {
        self.authenticator.authenticate(username, password, &self.sessions)
    }

    // ── Request issue ────────────────────────────────────────────

    /// Issue the next catalog payload for `ticket`.
    ///
    /// Returns `""` for an unknown ticket, and `""` once per cycle when
    /// the catalog is exhausted (the cursor wraps to 0).
    pub fn next_payload(&self, ticket: &Ticket) -> String {
        let size = self.catalog.size();
        let issued = self.sessions.update(ticket, |session| {
            match session.phase(size) {
                CyclePhase::CycleComplete => {
                    session.cursor = 0;
                    None
                }
                CyclePhase::Idle | CyclePhase::Issuing { .. } => {
                    let index = session.cursor;
                    session.cursor += 1;
                    Some(index)
                }
            }
        });

        match issued {
            None => {
                debug!(ticket = %ticket, "request poll for unknown ticket");
                String::new()
            }
            Some(None) => {
                info!(ticket = %ticket, "cycle complete; cursor reset");
                String::new()
            }
            Some(Some(index)) => {
                let name = self.catalog.name_at(index).unwrap_or_default();
                info!(ticket = %ticket, request = name, index, "sending request");
                self.catalog.payload_at(index).unwrap_or_default().to_string()
            }
        }
    }

    /// Record the host context for `ticket`, then behave as
    /// [`next_payload`](Self::next_payload).
    pub fn next_payload_with(&self, ticket: &Ticket, host: &HostContext) -> String {
        self.sessions.update(ticket, |session| {
            let ext = &mut session.extensions;
            if !host.company_file.is_empty() {
                ext.insert(EXT_COMPANY_FILE.into(), host.company_file.clone());
            }
            if !host.country.is_empty() {
                ext.insert(EXT_COUNTRY.into(), host.country.clone());
            }
            ext.insert(
                EXT_QBXML_VERSION.into(),
                format!("{}.{}", host.major_version, host.minor_version),
            );
        });
        self.next_payload(ticket)
    }

    // ── Result intake ────────────────────────────────────────────

    /// Accept the client's result for the most recently issued request.
    ///
    /// Returns percent complete (`100` when the cycle is done), `0` for
    /// an unknown ticket or when nothing has been issued this cycle, and
    /// [`EXECUTION_ERROR`] when `error_code` is non-empty.
    pub fn receive_result(&self, ticket: &Ticket, raw: String, error_code: &str, message: &str) -> i32 {
        if !error_code.is_empty() {
            let detail = self.error_detail(error_code, message);
            let known = self
                .sessions
                .update(ticket, |session| session.last_error = Some(detail.clone()));
            if known.is_none() {
                return 0;
            }
            warn!(ticket = %ticket, hresult = error_code, message, "client reported execution error");
            return EXECUTION_ERROR;
        }

        let Some(cursor) = self.sessions.update(ticket, |session| session.cursor) else {
            debug!(ticket = %ticket, "result for unknown ticket");
            return 0;
        };

        let size = self.catalog.size();
        if cursor == 0 || size == 0 {
            warn!(ticket = %ticket, "result received with no request outstanding");
            return 0;
        }

        if let Some(name) = self.catalog.name_at(cursor - 1) {
            // Drops are logged and counted by the dispatcher.
            let _ = self.dispatcher.dispatch(name, raw);
        }

        let progress = percent_complete(cursor, size);
        info!(ticket = %ticket, cursor, progress, "response received");
        progress
    }

    // ── Errors & teardown ────────────────────────────────────────

    /// Log a connection error reported by the client. Always `"DONE"`.
    pub fn report_connection_error(&self, ticket: &Ticket, error_code: &str, message: &str) -> String {
        let detail = self.error_detail(error_code, message);
        self.sessions
            .update(ticket, |session| session.last_error = Some(detail.clone()));
        error!(ticket = %ticket, hresult = error_code, "connection error: {detail}");
        CONNECTION_ERROR_REPLY.to_string()
    }

    /// Most recent error for `ticket`.
    pub fn last_error(&self, ticket: &Ticket) -> String {
        let reply = match self.sessions.update(ticket, |s| s.last_error.clone()) {
            None => String::new(),
            Some(Some(recorded)) => recorded,
            Some(None) => GENERIC_ERROR.to_string(),
        };
        info!(ticket = %ticket, reply = %reply, "last error requested");
        reply
    }

    /// Forget `ticket`. Always `"OK"`, even if it was never known.
    pub fn close_session(&self, ticket: &Ticket) -> String {
        match self.sessions.remove(ticket) {
            Some(session) => info!(ticket = %ticket, username = %session.username, "session closed"),
            None => debug!(ticket = %ticket, "close for unknown ticket"),
        }
        CLOSE_REPLY.to_string()
    }

    fn error_detail(&self, error_code: &str, message: &str) -> String {
        format!("{}: {}", error_code.trim(), self.error_codes.describe(error_code, message))
    }
}

/// `cursor * 100 / size`, clamped to [`PROGRESS_DONE`]; `0` for an empty
/// catalog.
pub fn percent_complete(cursor: usize, size: usize) -> i32 {
    if size == 0 {
        return 0;
    }
    let percent = cursor.saturating_mul(100) / size;
    if percent >= PROGRESS_DONE as usize {
        PROGRESS_DONE
    } else {
        percent as i32
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::auth::{INVALID_USER, SECRET_DELIMITER, hash_credential};
    use crate::dispatch::{DispatchConfig, HandlerRegistry, ResponseHandler};
    use crate::error::ConnectorError;

    struct Recorder {
        name: &'static str,
        tx: mpsc::UnboundedSender<(&'static str, String)>,
    }

    #[async_trait]
    impl ResponseHandler for Recorder {
        async fn handle(&self, payload: String) -> Result<(), ConnectorError> {
            let _ = self.tx.send((self.name, payload));
            Ok(())
        }
    }

    fn secret() -> String {
        format!("{}{SECRET_DELIMITER}{}", hash_credential("pw"), hash_credential("user"))
    }

    fn engine_with(
        entries: &[(&'static str, &'static str)],
    ) -> (ProtocolEngine, mpsc::UnboundedReceiver<(&'static str, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = HandlerRegistry::new();
        for &(name, _) in entries {
            registry.register(name, Recorder { name, tx: tx.clone() });
        }
        let engine = ProtocolEngine::new(
            RequestCatalog::from_entries(entries.iter().copied()),
            Authenticator::new(Some(secret()), ""),
            Dispatcher::start(registry, DispatchConfig::default()),
        );
        (engine, rx)
    }

    async fn next_dispatch(
        rx: &mut mpsc::UnboundedReceiver<(&'static str, String)>,
    ) -> (&'static str, String) {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn dropped_responses_still_report_progress() {
        let mut registry = HandlerRegistry::new();
        for name in ["A", "B", "C", "D"] {
            let (tx, _rx) = mpsc::unbounded_channel();
            registry.register(name, Recorder { name, tx });
        }
        let config = DispatchConfig {
            queue_depth: 1,
            max_concurrent: 1,
            ..Default::default()
        };
        let engine = ProtocolEngine::new(
            RequestCatalog::from_entries([("A", "<a/>"), ("B", "<b/>"), ("C", "<c/>"), ("D", "<d/>")]),
            Authenticator::new(Some(secret()), ""),
            Dispatcher::start(registry, config),
        );
        let t = engine.authenticate("user", "pw").ticket;

        // No await in between: only the first response fits in the queue.
        let mut progress = Vec::new();
        for _ in 0..4 {
            engine.next_payload(&t);
            progress.push(engine.receive_result(&t, "<r/>".into(), "", ""));
        }
        assert_eq!(progress, vec![25, 50, 75, 100]);

        let stats = engine.dispatch_stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.dropped, 3);
    }

    #[tokio::test]
    async fn shutdown_dispatch_drains_then_drops() {
        let (engine, mut rx) = engine_with(&[("A", "<a/>"), ("B", "<b/>")]);
        let t = engine.authenticate("user", "pw").ticket;

        engine.next_payload(&t);
        assert_eq!(engine.receive_result(&t, "<first/>".into(), "", ""), 50);
        let stats = engine.shutdown_dispatch(Duration::from_secs(5)).await;
        assert_eq!(stats.completed, 1);
        assert_eq!(rx.try_recv().unwrap(), ("A", "<first/>".to_string()));

        engine.next_payload(&t);
        assert_eq!(engine.receive_result(&t, "<late/>".into(), "", ""), 100);
        assert_eq!(engine.dispatch_stats().dropped, 1);
    }

    #[test]
    fn percent_rules() {
        assert_eq!(percent_complete(0, 0), 0);
        assert_eq!(percent_complete(1, 2), 50);
        assert_eq!(percent_complete(1, 3), 33);
        assert_eq!(percent_complete(3, 3), PROGRESS_DONE);
        assert_eq!(percent_complete(5, 3), PROGRESS_DONE);
    }

    #[tokio::test]
    async fn two_entry_walkthrough() {
        let (engine, mut rx) = engine_with(&[("A", "<a/>"), ("B", "<b/>")]);
        let reply = engine.authenticate("user", "pw");
        assert!(reply.is_authenticated());
        let t = reply.ticket;

        assert_eq!(engine.next_payload(&t), "<a/>");
        assert_eq!(engine.receive_result(&t, "<resp/>".into(), "", ""), 50);
        assert_eq!(next_dispatch(&mut rx).await, ("A", "<resp/>".to_string()));

        assert_eq!(engine.next_payload(&t), "<b/>");
        assert_eq!(engine.receive_result(&t, "<resp2/>".into(), "", ""), PROGRESS_DONE);
        assert_eq!(next_dispatch(&mut rx).await, ("B", "<resp2/>".to_string()));

        assert_eq!(engine.next_payload(&t), "");
        assert_eq!(engine.sessions().get(&t).unwrap().cursor, 0);

        // The next cycle starts over.
        assert_eq!(engine.next_payload(&t), "<a/>");
    }

    #[tokio::test]
    async fn error_code_short_circuits() {
        let (engine, mut rx) = engine_with(&[("A", "<a/>")]);
        let t = engine.authenticate("user", "pw").ticket;
        engine.next_payload(&t);

        assert_eq!(
            engine.receive_result(&t, "<resp/>".into(), "0x80040401", "boom"),
            EXECUTION_ERROR
        );
        assert_eq!(engine.dispatch_stats().submitted, 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(engine.last_error(&t), "0x80040401: Could not access QuickBooks.");
    }

    #[tokio::test]
    async fn unknown_ticket_sentinels() {
        let (engine, _rx) = engine_with(&[("A", "<a/>")]);
        let ghost = Ticket::from("ghost");

        assert_eq!(engine.next_payload(&ghost), "");
        assert_eq!(engine.receive_result(&ghost, "x".into(), "", ""), 0);
        assert_eq!(engine.receive_result(&ghost, "x".into(), "0x1", "m"), 0);
        assert_eq!(engine.report_connection_error(&ghost, "0x1", "m"), "DONE");
        assert_eq!(engine.last_error(&ghost), "");
        assert_eq!(engine.close_session(&ghost), "OK");
        assert!(engine.sessions().is_empty());
    }

    #[tokio::test]
    async fn invalid_user_gets_no_session() {
        let (engine, _rx) = engine_with(&[("A", "<a/>")]);
        let reply = engine.authenticate("user", "wrong");
        assert_eq!(reply.company, INVALID_USER);
        assert_eq!(engine.next_payload(&reply.ticket), "");
        assert!(engine.sessions().is_empty());
    }

    #[tokio::test]
    async fn empty_catalog_never_divides_by_zero() {
        let (engine, _rx) = engine_with(&[]);
        let t = engine.authenticate("user", "pw").ticket;
        assert_eq!(engine.next_payload(&t), "");
        assert_eq!(engine.receive_result(&t, "x".into(), "", ""), 0);
        assert_eq!(engine.next_payload(&t), "");
    }

    #[tokio::test]
    async fn result_before_any_issue_is_zero() {
        let (engine, _rx) = engine_with(&[("A", "<a/>")]);
        let t = engine.authenticate("user", "pw").ticket;
        assert_eq!(engine.receive_result(&t, "x".into(), "", ""), 0);
        assert_eq!(engine.dispatch_stats().submitted, 0);
    }

    #[tokio::test]
    async fn close_then_behaves_as_unknown() {
        let (engine, _rx) = engine_with(&[("A", "<a/>")]);
        let t = engine.authenticate("user", "pw").ticket;
        engine.next_payload(&t);

        assert_eq!(engine.close_session(&t), "OK");
        assert_eq!(engine.close_session(&t), "OK");
        assert_eq!(engine.next_payload(&t), "");
        assert_eq!(engine.receive_result(&t, "x".into(), "", ""), 0);
        assert_eq!(engine.last_error(&t), "");
    }

    #[tokio::test]
    async fn connection_error_always_done() {
        let (engine, _rx) = engine_with(&[("A", "<a/>")]);
        let t = engine.authenticate("user", "pw").ticket;

        assert_eq!(engine.report_connection_error(&t, "0xBADC0DE", "raw text"), "DONE");
        assert_eq!(engine.last_error(&t), "0xBADC0DE: raw text");

        assert_eq!(engine.report_connection_error(&t, "0x80040400", "ignored"), "DONE");
        assert!(engine.last_error(&t).contains("parsing the provided XML"));
    }

    #[tokio::test]
    async fn last_error_defaults_to_generic() {
        let (engine, _rx) = engine_with(&[("A", "<a/>")]);
        let t = engine.authenticate("user", "pw").ticket;
        assert_eq!(engine.last_error(&t), GENERIC_ERROR);
    }

    #[tokio::test]
    async fn host_context_is_recorded() {
        let (engine, _rx) = engine_with(&[("A", "<a/>")]);
        let t = engine.authenticate("user", "pw").ticket;
        let host = HostContext {
            company_file: "C:\\Books\\co.qbw".into(),
            country: "US".into(),
            major_version: 13,
            minor_version: 0,
            ..Default::default()
        };

        assert_eq!(engine.next_payload_with(&t, &host), "<a/>");
        let session = engine.sessions().get(&t).unwrap();
        assert_eq!(session.extensions[EXT_COMPANY_FILE], "C:\\Books\\co.qbw");
        assert_eq!(session.extensions[EXT_COUNTRY], "US");
        assert_eq!(session.extensions[EXT_QBXML_VERSION], "13.0");
    }

    #[tokio::test]
    async fn versions() {
        let (engine, _rx) = engine_with(&[]);
        assert_eq!(engine.client_version("2.3.0.215"), CLIENT_VERSION_REPLY);
        assert!(engine.server_version().starts_with("qbwc-connector v"));
    }
}
