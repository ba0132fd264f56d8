//! # qbwc-core
//!
//! Server-side state machine for the QuickBooks Web Connector poll
//! protocol.
//!
//! This crate contains:
//! - **Catalog**: `RequestCatalog`, the ordered list of request payloads
//! - **Session**: `Ticket`, `Session`, `CyclePhase` and the shared `SessionStore`
//! - **Auth**: `Authenticator` and the two-digest `Credentials` secret
//! - **Engine**: `ProtocolEngine`, one method per remote operation
//! - **Dispatch**: `Dispatcher`, a bounded background runner for `ResponseHandler`s
//! - **Error**: `ConnectorError` and `DispatchError`, `thiserror`-based

pub mod auth;
pub mod catalog;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod error_codes;
pub mod session;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use auth::{AuthReply, Authenticator, Credentials, INVALID_USER, hash_credential};
pub use catalog::{CatalogEntry, RequestCatalog};
pub use dispatch::{
    DispatchConfig, DispatchEvent, DispatchStats, Dispatcher, HandlerRegistry, InventoryHandler,
    ResponseHandler,
};
pub use engine::{HostContext, ProtocolEngine};
pub use error::{ConnectorError, DispatchError};
pub use error_codes::ErrorCodeTable;
pub use session::{CyclePhase, Session, SessionStore, Ticket};
