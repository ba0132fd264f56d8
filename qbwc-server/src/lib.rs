//! # qbwc-server — QuickBooks Web Connector endpoint
//!
//! Hosts a [`ProtocolEngine`](qbwc_core::ProtocolEngine) behind a single
//! SOAP 1.1 endpoint that the Web Connector polls.
//!
//! ## Modules
//!
//! - **config**: TOML configuration with environment overrides.
//! - **soap**: envelope parsing and response rendering for the eight
//!   remote operations.
//! - **service**: axum router, idle-session reaper, graceful shutdown.

pub mod config;
pub mod service;
pub mod soap;
