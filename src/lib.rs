//! GoBox daemon library.
//!
//! A browser-accessible sandboxed shell service: each connecting client is
//! bound to a fingerprint, which maps to a persistent Linux container. The
//! session manager keeps a container running for as long as at least one
//! client is attached, and for a short grace period after the last one
//! disconnects so a flaky client can reconnect without a cold restart.

pub mod config;
pub mod db;
pub mod driver;
pub mod error;
pub mod reaper;
pub mod router;
pub mod session;

pub use config::Configuration;
pub use db::Database;
pub use session::SessionManager;
