//! The HTTP server shell around `bridge-core`: configuration, the error
//! envelope, and the request handlers. Kept as a library so both the
//! `bridge-gateway` server binary and the offline `bridge-cli` binary share
//! the same handler/config code.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod logging;
