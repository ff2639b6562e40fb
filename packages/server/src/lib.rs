// Tagcheck - Server
//
// HTTP boundary and CLI for the validation engine in `tagcheck_core`.
// Runs are started over HTTP and observed through server-sent events.

pub mod config;
pub mod kernel;
pub mod server;

pub use config::*;
