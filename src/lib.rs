#![forbid(unsafe_code)]

//! Launch stdio tool servers through `npx`/`uvx`, discover their tools with
//! the JSON-RPC handshake, and invoke them.

pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod platform;
pub mod stdio;

pub use config::DeployerConfig;
pub use errors::{AppError, Result};
