//! Newline-delimited JSON-RPC over a child process's stdio.
//!
//! - [`codec`] — byte-stream to frame decoding.
//! - [`reader`] — background stdout reader and stderr drain.
//! - [`transport`] — lock-guarded request/response exchange.
//! - [`handshake`] — `initialize` → `notifications/initialized` → `tools/list`.

pub mod codec;
pub mod handshake;
pub mod message;
pub mod reader;
pub mod transport;
