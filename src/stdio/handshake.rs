//! Protocol handshake run on a freshly started transport.
//!
//! The sequence is fixed:
//!
//! 1. **`initialize`** — protocol version, empty capability set and client
//!    identity. If the attempt fails (transport error or error-shaped reply)
//!    it is retried exactly once with only `protocolVersion`, which some
//!    servers insist on.
//! 2. **`notifications/initialized`** — fire-and-forget, no `params`.
//! 3. **`tools/list`** — no `params`; the reply must carry a `result.tools`
//!    array.
//!
//! A session is registered only after all three steps succeed.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::ProtocolConfig;
use crate::models::tool::ToolDescriptor;
use crate::stdio::message::methods;
use crate::stdio::transport::{FrameTransport, Reply};
use crate::{AppError, Result};

/// Run the full handshake and return the advertised tools in server order.
///
/// # Errors
///
/// Returns `AppError::Handshake`, with the server's recent stderr attached,
/// when both `initialize` attempts fail or `tools/list` does not produce a
/// well-formed tool array.
pub async fn handshake(
    transport: &FrameTransport,
    protocol: &ProtocolConfig,
    timeout: Duration,
) -> Result<Vec<ToolDescriptor>> {
    let label = transport.label();

    if let Err(first) = initialize(transport, full_initialize_params(protocol), timeout).await {
        warn!(session = %label, error = %first, "initialize failed, retrying with reduced params");
        initialize(transport, reduced_initialize_params(protocol), timeout)
            .await
            .map_err(|second| handshake_error(transport, format!("initialize failed twice: {second}")))?;
    }
    debug!(session = %label, "handshake: initialize acknowledged");

    if let Err(err) = transport.notify(methods::INITIALIZED, None).await {
        // The server does not reply to this; a broken pipe shows up on the
        // next request instead.
        warn!(session = %label, error = %err, "handshake: initialized notification not delivered");
    }

    let reply = transport
        .request(methods::TOOLS_LIST, None, timeout)
        .await
        .map_err(|err| handshake_error(transport, format!("tools/list failed: {err}")))?;
    let tools = parse_tools_reply(&reply)
        .map_err(|err| handshake_error(transport, format!("tools/list failed: {err}")))?;

    info!(session = %label, tools = tools.len(), "handshake complete");
    Ok(tools)
}

/// Decode the `result.tools` array of a `tools/list` reply.
///
/// # Errors
///
/// Returns `AppError::Transport` for a non-JSON reply, an error-shaped reply,
/// a missing `result.tools` array, or entries that are not tool descriptors.
pub fn parse_tools_reply(reply: &Reply) -> Result<Vec<ToolDescriptor>> {
    if reply.json().is_none() {
        return Err(AppError::Transport(format!(
            "reply is not JSON: {}",
            reply.raw()
        )));
    }
    if let Some(message) = reply.error_message() {
        return Err(AppError::Transport(format!("server returned error: {message}")));
    }

    let tools = reply
        .result()
        .and_then(|result| result.get("tools"))
        .filter(|tools| tools.is_array())
        .ok_or_else(|| AppError::Transport("reply has no result.tools array".into()))?;

    serde_json::from_value(tools.clone())
        .map_err(|e| AppError::Transport(format!("malformed tool descriptor: {e}")))
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// One `initialize` attempt. A non-JSON reply counts as acknowledgement.
async fn initialize(transport: &FrameTransport, params: Value, timeout: Duration) -> Result<()> {
    let reply = transport
        .request(methods::INITIALIZE, Some(params), timeout)
        .await?;
    match reply.error_message() {
        Some(message) => Err(AppError::Transport(format!("server returned error: {message}"))),
        None => Ok(()),
    }
}

fn full_initialize_params(protocol: &ProtocolConfig) -> Value {
    json!({
        "protocolVersion": protocol.version,
        "capabilities": {},
        "clientInfo": {
            "name": protocol.client_name,
            "version": protocol.client_version,
        }
    })
}

fn reduced_initialize_params(protocol: &ProtocolConfig) -> Value {
    json!({ "protocolVersion": protocol.version })
}

fn handshake_error(transport: &FrameTransport, message: String) -> AppError {
    AppError::Handshake {
        message: format!("{}: {message}", transport.label()),
        stderr: transport.stderr_tail(),
    }
}
