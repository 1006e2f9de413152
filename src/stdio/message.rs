//! JSON-RPC 2.0 envelopes written to a server's stdin.

use serde::Serialize;
use serde_json::Value;

/// JSON-RPC protocol version written into every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method names used by this crate.
pub mod methods {
    /// Capability negotiation request.
    pub const INITIALIZE: &str = "initialize";
    /// Readiness notification sent after a successful `initialize`.
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Tool enumeration request.
    pub const TOOLS_LIST: &str = "tools/list";
    /// Tool invocation request.
    pub const TOOLS_CALL: &str = "tools/call";
}

/// JSON-RPC request: expects exactly one reply line.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a> {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Numeric request id.
    pub id: u64,
    /// Method name.
    pub method: &'a str,
    /// Parameters; omitted from the wire when `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> JsonRpcRequest<'a> {
    /// Build a request envelope.
    #[must_use]
    pub fn new(id: u64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

/// JSON-RPC notification: no `id`, no reply.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification<'a> {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Method name.
    pub method: &'a str,
    /// Parameters; omitted from the wire when `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> JsonRpcNotification<'a> {
    /// Build a notification envelope.
    #[must_use]
    pub fn new(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}
