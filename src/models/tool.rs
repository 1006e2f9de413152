//! Tool descriptors and call outcomes exchanged with collaborators.

use serde::{Deserialize, Serialize};

/// One callable operation advertised by a server in `tools/list`.
///
/// The input schema is passed through verbatim and never interpreted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    /// Tool name used in `tools/call`.
    pub name: String,
    /// Free-form description; empty when the server omits it.
    #[serde(default)]
    pub description: String,
    /// JSON schema of the tool's arguments (`inputSchema` on the wire).
    #[serde(default, rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// Outcome of a single `tools/call` invocation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolCallResult {
    /// Tool that was invoked.
    pub tool_name: String,
    /// Whether the server produced a non-error reply.
    pub success: bool,
    /// `result` member of the reply, or the raw text of a non-JSON reply.
    pub result: Option<serde_json::Value>,
    /// Error message from a JSON-RPC error or a transport failure.
    pub error: Option<String>,
    /// Failure tag (`request_timeout`, `process_exited`, `rpc_error`, ...).
    pub error_kind: Option<String>,
    /// Raw reply line, when one was received.
    pub raw: Option<String>,
    /// Wall time spent on the call.
    pub duration_ms: u64,
}
