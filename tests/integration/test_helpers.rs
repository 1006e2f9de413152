//! Shared helpers for transport, launcher and deployer integration tests.
//!
//! Two kinds of server doubles are provided:
//! - an in-memory server over `tokio::io::duplex` pipes, driven by a
//!   closure that maps each received frame to an optional reply line;
//! - (Unix) a [`ScriptedPlatform`] that spawns real `sh -c` processes,
//!   records every argv it was asked to launch, and reports fake runner
//!   paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;

use mcp_deployer::stdio::transport::{FrameTransport, ProcessStatus, TransportOptions};
use mcp_deployer::DeployerConfig;

/// Pipe capacity of the in-memory stdio streams.
const PIPE_BYTES: usize = 64 * 1024;

// ── Process status double ────────────────────────────────────────────────────

/// Liveness flag standing in for a real child process.
#[derive(Debug, Default)]
pub struct FakeStatus {
    exited: AtomicBool,
}

impl FakeStatus {
    /// A process that is still running.
    pub fn running() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Flip the process to exited.
    pub fn mark_exited(&self) {
        self.exited.store(true, Ordering::SeqCst);
    }
}

impl ProcessStatus for FakeStatus {
    fn exit_description(&self) -> Option<String> {
        self.exited
            .load(Ordering::SeqCst)
            .then(|| "process exited (fake)".to_owned())
    }
}

// ── In-memory server ─────────────────────────────────────────────────────────

/// Server side of the in-memory stdio pipes.
pub struct ServerEnd {
    /// What the transport wrote to the server's stdin.
    pub stdin: BufReader<DuplexStream>,
    /// Lines written here arrive on the transport's stdout reader.
    pub stdout: DuplexStream,
    /// Lines written here arrive on the transport's stderr drain.
    pub stderr: DuplexStream,
}

impl ServerEnd {
    /// Write one line to stdout.
    pub async fn send_line(&mut self, line: &str) {
        self.stdout
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("write server stdout");
        self.stdout.flush().await.expect("flush server stdout");
    }

    /// Write one line to stderr.
    pub async fn send_stderr(&mut self, line: &str) {
        self.stderr
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("write server stderr");
    }

    /// Read the next frame the transport wrote, decoded as JSON.
    pub async fn next_frame(&mut self) -> Option<Value> {
        let mut line = String::new();
        let n = self
            .stdin
            .read_line(&mut line)
            .await
            .expect("read server stdin");
        if n == 0 {
            return None;
        }
        Some(serde_json::from_str(&line).expect("transport must write one JSON value per line"))
    }
}

/// Start a transport over in-memory pipes.
pub fn duplex_transport(status: Arc<FakeStatus>) -> (FrameTransport, ServerEnd) {
    let (client_stdin, server_stdin) = tokio::io::duplex(PIPE_BYTES);
    let (server_stdout, client_stdout) = tokio::io::duplex(PIPE_BYTES);
    let (server_stderr, client_stderr) = tokio::io::duplex(PIPE_BYTES);

    let transport = FrameTransport::start(
        "test-server",
        client_stdin,
        client_stdout,
        client_stderr,
        status,
        &TransportOptions::default(),
    );
    let server = ServerEnd {
        stdin: BufReader::new(server_stdin),
        stdout: server_stdout,
        stderr: server_stderr,
    };
    (transport, server)
}

/// Frames received by a [`serve`] task, in arrival order.
pub type Received = Arc<Mutex<Vec<Value>>>;

/// Answer every received frame with `responder`'s reply, if any, until the
/// transport closes its stdin.
pub fn serve<F>(mut server: ServerEnd, mut responder: F) -> (Received, JoinHandle<()>)
where
    F: FnMut(&Value) -> Option<String> + Send + 'static,
{
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&received);
    let handle = tokio::spawn(async move {
        while let Some(frame) = server.next_frame().await {
            log.lock().unwrap().push(frame.clone());
            if let Some(reply) = responder(&frame) {
                server.send_line(&reply).await;
            }
        }
    });
    (received, handle)
}

/// Method name of a received frame.
pub fn method(frame: &Value) -> &str {
    frame["method"].as_str().unwrap_or_default()
}

/// A JSON-RPC success reply echoing `frame`'s id.
pub fn ok_reply(frame: &Value, result: &Value) -> String {
    serde_json::json!({"jsonrpc": "2.0", "id": frame["id"], "result": result}).to_string()
}

/// A JSON-RPC error reply echoing `frame`'s id.
pub fn error_reply(frame: &Value, message: &str) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": frame["id"],
        "error": {"code": -32602, "message": message}
    })
    .to_string()
}

// ── Configuration ────────────────────────────────────────────────────────────

/// Defaults with short grace periods so process tests stay fast.
pub fn test_config() -> DeployerConfig {
    DeployerConfig::from_toml_str(
        r"
[timeouts]
request_seconds = 5
startup_grace_ms = 300
terminate_grace_seconds = 2
version_probe_seconds = 1
",
    )
    .expect("valid test config")
}

// ── Real process doubles (Unix) ──────────────────────────────────────────────

#[cfg(unix)]
pub use process::*;

#[cfg(unix)]
mod process {
    use std::collections::HashMap;
    use std::future::Future;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::pin::Pin;
    use std::process::Stdio;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::process::{Child, Command};

    use mcp_deployer::orchestrator::process::ProcessHandle;
    use mcp_deployer::platform::PlatformOps;
    use mcp_deployer::stdio::transport::{FrameTransport, ProcessStatus, TransportOptions};

    /// Fake location reported for `npx`.
    pub const FAKE_NPX: &str = "/opt/fake/bin/npx";
    /// Fake location reported for `uvx`.
    pub const FAKE_UVX: &str = "/opt/fake/bin/uvx";

    /// Line-oriented MCP server double: answers `initialize`, `tools/list`
    /// and `tools/call`, stays silent for the tool named `slow`, and ignores
    /// notifications.
    pub const ECHO_SERVER: &str = r#"
echo "fake server starting" >&2
while IFS= read -r line; do
  case "$line" in
    *'"method":"initialize"'*)
      echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"0"}}}' ;;
    *'"method":"tools/list"'*)
      echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"d"}]}}' ;;
    *'"name":"slow"'*)
      : ;;
    *'"method":"tools/call"'*)
      echo '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"pong"}]}}' ;;
  esac
done
"#;

    /// Exits at once complaining about its arguments.
    pub const REJECTS_ARGUMENTS: &str =
        r#"echo "error: unexpected argument '--stdio' found" >&2; exit 2"#;

    /// Exits at once with an unrelated error.
    pub const CRASHES: &str = r#"echo "Error: Cannot find module 'express'" >&2; exit 1"#;

    /// Answers every frame with a JSON-RPC error.
    pub const REFUSES_EVERYTHING: &str = r#"
echo "refusing all requests" >&2
while IFS= read -r line; do
  echo '{"jsonrpc":"2.0","id":0,"error":{"code":-32600,"message":"nope"}}'
done
"#;

    /// Keeps stdout open, reads stdin forever and never replies.
    pub const SILENT: &str = "while IFS= read -r _; do :; done";

    /// Platform double that runs `sh -c <script>` for each spawn.
    ///
    /// Scripts are consumed in order; the last one is reused once the list
    /// runs out.
    pub struct ScriptedPlatform {
        runners: HashMap<&'static str, PathBuf>,
        scripts: Vec<String>,
        spawned: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedPlatform {
        /// Both runners installed.
        pub fn new(scripts: &[&str]) -> Self {
            Self {
                runners: HashMap::from([
                    ("npx", PathBuf::from(FAKE_NPX)),
                    ("uvx", PathBuf::from(FAKE_UVX)),
                ]),
                scripts: scripts.iter().map(|s| (*s).to_owned()).collect(),
                spawned: Mutex::new(Vec::new()),
            }
        }

        /// No runner installed.
        pub fn without_runners(scripts: &[&str]) -> Self {
            Self {
                runners: HashMap::new(),
                ..Self::new(scripts)
            }
        }

        /// Every argv passed to `spawn`, in call order.
        pub fn spawned(&self) -> Vec<Vec<String>> {
            self.spawned.lock().unwrap().clone()
        }
    }

    impl PlatformOps for ScriptedPlatform {
        fn which(&self, program: &str) -> Option<PathBuf> {
            self.runners.get(program).cloned()
        }

        fn spawn(&self, argv: &[String]) -> io::Result<Child> {
            let attempt = {
                let mut spawned = self.spawned.lock().unwrap();
                spawned.push(argv.to_vec());
                spawned.len() - 1
            };
            let script = self
                .scripts
                .get(attempt)
                .or_else(|| self.scripts.last())
                .expect("at least one script");
            spawn_sh(script)
        }

        fn probe_version<'a>(
            &'a self,
            _executable: &'a Path,
            _timeout: Duration,
        ) -> Pin<Box<dyn Future<Output = io::Result<Option<String>>> + Send + 'a>> {
            Box::pin(async { Ok(Some("0.0.0-test".to_owned())) })
        }
    }

    /// Spawn `sh -c script` with piped stdio.
    pub fn spawn_sh(script: &str) -> io::Result<Child> {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }

    /// Wrap a real `sh` process in a handle and a started transport.
    pub fn process_transport(script: &str) -> (Arc<ProcessHandle>, FrameTransport) {
        let mut child = spawn_sh(script).expect("spawn sh");
        let stdin = child.stdin.take().expect("stdin piped");
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let process = Arc::new(ProcessHandle::new("sh-double", child));
        let status: Arc<dyn ProcessStatus> = process.clone();
        let transport = FrameTransport::start(
            "sh-double",
            stdin,
            stdout,
            stderr,
            status,
            &TransportOptions::default(),
        );
        (process, transport)
    }
}
