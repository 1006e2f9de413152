//! End-to-end deployment tests: runtime selection, launch, handshake,
//! registration, tool calls and cleanup against `sh` server doubles.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use mcp_deployer::models::launch::LaunchSpec;
use mcp_deployer::models::runtime::RuntimeKind;
use mcp_deployer::orchestrator::deployer::Deployer;
use mcp_deployer::orchestrator::registry::SessionRegistry;
use mcp_deployer::AppError;

use super::test_helpers::{
    test_config, ScriptedPlatform, ECHO_SERVER, FAKE_NPX, FAKE_UVX, REFUSES_EVERYTHING,
    REJECTS_ARGUMENTS,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn deployer(platform: &Arc<ScriptedPlatform>) -> Deployer<ScriptedPlatform> {
    Deployer::new(
        Arc::new(test_config()),
        Arc::clone(platform),
        Arc::new(SessionRegistry::new()),
    )
}

// ── Deploy ───────────────────────────────────────────────────────────────────

/// A cooperative server ends up registered with its advertised tools.
#[tokio::test]
async fn deploy_registers_handshaken_session() {
    let platform = Arc::new(ScriptedPlatform::new(&[ECHO_SERVER]));
    let deployer = deployer(&platform);

    let deployed = deployer
        .deploy(&LaunchSpec::package("echo-server", TIMEOUT), None)
        .await
        .expect("deploy succeeds");

    assert!(deployed.session_id.starts_with("mcp_"));
    assert_eq!(deployed.label, "echo-server");
    assert_eq!(deployed.argv, vec![FAKE_NPX, "-y", "echo-server"]);
    assert_eq!(deployed.attempts, 1);
    assert_eq!(deployed.tools.len(), 1);
    assert_eq!(deployed.tools[0].name, "echo");
    assert_eq!(deployed.tools[0].description, "d");
    assert_eq!(deployer.registry().len().await, 1);

    deployer.cleanup_all().await;
}

/// A handshake failure terminates the process and registers nothing.
#[tokio::test]
async fn handshake_failure_registers_nothing() {
    let platform = Arc::new(ScriptedPlatform::new(&[REFUSES_EVERYTHING]));
    let deployer = deployer(&platform);

    let err = deployer
        .deploy(&LaunchSpec::package("refuser", TIMEOUT), None)
        .await
        .expect_err("handshake must fail");

    assert_eq!(err.kind(), "handshake_failure");
    assert!(deployer.registry().is_empty().await);
}

/// A missing runner fails before anything is spawned.
#[tokio::test]
async fn missing_runtime_spawns_nothing() {
    let platform = Arc::new(ScriptedPlatform::without_runners(&[ECHO_SERVER]));
    let deployer = deployer(&platform);

    let err = deployer
        .deploy(&LaunchSpec::package("echo-server", TIMEOUT), Some(RuntimeKind::NodeRunner))
        .await
        .expect_err("no runtime installed");

    assert!(matches!(err, AppError::RuntimeUnavailable(_)), "got: {err:?}");
    assert!(platform.spawned().is_empty());
}

/// A blank spec is rejected before runtime detection.
#[tokio::test]
async fn blank_spec_is_a_config_error() {
    let platform = Arc::new(ScriptedPlatform::new(&[ECHO_SERVER]));
    let deployer = deployer(&platform);

    let err = deployer
        .deploy(&LaunchSpec::command("   ", TIMEOUT), None)
        .await
        .expect_err("blank spec");
    assert_eq!(err.kind(), "config");
    assert!(platform.spawned().is_empty());
}

/// The runner named by an explicit command wins over the caller's hint.
#[tokio::test]
async fn command_runner_overrides_hint() {
    let platform = Arc::new(ScriptedPlatform::new(&[ECHO_SERVER]));
    let deployer = deployer(&platform);

    let deployed = deployer
        .deploy(
            &LaunchSpec::command("uvx some-python-server", TIMEOUT),
            Some(RuntimeKind::NodeRunner),
        )
        .await
        .expect("deploy succeeds");

    assert_eq!(deployed.argv, vec![FAKE_UVX, "some-python-server"]);
    assert_eq!(platform.spawned()[0][0], FAKE_UVX);

    deployer.cleanup_all().await;
}

/// The hint picks the runner for a bare package.
#[tokio::test]
async fn hint_selects_runtime_for_package() {
    let platform = Arc::new(ScriptedPlatform::new(&[ECHO_SERVER]));
    let deployer = deployer(&platform);

    let deployed = deployer
        .deploy(
            &LaunchSpec::package("some-python-server", TIMEOUT),
            Some(RuntimeKind::PythonRunner),
        )
        .await
        .expect("deploy succeeds");

    assert_eq!(deployed.argv, vec![FAKE_UVX, "some-python-server"]);
    deployer.cleanup_all().await;
}

/// Both launch attempts failing surfaces as one launch error.
#[tokio::test]
async fn failed_fallback_is_a_launch_error() {
    let platform = Arc::new(ScriptedPlatform::new(&[REJECTS_ARGUMENTS]));
    let deployer = deployer(&platform);

    let err = deployer
        .deploy(&LaunchSpec::package("picky", TIMEOUT), None)
        .await
        .expect_err("both attempts exit");

    assert_eq!(platform.spawned().len(), 2);
    assert_eq!(err.kind(), "launch_failure");
    assert!(
        err.diagnostic().is_some_and(|d| d.contains("unexpected argument")),
        "got: {err:?}"
    );
    assert!(deployer.registry().is_empty().await);
}

/// The fallback's surviving argv is reported on the deployed session.
#[tokio::test]
async fn successful_fallback_reports_two_attempts() {
    let platform = Arc::new(ScriptedPlatform::new(&[REJECTS_ARGUMENTS, ECHO_SERVER]));
    let deployer = deployer(&platform);

    let deployed = deployer
        .deploy(&LaunchSpec::package("picky", TIMEOUT), None)
        .await
        .expect("fallback deploy succeeds");

    assert_eq!(deployed.attempts, 2);
    assert_eq!(deployed.tools[0].name, "echo");
    deployer.cleanup_all().await;
}

// ── Tool calls ───────────────────────────────────────────────────────────────

/// A successful call returns the reply's `result` member.
#[tokio::test]
async fn call_tool_returns_result() {
    let platform = Arc::new(ScriptedPlatform::new(&[ECHO_SERVER]));
    let deployer = deployer(&platform);
    let id = deployer
        .deploy(&LaunchSpec::package("echo-server", TIMEOUT), None)
        .await
        .expect("deploy")
        .session_id;

    let result = deployer
        .call_tool(&id, "echo", json!({"text": "ping"}), TIMEOUT)
        .await
        .expect("known session");

    assert!(result.success, "got: {result:?}");
    assert_eq!(result.tool_name, "echo");
    assert_eq!(result.result, Some(json!({"content": [{"type": "text", "text": "pong"}]})));
    assert!(result.error.is_none());
    assert!(result.raw.is_some());

    deployer.cleanup_all().await;
}

/// A timed-out call is reported in the result; the session survives and
/// answers the next call.
#[tokio::test]
async fn call_tool_timeout_keeps_session() {
    let platform = Arc::new(ScriptedPlatform::new(&[ECHO_SERVER]));
    let deployer = deployer(&platform);
    let id = deployer
        .deploy(&LaunchSpec::package("echo-server", TIMEOUT), None)
        .await
        .expect("deploy")
        .session_id;

    let slow = deployer
        .call_tool(&id, "slow", json!({}), Duration::from_millis(300))
        .await
        .expect("known session");
    assert!(!slow.success);
    assert_eq!(slow.error_kind.as_deref(), Some("request_timeout"));

    let session = deployer.registry().lookup(&id).await.expect("still registered");
    assert!(session.process().is_running());

    let next = deployer
        .call_tool(&id, "echo", json!({}), TIMEOUT)
        .await
        .expect("known session");
    assert!(next.success, "got: {next:?}");

    deployer.cleanup_all().await;
}

/// `list_tools` asks the live server again.
#[tokio::test]
async fn list_tools_queries_live_session() {
    let platform = Arc::new(ScriptedPlatform::new(&[ECHO_SERVER]));
    let deployer = deployer(&platform);
    let id = deployer
        .deploy(&LaunchSpec::package("echo-server", TIMEOUT), None)
        .await
        .expect("deploy")
        .session_id;

    let tools = deployer.list_tools(&id, TIMEOUT).await.expect("tool list");
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");

    deployer.cleanup_all().await;
}

// ── Cleanup ──────────────────────────────────────────────────────────────────

/// Cleanup removes the session; later calls report an unknown session.
#[tokio::test]
async fn cleanup_removes_session() {
    let platform = Arc::new(ScriptedPlatform::new(&[ECHO_SERVER]));
    let deployer = deployer(&platform);
    let id = deployer
        .deploy(&LaunchSpec::package("echo-server", TIMEOUT), None)
        .await
        .expect("deploy")
        .session_id;

    assert!(deployer.cleanup(&id).await);
    assert!(!deployer.cleanup(&id).await, "second cleanup is a no-op");

    let err = deployer
        .call_tool(&id, "echo", json!({}), TIMEOUT)
        .await
        .expect_err("session is gone");
    assert!(matches!(err, AppError::NotFound(_)), "got: {err:?}");

    let err = deployer
        .list_tools(&id, TIMEOUT)
        .await
        .expect_err("session is gone");
    assert_eq!(err.kind(), "unknown_session");
}

/// Runtime detection is cached after the first probe.
#[tokio::test]
async fn runtimes_are_detected_once_and_cached() {
    let platform = Arc::new(ScriptedPlatform::new(&[ECHO_SERVER]));
    let deployer = deployer(&platform);

    let first = deployer.detect_runtimes().await;
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|runtime| runtime.available));
    assert_eq!(first[0].version.as_deref(), Some("0.0.0-test"));

    let second = deployer.detect_runtimes().await;
    assert_eq!(first, second);
}
