//! Capability negotiation enforced on both the issuing and serving side.
//!
//! Covers:
//! - callbacks refused locally by the agent when not negotiated
//! - callbacks refused by the client gate with `-32004` on the wire
//! - file callbacks served from a confined temporary directory

use std::sync::Arc;

use serde_json::json;

use acp_link::acp::ConnectionOptions;
use acp_link::demo::EchoAgent;
use acp_link::driver::{ClientProviders, ClientSide, IgnoreUpdates};
use acp_link::errors::{CAPABILITY_NOT_SUPPORTED, INVALID_PARAMS, METHOD_NOT_FOUND};
use acp_link::models::capabilities::{Capability, CapabilitySet};
use acp_link::models::content::ContentBlock;
use acp_link::models::messages::{StopReason, PROTOCOL_VERSION};
use acp_link::models::session_update::ToolCallStatus;
use acp_link::providers::LocalFileSystem;

use super::test_helpers::{error_code, local_providers, raw_pipe, ready_session, TEST_TIMEOUT};

fn fs_only(root: &std::path::Path) -> ClientProviders {
    ClientProviders::new(CapabilitySet::all())
        .with_fs(Arc::new(LocalFileSystem::confined_to(root).expect("fs root")))
}

// ── Advertisement ───────────────────────────────────────────────────────────

/// A capability is advertised only with a provider behind it.
#[test]
fn advertisement_requires_a_provider() {
    let dir = tempfile::tempdir().expect("tempdir");
    let caps = fs_only(dir.path()).capabilities();
    assert!(caps.text_files);
    assert!(!caps.terminal, "no terminal provider, no terminal capability");

    let none = ClientProviders::new(CapabilitySet::all()).capabilities();
    assert!(!none.text_files);
    assert!(none.image, "non-callback flags pass through");
}

// ── Issuing side ────────────────────────────────────────────────────────────

/// Without a negotiated terminal the agent's tool call fails locally.
#[tokio::test]
async fn unnegotiated_terminal_fails_the_tool_call() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (pair, session) = ready_session(EchoAgent::new(), &fs_only(dir.path())).await;

    let caps = pair.agent.state().capabilities().expect("negotiated");
    assert!(!caps.allows(Capability::Terminal));

    let stop = pair
        .client
        .session_prompt(&session, vec![ContentBlock::text("run echo hi")])
        .await
        .expect("prompt");
    assert_eq!(stop, StopReason::EndTurn);

    let updates = pair.updates.tool_updates();
    let last = updates.last().expect("tool updates");
    assert_eq!(last.id, "call_run_command");
    assert_eq!(last.status, ToolCallStatus::Failed);
    let error = last.error.as_deref().unwrap_or_default();
    assert!(error.contains("capability not supported"), "{error}");
}

// ── Serving side ────────────────────────────────────────────────────────────

/// The client gate answers `-32004` for a callback it did not negotiate,
/// `-32602` for bad paths and `-32601` for methods it never serves.
#[tokio::test]
async fn client_gate_rejects_on_the_wire() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut agent, read, write) = raw_pipe();
    let (client, _driver) = ClientSide::connect(
        &fs_only(dir.path()),
        Arc::new(IgnoreUpdates),
        read,
        write,
        ConnectionOptions::default(),
    )
    .expect("connect");

    let handshake = {
        let client = client.clone();
        tokio::spawn(async move { client.initialize(None).await })
    };
    let request = agent.expect_record().await;
    assert_eq!(request["method"], "initialize");
    assert_eq!(request["params"]["capabilities"]["terminal"], false);
    agent
        .send(&json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "result": {
                "protocol_version": PROTOCOL_VERSION,
                "agent_info": {"name": "raw-agent", "version": "1.0"},
                "capabilities": {"text_files": true, "terminal": true}
            }
        }))
        .await;
    tokio::time::timeout(TEST_TIMEOUT, handshake)
        .await
        .expect("handshake finished")
        .expect("join")
        .expect("initialize");

    agent
        .send(&json!({
            "jsonrpc": "2.0",
            "id": 100,
            "method": "terminal/create",
            "params": {"command": "echo", "cwd": "/"}
        }))
        .await;
    let refused = agent.expect_record().await;
    assert_eq!(refused["id"], 100);
    assert_eq!(error_code(&refused), Some(CAPABILITY_NOT_SUPPORTED));

    agent
        .send(&json!({
            "jsonrpc": "2.0",
            "id": 101,
            "method": "fs/read_text_file",
            "params": {"path": "relative.txt"}
        }))
        .await;
    let invalid = agent.expect_record().await;
    assert_eq!(error_code(&invalid), Some(INVALID_PARAMS));

    agent
        .send(&json!({"jsonrpc": "2.0", "id": 102, "method": "session/prompt", "params": {}}))
        .await;
    let unknown = agent.expect_record().await;
    assert_eq!(error_code(&unknown), Some(METHOD_NOT_FOUND));
}

// ── File callbacks ──────────────────────────────────────────────────────────

/// `read <path>` reads through the client and streams the content.
#[tokio::test]
async fn read_inside_root_succeeds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().canonicalize().expect("canonical");
    let file = root.join("greeting.txt");
    std::fs::write(&file, "hello from disk").expect("write");
    let (pair, session) = ready_session(EchoAgent::new(), &local_providers(Some(&root))).await;

    pair.client
        .session_prompt(&session, vec![ContentBlock::text(format!("read {}", file.display()))])
        .await
        .expect("prompt");

    let updates = pair.updates.tool_updates();
    let done = updates.last().expect("tool updates");
    assert_eq!(done.status, ToolCallStatus::Completed);
    assert_eq!(
        done.result.as_ref().and_then(|r| r["content"].as_str()),
        Some("hello from disk")
    );
    assert!(pair.updates.message_text().starts_with("hello from disk"));
}

/// Reads outside the confined root fail the tool call.
#[tokio::test]
async fn read_outside_root_is_denied() {
    let dir = tempfile::tempdir().expect("tempdir");
    let outside = tempfile::tempdir().expect("outside");
    let secret = outside.path().canonicalize().expect("canonical").join("secret.txt");
    std::fs::write(&secret, "top secret").expect("write");
    let (pair, session) = ready_session(EchoAgent::new(), &local_providers(Some(dir.path()))).await;

    pair.client
        .session_prompt(&session, vec![ContentBlock::text(format!("read {}", secret.display()))])
        .await
        .expect("prompt");

    let failed = pair.updates.tool_updates().pop().expect("tool update");
    assert_eq!(failed.status, ToolCallStatus::Failed);
    assert!(
        failed.error.as_deref().unwrap_or_default().contains("permission denied"),
        "{failed:?}"
    );
    assert!(!pair.updates.message_text().contains("top secret"));
}

/// Relative paths are rejected as invalid parameters.
#[tokio::test]
async fn relative_read_is_invalid_params() {
    let (pair, session) = ready_session(EchoAgent::new(), &local_providers(None)).await;

    pair.client
        .session_prompt(&session, vec![ContentBlock::text("read notes.txt")])
        .await
        .expect("prompt");

    let failed = pair.updates.tool_updates().pop().expect("tool update");
    assert_eq!(failed.status, ToolCallStatus::Failed);
    assert!(
        failed.error.as_deref().unwrap_or_default().contains("invalid params"),
        "{failed:?}"
    );
}
