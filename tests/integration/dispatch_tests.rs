//! Wire-level dispatch tests against the agent role.
//!
//! A raw NDJSON peer drives the demo agent directly so every error code,
//! id echo and fatal fault can be asserted on the exact records exchanged.

use std::time::Duration;

use serde_json::{json, Value};

use acp_link::acp::ConnectionOptions;
use acp_link::demo::EchoAgent;
use acp_link::errors::{INVALID_PARAMS, INVALID_STATE, METHOD_NOT_FOUND, PARSE_ERROR};
use acp_link::AppError;

use super::test_helpers::{error_code, raw_agent, raw_initialize, RawPeer, TEST_TIMEOUT};

async fn initialized_peer(agent: EchoAgent) -> RawPeer {
    let (mut peer, _conn, _driver) = raw_agent(agent, ConnectionOptions::default());
    peer.send(&raw_initialize(1, json!({}))).await;
    let response = peer.next_response().await;
    assert!(response.get("result").is_some(), "initialize failed: {response}");
    peer
}

// ── Routing errors ──────────────────────────────────────────────────────────

/// Unknown methods are refused before the phase gate, echoing the id.
#[tokio::test]
async fn unknown_method_is_method_not_found() {
    let (mut peer, _conn, _driver) = raw_agent(EchoAgent::new(), ConnectionOptions::default());

    peer.send(&json!({"jsonrpc": "2.0", "id": 1, "method": "foo/bar"}))
        .await;
    let response = peer.expect_record().await;

    assert_eq!(response["jsonrpc"], "2.0");
    assert_eq!(response["id"], 1);
    assert_eq!(error_code(&response), Some(METHOD_NOT_FOUND));
}

/// The agent does not serve client callbacks.
#[tokio::test]
async fn client_callback_sent_to_agent_is_method_not_found() {
    let mut peer = initialized_peer(EchoAgent::new()).await;

    peer.send(&json!({
        "jsonrpc": "2.0",
        "id": "cb-1",
        "method": "fs/read_text_file",
        "params": {"path": "/etc/hostname"}
    }))
    .await;
    let response = peer.next_response().await;

    assert_eq!(response["id"], "cb-1", "string ids are echoed verbatim");
    assert_eq!(error_code(&response), Some(METHOD_NOT_FOUND));
}

/// Session methods before `initialize` are out of sequence.
#[tokio::test]
async fn session_new_before_initialize_is_invalid_state() {
    let (mut peer, _conn, _driver) = raw_agent(EchoAgent::new(), ConnectionOptions::default());

    peer.send(&json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "session/new",
        "params": {"session_id": "s1"}
    }))
    .await;
    let response = peer.expect_record().await;

    assert_eq!(error_code(&response), Some(INVALID_STATE));
}

/// Parameters that do not decode are invalid params.
#[tokio::test]
async fn malformed_params_are_invalid_params() {
    let mut peer = initialized_peer(EchoAgent::new()).await;

    peer.send(&json!({"jsonrpc": "2.0", "id": 2, "method": "session/new", "params": {}}))
        .await;
    let response = peer.next_response().await;

    assert_eq!(response["id"], 2);
    assert_eq!(error_code(&response), Some(INVALID_PARAMS));
}

// ── Handshake ───────────────────────────────────────────────────────────────

/// `initialize` answers with the agent's identity and runs only once.
#[tokio::test]
async fn initialize_answers_once() {
    let (mut peer, conn, _driver) = raw_agent(EchoAgent::new(), ConnectionOptions::default());

    peer.send(&raw_initialize(1, json!({"text_files": true}))).await;
    let first = peer.expect_record().await;
    assert_eq!(first["result"]["agent_info"]["name"], "acp-link");
    assert_eq!(first["result"]["capabilities"]["streaming"], true);
    assert!(conn.state().is_initialized());

    peer.send(&raw_initialize(2, json!({}))).await;
    let second = peer.expect_record().await;
    assert_eq!(error_code(&second), Some(INVALID_STATE));
}

/// An incompatible version is refused and the handshake can be retried.
#[tokio::test]
async fn incompatible_version_can_retry() {
    let (mut peer, conn, _driver) = raw_agent(EchoAgent::new(), ConnectionOptions::default());

    let mut bad = raw_initialize(1, json!({}));
    bad["params"]["protocol_version"] = json!("1999.0");
    peer.send(&bad).await;
    let refused = peer.expect_record().await;
    assert_eq!(error_code(&refused), Some(INVALID_PARAMS));
    assert!(!conn.state().is_initialized());

    peer.send(&raw_initialize(2, json!({}))).await;
    let accepted = peer.expect_record().await;
    assert!(accepted.get("result").is_some(), "retry failed: {accepted}");
}

// ── Responses and turns ─────────────────────────────────────────────────────

/// A response nobody is waiting for is dropped without harm.
#[tokio::test]
async fn stale_response_is_ignored() {
    let mut peer = initialized_peer(EchoAgent::new()).await;

    peer.send(&json!({"jsonrpc": "2.0", "id": 42, "result": null}))
        .await;
    peer.send(&json!({
        "jsonrpc": "2.0",
        "id": 3,
        "method": "session/new",
        "params": {"session_id": "s1"}
    }))
    .await;
    let response = peer.next_response().await;

    assert_eq!(response["id"], 3);
    assert_eq!(response["result"], json!({"session_id": "s1"}));
}

/// A second prompt while one streams is refused; cancel ends the first
/// and no update of it follows the cancel acknowledgement.
#[tokio::test]
async fn concurrent_prompt_is_invalid_state_and_cancel_is_final() {
    let agent = EchoAgent::new().with_chunk_delay(Duration::from_millis(50));
    let mut peer = initialized_peer(agent).await;

    peer.send(&json!({"jsonrpc": "2.0", "id": 2, "method": "session/new", "params": {"session_id": "s1"}}))
        .await;
    assert!(peer.next_response().await.get("result").is_some());

    let words = vec!["word"; 200].join(" ");
    peer.send(&json!({
        "jsonrpc": "2.0",
        "id": 3,
        "method": "session/prompt",
        "params": {"session_id": "s1", "content": [{"type": "text", "text": words}]}
    }))
    .await;
    let first_update = peer.expect_record().await;
    assert_eq!(first_update["method"], "session/update");

    peer.send(&json!({
        "jsonrpc": "2.0",
        "id": 4,
        "method": "session/prompt",
        "params": {"session_id": "s1", "content": [{"type": "text", "text": "again"}]}
    }))
    .await;
    let refused = peer.next_response().await;
    assert_eq!(refused["id"], 4);
    assert_eq!(error_code(&refused), Some(INVALID_STATE));

    peer.send(&json!({"jsonrpc": "2.0", "id": 5, "method": "session/cancel", "params": {"session_id": "s1"}}))
        .await;

    let mut prompt_result: Option<Value> = None;
    let mut cancel_seen = false;
    while prompt_result.is_none() || !cancel_seen {
        let record = peer.expect_record().await;
        if record.get("method").is_some() {
            assert!(!cancel_seen, "update after cancel acknowledgement: {record}");
            continue;
        }
        match record["id"].as_i64() {
            Some(3) => prompt_result = Some(record),
            Some(5) => {
                assert_eq!(record["result"], Value::Null);
                cancel_seen = true;
            }
            other => panic!("unexpected response id {other:?}: {record}"),
        }
    }
    let prompt_result = prompt_result.expect("prompt response");
    assert_eq!(prompt_result["result"]["stop_reason"], "cancelled");
}

/// A cancel pipelined behind its prompt in the same write still cancels
/// the turn, because admission runs in wire order.
#[tokio::test]
async fn pipelined_cancel_notification_cancels_turn() {
    let agent = EchoAgent::new().with_chunk_delay(Duration::from_millis(50));
    let mut peer = initialized_peer(agent).await;

    peer.send(&json!({"jsonrpc": "2.0", "id": 2, "method": "session/new", "params": {"session_id": "s1"}}))
        .await;
    assert!(peer.next_response().await.get("result").is_some());

    let words = vec!["word"; 20].join(" ");
    let prompt = json!({
        "jsonrpc": "2.0",
        "id": 3,
        "method": "session/prompt",
        "params": {"session_id": "s1", "content": [{"type": "text", "text": words}]}
    });
    let cancel = json!({"jsonrpc": "2.0", "method": "session/cancel", "params": {"session_id": "s1"}});
    peer.send_line(&format!("{prompt}\n{cancel}")).await;

    let mut message_chunks = 0;
    let response = loop {
        let record = peer.expect_record().await;
        if record.get("method").is_none() {
            break record;
        }
        assert_ne!(record["params"]["type"], "done", "turn ran to completion: {record}");
        if record["params"]["type"] == "agent_message_chunk" {
            message_chunks += 1;
        }
    };
    assert_eq!(response["id"], 3);
    assert_eq!(response["result"]["stop_reason"], "cancelled", "{response}");
    assert_eq!(message_chunks, 0);

    // The session is usable again right away.
    peer.send(&json!({
        "jsonrpc": "2.0",
        "id": 4,
        "method": "session/prompt",
        "params": {"session_id": "s1", "content": [{"type": "text", "text": "hi"}]}
    }))
    .await;
    let again = peer.next_response().await;
    assert_eq!(again["result"]["stop_reason"], "end_turn", "{again}");
}

/// The request form of cancel is ordered the same way.
#[tokio::test]
async fn pipelined_cancel_request_cancels_turn() {
    let agent = EchoAgent::new().with_chunk_delay(Duration::from_millis(50));
    let mut peer = initialized_peer(agent).await;

    peer.send(&json!({"jsonrpc": "2.0", "id": 2, "method": "session/new", "params": {"session_id": "s1"}}))
        .await;
    assert!(peer.next_response().await.get("result").is_some());

    let words = vec!["word"; 20].join(" ");
    let prompt = json!({
        "jsonrpc": "2.0",
        "id": 3,
        "method": "session/prompt",
        "params": {"session_id": "s1", "content": [{"type": "text", "text": words}]}
    });
    let cancel = json!({"jsonrpc": "2.0", "id": 4, "method": "session/cancel", "params": {"session_id": "s1"}});
    peer.send_line(&format!("{prompt}\n{cancel}")).await;

    let mut responses = Vec::new();
    while responses.len() < 2 {
        let record = peer.expect_record().await;
        if record.get("method").is_none() {
            responses.push(record);
        }
    }
    let prompt_response = responses
        .iter()
        .find(|r| r["id"] == 3)
        .expect("prompt response");
    assert_eq!(prompt_response["result"]["stop_reason"], "cancelled");
    let cancel_response = responses
        .iter()
        .find(|r| r["id"] == 4)
        .expect("cancel response");
    assert_eq!(cancel_response["result"], Value::Null);
}

// ── Fatal faults ────────────────────────────────────────────────────────────

/// Malformed JSON gets a parse error with a null id, then the connection
/// is torn down.
#[tokio::test]
async fn malformed_json_is_fatal() {
    let (mut peer, conn, driver) = raw_agent(EchoAgent::new(), ConnectionOptions::default());

    peer.send_line("{not json").await;
    let response = peer.expect_record().await;
    assert_eq!(response["id"], Value::Null);
    assert_eq!(error_code(&response), Some(PARSE_ERROR));

    assert!(peer.recv().await.is_none(), "connection must close after a parse fault");
    let outcome = tokio::time::timeout(TEST_TIMEOUT, driver)
        .await
        .expect("driver finished")
        .expect("join");
    assert!(matches!(outcome, Err(AppError::ParseError(_))), "{outcome:?}");
    assert!(conn.is_closed());
}

/// An unclassifiable envelope still echoes its id when one is readable.
#[tokio::test]
async fn ambiguous_envelope_echoes_salvaged_id() {
    let (mut peer, _conn, _driver) = raw_agent(EchoAgent::new(), ConnectionOptions::default());

    peer.send(&json!({"jsonrpc": "2.0", "id": 9, "result": 1, "error": {"code": 1, "message": "x"}}))
        .await;
    let response = peer.expect_record().await;

    assert_eq!(response["id"], 9);
    assert_eq!(error_code(&response), Some(PARSE_ERROR));
}

/// Records over the size limit are reported and end the connection.
#[tokio::test]
async fn oversized_record_is_fatal() {
    let options = ConnectionOptions {
        max_line_bytes: 256,
        ..ConnectionOptions::default()
    };
    let (mut peer, _conn, driver) = raw_agent(EchoAgent::new(), options);

    let padding = "x".repeat(1024);
    peer.send(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {"pad": padding}}))
        .await;
    let response = peer.expect_record().await;

    assert_eq!(response["id"], Value::Null);
    assert_eq!(error_code(&response), Some(PARSE_ERROR));
    let outcome = tokio::time::timeout(TEST_TIMEOUT, driver)
        .await
        .expect("driver finished")
        .expect("join");
    assert!(matches!(outcome, Err(AppError::Protocol(_))), "{outcome:?}");
}

/// End-of-stream from the peer is a clean shutdown.
#[tokio::test]
async fn peer_eof_is_clean_shutdown() {
    let (peer, conn, driver) = raw_agent(EchoAgent::new(), ConnectionOptions::default());

    drop(peer);
    let outcome = tokio::time::timeout(TEST_TIMEOUT, driver)
        .await
        .expect("driver finished")
        .expect("join");
    assert!(outcome.is_ok(), "{outcome:?}");
    assert!(conn.is_closed());
}
