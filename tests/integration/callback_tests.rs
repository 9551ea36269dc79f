//! Agent-to-client callbacks issued in the middle of a prompt turn.
//!
//! Covers:
//! - callbacks served while the connection keeps streaming
//! - callback deadlines surfacing as `AppError::Timeout`
//! - teardown failing in-flight callbacks and prompts

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use acp_link::acp::ConnectionOptions;
use acp_link::demo::EchoAgent;
use acp_link::driver::{ClientProviders, ClientSide};
use acp_link::models::capabilities::CapabilitySet;
use acp_link::models::content::ContentBlock;
use acp_link::models::messages::{ReadTextFileParams, StopReason, WriteTextFileParams};
use acp_link::models::session_update::ToolCallStatus;
use acp_link::providers::fs::{FileSystem, FsFuture};
use acp_link::AppError;

use super::test_helpers::{connect_split, connect_with, Event, TEST_TIMEOUT};

/// File system whose reads never complete.
#[derive(Debug, Default)]
struct StalledFs {
    started: Notify,
}

impl FileSystem for StalledFs {
    fn read_text_file(&self, _params: ReadTextFileParams) -> FsFuture<'_, String> {
        Box::pin(async move {
            self.started.notify_one();
            std::future::pending::<()>().await;
            Ok(String::new())
        })
    }

    fn write_text_file(&self, _params: WriteTextFileParams) -> FsFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

fn stalled_providers(fs: &Arc<StalledFs>) -> ClientProviders {
    ClientProviders::new(CapabilitySet::all()).with_fs(Arc::clone(fs) as Arc<dyn FileSystem>)
}

async fn open_session(client: &ClientSide) -> String {
    client.initialize(None).await.expect("initialize");
    client
        .session_new(ClientSide::new_session_id(), None)
        .await
        .expect("session/new")
}

// ── Deadlines ───────────────────────────────────────────────────────────────

/// A callback the client never answers times out on the agent side.
#[tokio::test]
async fn unanswered_callback_times_out() {
    let fs = Arc::new(StalledFs::default());
    let agent_options = ConnectionOptions {
        request_timeout: Duration::from_millis(200),
        ..ConnectionOptions::default()
    };
    let pair = connect_split(
        Arc::new(EchoAgent::new()),
        &stalled_providers(&fs),
        agent_options,
        ConnectionOptions::default(),
    );
    let session = open_session(&pair.client).await;

    let stop = pair
        .client
        .session_prompt(&session, vec![ContentBlock::text("read /slow/file.txt")])
        .await
        .expect("prompt completes despite the stalled callback");
    assert_eq!(stop, StopReason::EndTurn);

    let failed = pair.updates.tool_updates().pop().expect("tool update");
    assert_eq!(failed.status, ToolCallStatus::Failed);
    assert!(
        failed.error.as_deref().unwrap_or_default().starts_with("timeout"),
        "{failed:?}"
    );
    assert!(
        pair.agent.registry().is_empty(),
        "timed-out request must leave the registry"
    );
}

/// Updates announced before a callback reach the client while it is pending.
#[tokio::test]
async fn updates_flow_while_callback_pending() {
    let fs = Arc::new(StalledFs::default());
    let pair = connect_with(
        Arc::new(EchoAgent::new()),
        &stalled_providers(&fs),
        ConnectionOptions::default(),
    );
    let session = open_session(&pair.client).await;

    let client = pair.client.clone();
    let sid = session.clone();
    let running = tokio::spawn(async move {
        client
            .session_prompt(&sid, vec![ContentBlock::text("read /slow/file.txt")])
            .await
    });

    tokio::time::timeout(TEST_TIMEOUT, fs.started.notified())
        .await
        .expect("callback reached the client");
    let events = pair.updates.events();
    assert!(events.contains(&Event::ToolCall("call_read_file".into())), "{events:?}");
    assert_eq!(pair.agent.registry().len(), 1, "one callback in flight");

    pair.client.session_cancel(&session).await.expect("cancel");
    let stop = tokio::time::timeout(TEST_TIMEOUT, running)
        .await
        .expect("prompt finished")
        .expect("join")
        .expect("prompt result");
    assert_eq!(stop, StopReason::Cancelled);
}

// ── Teardown ────────────────────────────────────────────────────────────────

/// Closing the client fails its prompt and the agent's pending callback.
#[tokio::test]
async fn teardown_fails_everything_in_flight() {
    let fs = Arc::new(StalledFs::default());
    let pair = connect_with(
        Arc::new(EchoAgent::new()),
        &stalled_providers(&fs),
        ConnectionOptions::default(),
    );
    let session = open_session(&pair.client).await;

    let client = pair.client.clone();
    let sid = session.clone();
    let running = tokio::spawn(async move {
        client
            .session_prompt(&sid, vec![ContentBlock::text("read /slow/file.txt")])
            .await
    });
    tokio::time::timeout(TEST_TIMEOUT, fs.started.notified())
        .await
        .expect("callback reached the client");

    pair.client.close();

    let err = tokio::time::timeout(TEST_TIMEOUT, running)
        .await
        .expect("prompt finished")
        .expect("join")
        .expect_err("prompt must fail on teardown");
    assert!(matches!(err, AppError::ConnectionClosed(_)), "{err:?}");

    tokio::time::timeout(TEST_TIMEOUT, pair.agent.closed())
        .await
        .expect("agent side observed the teardown");
    assert!(pair.agent.registry().is_empty());
    assert!(pair.agent.state().live_sessions().is_empty());

    let outcome = tokio::time::timeout(TEST_TIMEOUT, pair.client_driver)
        .await
        .expect("client driver finished")
        .expect("join");
    assert!(outcome.is_ok(), "{outcome:?}");
}

/// Requests after teardown fail immediately.
#[tokio::test]
async fn requests_after_close_fail() {
    let fs = Arc::new(StalledFs::default());
    let pair = connect_with(
        Arc::new(EchoAgent::new()),
        &stalled_providers(&fs),
        ConnectionOptions::default(),
    );
    let session = open_session(&pair.client).await;

    pair.client.close();

    let err = pair
        .client
        .session_prompt(&session, vec![ContentBlock::text("hi")])
        .await
        .expect_err("closed");
    assert!(
        matches!(err, AppError::ResourceNotFound(_) | AppError::ConnectionClosed(_)),
        "{err:?}"
    );
    assert!(matches!(
        pair.client.notify_cancel(&session),
        Err(AppError::ConnectionClosed(_))
    ));
}
