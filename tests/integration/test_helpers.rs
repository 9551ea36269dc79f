//! Shared fixtures for integration tests.
//!
//! Connections run over in-memory duplex pipes, so every test exercises the
//! full framing, dispatch and correlation path without spawning processes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

use acp_link::acp::{Connection, ConnectionOptions};
use acp_link::demo::EchoAgent;
use acp_link::driver::agent_side::{self, Agent};
use acp_link::driver::{ClientProviders, ClientSide, UpdateHandler};
use acp_link::models::capabilities::CapabilitySet;
use acp_link::models::session_update::{Plan, ToolCall, ToolCallUpdate};
use acp_link::providers::{LocalFileSystem, ProcessTerminals};

/// Upper bound for anything a test waits on.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

const PIPE_CAPACITY: usize = 64 * 1024;

// ── Update recording ────────────────────────────────────────────────────────

/// One update observed by the client, flattened for easy assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Message(String),
    Thought(String),
    ToolCall(String),
    ToolUpdate(ToolCallUpdate),
    Plan(usize),
    Mode(String),
    Done,
}

/// [`UpdateHandler`] recording every update in arrival order.
#[derive(Debug, Default)]
pub struct RecordingUpdates {
    events: Mutex<Vec<Event>>,
}

impl RecordingUpdates {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, event: Event) {
        self.events.lock().expect("events lock").push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("events lock").clone()
    }

    /// Concatenated message chunks.
    pub fn message_text(&self) -> String {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Message(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Number of message chunks seen so far.
    pub fn message_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Message(_)))
            .count()
    }

    /// Tool-call updates seen so far.
    pub fn tool_updates(&self) -> Vec<ToolCallUpdate> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::ToolUpdate(update) => Some(update),
                _ => None,
            })
            .collect()
    }
}

impl UpdateHandler for RecordingUpdates {
    fn on_agent_message(&self, _session_id: &str, text: &str) {
        self.push(Event::Message(text.to_owned()));
    }

    fn on_agent_thought(&self, _session_id: &str, text: &str) {
        self.push(Event::Thought(text.to_owned()));
    }

    fn on_tool_call(&self, _session_id: &str, call: &ToolCall) {
        self.push(Event::ToolCall(call.id.clone()));
    }

    fn on_tool_update(&self, _session_id: &str, update: &ToolCallUpdate) {
        self.push(Event::ToolUpdate(update.clone()));
    }

    fn on_plan(&self, _session_id: &str, plan: &Plan) {
        self.push(Event::Plan(plan.steps.len()));
    }

    fn on_mode_change(&self, _session_id: &str, mode: &str) {
        self.push(Event::Mode(mode.to_owned()));
    }

    fn on_done(&self, _session_id: &str) {
        self.push(Event::Done);
    }
}

// ── Connected pairs ─────────────────────────────────────────────────────────

/// A client and an agent talking over an in-memory pipe.
pub struct Pair {
    pub client: ClientSide,
    pub client_driver: JoinHandle<acp_link::Result<()>>,
    pub agent: Connection,
    pub agent_driver: JoinHandle<acp_link::Result<()>>,
    pub updates: Arc<RecordingUpdates>,
}

/// Connect `agent` to a client using `providers`.
pub fn connect_with(
    agent: Arc<dyn Agent>,
    providers: &ClientProviders,
    options: ConnectionOptions,
) -> Pair {
    connect_split(agent, providers, options, options)
}

/// Like [`connect_with`], with separate limits for each side.
pub fn connect_split(
    agent: Arc<dyn Agent>,
    providers: &ClientProviders,
    agent_options: ConnectionOptions,
    client_options: ConnectionOptions,
) -> Pair {
    let (client_io, agent_io) = tokio::io::duplex(PIPE_CAPACITY);
    let (agent_read, agent_write) = tokio::io::split(agent_io);
    let (client_read, client_write) = tokio::io::split(client_io);

    let (agent, agent_driver) =
        agent_side::serve(agent, agent_read, agent_write, agent_options).expect("serve agent");
    let updates = RecordingUpdates::new();
    let (client, client_driver) = ClientSide::connect(
        providers,
        Arc::clone(&updates) as Arc<dyn UpdateHandler>,
        client_read,
        client_write,
        client_options,
    )
    .expect("connect client");

    Pair {
        client,
        client_driver,
        agent,
        agent_driver,
        updates,
    }
}

/// Client providers backed by the local disk (confined to `root` when
/// given) and local processes.
pub fn local_providers(root: Option<&std::path::Path>) -> ClientProviders {
    let fs = match root {
        Some(root) => LocalFileSystem::confined_to(root).expect("fs root"),
        None => LocalFileSystem::new(),
    };
    ClientProviders::new(CapabilitySet::all())
        .with_fs(Arc::new(fs))
        .with_terminals(Arc::new(ProcessTerminals::new(TEST_TIMEOUT, 1_048_576)))
}

/// Echo agent with full local providers, already initialized with one
/// session bound. Returns the pair and the session id.
pub async fn ready_session(agent: EchoAgent, providers: &ClientProviders) -> (Pair, String) {
    let pair = connect_with(Arc::new(agent), providers, ConnectionOptions::default());
    pair.client.initialize(None).await.expect("initialize");
    let session_id = pair
        .client
        .session_new(ClientSide::new_session_id(), None)
        .await
        .expect("session/new");
    (pair, session_id)
}

/// Poll `condition` until it holds or [`TEST_TIMEOUT`] expires.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(TEST_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

// ── Raw wire peer ───────────────────────────────────────────────────────────

/// Test-controlled end of a connection speaking raw NDJSON.
pub struct RawPeer {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl RawPeer {
    /// Send one record followed by a newline.
    pub async fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.expect("write");
        self.writer.write_all(b"\n").await.expect("write newline");
        self.writer.flush().await.expect("flush");
    }

    /// Send a JSON value as one record.
    pub async fn send(&mut self, value: &Value) {
        self.send_line(&value.to_string()).await;
    }

    /// Next record, or `None` at end-of-stream.
    pub async fn recv(&mut self) -> Option<Value> {
        let line = tokio::time::timeout(TEST_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a record")
            .expect("read");
        line.map(|l| serde_json::from_str(&l).expect("peer sent invalid json"))
    }

    /// Next record, which must exist.
    pub async fn expect_record(&mut self) -> Value {
        self.recv().await.expect("unexpected end of stream")
    }

    /// Skip notifications until a response arrives.
    pub async fn next_response(&mut self) -> Value {
        loop {
            let value = self.expect_record().await;
            if value.get("method").is_none() {
                return value;
            }
        }
    }
}

/// Pipe pair whose far end is the returned raw peer.
pub fn raw_pipe() -> (RawPeer, ReadHalf<DuplexStream>, WriteHalf<DuplexStream>) {
    let (peer_io, engine_io) = tokio::io::duplex(PIPE_CAPACITY);
    let (peer_read, peer_write) = tokio::io::split(peer_io);
    let (engine_read, engine_write) = tokio::io::split(engine_io);
    (
        RawPeer {
            lines: BufReader::new(peer_read).lines(),
            writer: peer_write,
        },
        engine_read,
        engine_write,
    )
}

/// Serve `agent` with `options` and return the raw client end.
pub fn raw_agent(
    agent: EchoAgent,
    options: ConnectionOptions,
) -> (RawPeer, Connection, JoinHandle<acp_link::Result<()>>) {
    let (peer, read, write) = raw_pipe();
    let (connection, driver) =
        agent_side::serve(Arc::new(agent), read, write, options).expect("serve agent");
    (peer, connection, driver)
}

/// `initialize` parameters for raw tests.
pub fn raw_initialize(id: i64, capabilities: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocol_version": acp_link::models::messages::PROTOCOL_VERSION,
            "client_info": {"name": "raw-test", "version": "0.0.0"},
            "capabilities": capabilities
        }
    })
}

/// Error code of a response, if it is an error response.
pub fn error_code(response: &Value) -> Option<i64> {
    response.pointer("/error/code").and_then(Value::as_i64)
}
