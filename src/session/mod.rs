//! Session state machine.
//!
//! - `state`: connection phase, session table and transition rules.
//! - `turn`: the in-flight prompt turn, its cancellation gate and tool-call
//!   tracking.

pub mod state;
pub mod turn;

pub use state::{ConnectionPhase, ConnectionState, SessionInfo, SessionState};
pub use turn::{StreamingTurn, ToolCallRecord, ToolCallTracker};
