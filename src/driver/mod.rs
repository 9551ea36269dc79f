//! Role mediators built on the shared connection engine.
//!
//! - [`agent_side`]: serves the session methods on behalf of an [`Agent`]
//!   and gives each prompt turn a [`TurnContext`].
//! - [`client_side`]: serves the file and terminal callbacks and drives
//!   the agent through [`ClientSide`].
//!
//! Both sides share framing, routing, correlation, the session state
//! machine and negotiation; only the dispatcher registrations differ.

pub mod agent_side;
pub mod client_side;

pub use agent_side::{Agent, AgentFuture, ClientProxy, TurnContext, UpdateEmitter};
pub use client_side::{ClientProviders, ClientSide, IgnoreUpdates, UpdateHandler};
