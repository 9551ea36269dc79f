#![forbid(unsafe_code)]

//! `acp-link`: a bidirectional JSON-RPC engine for the editor/agent
//! protocol (ACP), usable from either side of the connection.

pub mod acp;
pub mod config;
pub mod demo;
pub mod driver;
pub mod errors;
pub mod mode;
pub mod models;
pub mod providers;
pub mod session;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
