//! Capability providers the client serves to the agent.
//!
//! - `fs`: `fs/read_text_file`, `fs/write_text_file`.
//! - `terminal`: `terminal/*`.
//! - `path_safety`: absolute-path validation and root confinement.

pub mod fs;
pub mod path_safety;
pub mod terminal;

pub use fs::{FileSystem, LocalFileSystem};
pub use terminal::{ProcessTerminals, Terminals};
