//! brique-lib: a programmable build orchestrator.
//!
//! A project registers named targets on a [`BuildContext`] and runs them. Target bodies drive
//! external tools through a uniform layer that falls back to disposable containers when a tool
//! is not installed on the host:
//! - `target`: target registration and dispatch
//! - `tool`: tool probing, image building and execution, local or containerized
//! - `fileset`: glob-based include/exclude selection, used by `copy`, `remove` and `archive`
//! - `archive`: tar, tar.gz and zip writing and extraction

pub mod archive;
pub mod context;
pub mod copy;
pub mod error;
pub mod fileset;
pub mod paths;
pub mod platform;
pub mod process;
pub mod remove;
pub mod target;
pub mod tool;
pub mod tools;
#[cfg(test)]
mod util;

pub use archive::{ArchiveKind, Level};
pub use context::{BuildContext, Config};
pub use copy::copy;
pub use error::{BuildError, ErrorKind, Result};
pub use fileset::Fileset;
pub use platform::Os;
pub use process::{Input, Output};
pub use remove::remove;
pub use target::{Callback, Target};
pub use tool::{RunOptions, Tool, ToolSpec};
