//! Subprocess execution for berth.
//!
//! Every external tool (docker, git, ssh, the aws CLI, the config-store CLI) is
//! invoked through [`CommandRunner`], so the engine can be exercised against a
//! scripted runner in tests.

mod error;
pub use error::{ExecError, ExecResult};

pub mod proc;
pub use proc::{CommandOutput, CommandRunner, CommandSpec, ProcRunner};
#[cfg(feature = "shell")]
pub use proc::shell::ShellCommand;

pub mod quote;

mod util;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
