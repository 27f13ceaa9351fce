pub mod build;
pub mod commands;
pub use commands::{ShortcutError, ShortcutRegistry};
pub mod context;
pub use context::Backends;
pub mod grant;
pub use grant::{GrantError, GrantManager, NetworkAccessGrant, ReleaseReport};
pub mod pipeline;
pub use pipeline::{ConfigRollout, DeployReport, Pipeline, PipelineError, Stage, TripleOutcome};
pub mod publish;
pub mod reconcile;
pub use reconcile::{ReconcileError, ReconcileOutcome, Reconciler};
pub mod session;
pub use session::{SessionError, SessionManager, SessionOutcome, session_target};

#[cfg(test)]
mod testing;
