use tokio::process::{Child, Command};

use crate::proc::CommandSpec;

pub fn cmd_program(spec: &CommandSpec) -> Command {
    let mut cmd = Command::new(&spec.program);
    cmd.args(spec.args.iter().map(|s| s.as_str()));
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    for (k, v) in &spec.env {
        cmd.env(k, v);
    }
    cmd.kill_on_drop(true);
    cmd
}

/// Terminate a child and reap it so no zombie outlives the session.
pub async fn kill_graceful(child: &mut Child) -> std::io::Result<()> {
    child.kill().await
}
