use std::path::PathBuf;

use crate::proc::CommandSpec;
use crate::quote;

/// Shell script invocation (`sh -c` / `cmd /C`).
///
/// Used for operator-configured command lines such as the config-store CLI,
/// where the configured prefix may contain its own arguments.
#[derive(Debug, Clone)]
pub struct ShellCommand {
    pub script: String,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub fail_on_non_zero: bool,
}

impl ShellCommand {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            env: Vec::new(),
            cwd: None,
            fail_on_non_zero: true,
        }
    }

    /// Append arguments to the script, each shell-quoted.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.script.push(' ');
            self.script.push_str(&quote::quote(arg.as_ref()));
        }
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn allow_failure(mut self) -> Self {
        self.fail_on_non_zero = false;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.script.trim().is_empty()
    }

    /// Equivalent [`CommandSpec`] for the platform shell.
    pub fn into_spec(self) -> CommandSpec {
        cfg_if::cfg_if! {
            if #[cfg(target_family = "windows")] {
                let base = CommandSpec::new("cmd").args(["/C".to_string(), self.script]);
            } else {
                let base = CommandSpec::new("sh").args(["-c".to_string(), self.script]);
            }
        }
        let mut spec = base.envs(self.env);
        spec.cwd = self.cwd;
        spec.fail_on_non_zero = self.fail_on_non_zero;
        spec
    }
}

impl From<ShellCommand> for CommandSpec {
    fn from(cmd: ShellCommand) -> Self {
        cmd.into_spec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn appends_quoted_arguments() {
        let spec = ShellCommand::new("bundle exec config")
            .with_args(["push", "staging", "it's"])
            .into_spec();
        assert_eq!(spec.program, "sh");
        assert_eq!(spec.args[0], "-c");
        assert_eq!(spec.args[1], r#"bundle exec config push staging 'it'\''s'"#);
        assert!(spec.fail_on_non_zero);
    }

    #[test]
    fn empty_script_detected() {
        assert!(ShellCommand::new("  ").is_empty());
        assert!(!ShellCommand::new("true").is_empty());
    }
}
