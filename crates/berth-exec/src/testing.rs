//! Recording [`CommandRunner`] for tests.
//!
//! Responses are matched by pattern: a list of words that must appear, in
//! order, among the program and its arguments. Rules are tried in the order
//! they were added; unmatched commands succeed with empty output. A rule can
//! also make the runner itself fail, as a spawn or io error would.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{ExecError, ExecResult};
use crate::proc::{CommandOutput, CommandRunner, CommandSpec};

struct Rule {
    pattern: Vec<String>,
    answer: ExecResult<CommandOutput>,
    remaining: Option<usize>,
}

#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every matching command with `output`.
    pub fn respond(&self, pattern: &[&str], output: CommandOutput) -> &Self {
        self.push(pattern, Ok(output), None)
    }

    /// Answer the next matching command only.
    pub fn respond_once(&self, pattern: &[&str], output: CommandOutput) -> &Self {
        self.push(pattern, Ok(output), Some(1))
    }

    /// Exit every matching command with `code` and `stderr`.
    pub fn fail(&self, pattern: &[&str], code: i32, stderr: &str) -> &Self {
        self.push(pattern, Ok(CommandOutput::failed(code, stderr)), None)
    }

    /// Every matching command errors before producing an exit status.
    pub fn error(&self, pattern: &[&str], error: ExecError) -> &Self {
        self.push(pattern, Err(error), None)
    }

    fn push(
        &self,
        pattern: &[&str],
        answer: ExecResult<CommandOutput>,
        remaining: Option<usize>,
    ) -> &Self {
        let rule = Rule {
            pattern: pattern.iter().map(|s| s.to_string()).collect(),
            answer,
            remaining,
        };
        self.rules.lock().unwrap().push(rule);
        self
    }

    /// Every command seen so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Space-joined program and arguments of every command seen so far.
    pub fn lines(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| {
                std::iter::once(c.program.as_str())
                    .chain(c.args.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }

    pub fn count(&self, pattern: &[&str]) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches(c, pattern.iter().copied()))
            .count()
    }

    fn answer(&self, spec: &CommandSpec) -> ExecResult<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());

        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if rule.remaining == Some(0) {
                continue;
            }
            if matches(spec, rule.pattern.iter().map(String::as_str)) {
                if let Some(n) = rule.remaining.as_mut() {
                    *n -= 1;
                }
                return rule.answer.clone();
            }
        }
        Ok(CommandOutput::ok(""))
    }
}

fn matches<'a>(spec: &CommandSpec, mut pattern: impl Iterator<Item = &'a str>) -> bool {
    let mut words = std::iter::once(spec.program.as_str()).chain(spec.args.iter().map(String::as_str));
    pattern.all(|p| words.any(|w| w == p))
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn output(&self, spec: &CommandSpec) -> ExecResult<CommandOutput> {
        let out = self.answer(spec)?;
        if spec.fail_on_non_zero {
            out.check(spec)
        } else {
            Ok(out)
        }
    }

    async fn status(&self, spec: &CommandSpec) -> ExecResult<i32> {
        let out = self.answer(spec)?;
        let code = out.code.unwrap_or(-1);
        if spec.fail_on_non_zero {
            out.check(spec)?;
        }
        Ok(code)
    }

    async fn interactive(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> ExecResult<i32> {
        let out = self.answer(spec)?;
        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        out.code.ok_or_else(|| ExecError::KilledBySignal {
            command: spec.command_line(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_matches_in_order() {
        let runner = ScriptedRunner::new();
        runner
            .respond_once(&["git", "rev-parse"], CommandOutput::ok("abc123\n"))
            .fail(&["docker", "push"], 1, "denied");

        let head = runner
            .output(&CommandSpec::new("git").args(["rev-parse", "HEAD"]))
            .await
            .unwrap();
        assert_eq!(head.stdout, "abc123\n");

        let again = runner
            .output(&CommandSpec::new("git").args(["rev-parse", "HEAD"]))
            .await
            .unwrap();
        assert_eq!(again.stdout, "");

        let err = runner
            .output(&CommandSpec::new("docker").args(["push", "repo:abc123"]))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), Some(1));

        assert_eq!(runner.count(&["git"]), 2);
        assert_eq!(runner.lines()[2], "docker push repo:abc123");
    }

    #[tokio::test]
    async fn error_rule_fails_before_exit_status() {
        let runner = ScriptedRunner::new();
        runner.error(
            &["ssh"],
            ExecError::Spawn {
                program: "ssh".into(),
                reason: "not found".into(),
            },
        );
        let err = runner
            .interactive(&CommandSpec::new("ssh").arg("host"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
        assert_eq!(runner.count(&["ssh"]), 1);
    }

    #[test]
    fn pattern_words_must_appear_in_order() {
        let spec = CommandSpec::new("aws").args(["--region", "us-west-2", "ecs", "list-tasks"]);
        assert!(matches(&spec, ["aws", "ecs", "list-tasks"].into_iter()));
        assert!(!matches(&spec, ["list-tasks", "ecs"].into_iter()));
    }
}
