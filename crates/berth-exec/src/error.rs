use thiserror::Error;

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Error, Debug, Clone)]
pub enum ExecError {
    #[error("missing program")]
    MissingProgram,
    #[error("spawn `{program}` failed: {reason}")]
    Spawn { program: String, reason: String },
    #[error("`{command}` exited with code {code}{}", fmt_stderr(.stderr))]
    NonZeroExit {
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("`{command}` killed by signal")]
    KilledBySignal { command: String },
    #[error("io error: {0}")]
    Io(String),
    #[error("cancelled")]
    Cancelled,
}

impl ExecError {
    /// Captured stderr of a failed command, empty for other variants.
    pub fn stderr(&self) -> &str {
        match self {
            ExecError::NonZeroExit { stderr, .. } => stderr,
            _ => "",
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }
}

fn fmt_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}
