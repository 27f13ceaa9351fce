use berth_exec::ExecError;
use thiserror::Error;

pub type CloudResult<T> = Result<T, CloudError>;

#[derive(Error, Debug)]
pub enum CloudError {
    #[error("service '{service}' not found or not active in cluster '{cluster}'")]
    ServiceNotFound { cluster: String, service: String },

    #[error("container instance '{0}' not found")]
    NodeNotFound(String),

    #[error("ingress rule already exists in group '{0}'")]
    DuplicateRule(String),

    #[error("{operation} rejected: {message}")]
    Rejected { operation: String, message: String },

    #[error("unexpected response from {operation}: {reason}")]
    Decode { operation: String, reason: String },

    #[error("command failed: {0}")]
    Exec(#[from] ExecError),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("credentials unavailable: {0}")]
    Credentials(String),
}

impl CloudError {
    pub fn decode(operation: impl Into<String>, reason: impl ToString) -> Self {
        CloudError::Decode {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CloudError::Exec(ExecError::Cancelled))
    }
}
