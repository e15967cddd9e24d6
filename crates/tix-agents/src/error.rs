use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("invalid assistant request: {message}")]
    InvalidRequest { message: String },
    #[error("assistant command failed to start ({command}): {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("assistant command i/o error ({command}): {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("assistant command timed out after {timeout:?} ({command})")]
    Timeout { command: String, timeout: Duration },
    #[error("assistant command returned non-zero exit ({command}) status={status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
}

impl AgentError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AgentError::Timeout { .. })
    }
}
