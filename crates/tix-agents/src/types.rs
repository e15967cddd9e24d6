use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantCommand {
    pub executable: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// One non-interactive assistant call: a single prompt, restricted to the
/// listed tools, resolved within `timeout_secs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantRequest {
    pub prompt: String,
    pub system_prompt: String,
    pub allowed_tools: Vec<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub json_output: bool,
}

impl AssistantRequest {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Captured result of a process that exited on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub command: String,
    /// Trimmed stdout.
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// The process exited non-zero but wrote stdout, which is passed through.
    pub exit_tolerated: bool,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}
