use std::time::Duration;

use crate::adapter::{AssistantAdapter, ClaudeAdapter};
use crate::error::AgentError;
use crate::runner::ProcessRunner;
use crate::types::{AssistantRequest, ProcessOutput};

/// Executes assistant requests. The sync engine depends on this seam only, so
/// tests can script responses without spawning anything.
pub trait AssistantClient {
    fn execute(
        &self,
        request: &AssistantRequest,
        on_tick: &mut dyn FnMut(Duration),
    ) -> Result<ProcessOutput, AgentError>;
}

pub struct CliAssistantClient {
    adapter: Box<dyn AssistantAdapter>,
    runner: ProcessRunner,
}

impl CliAssistantClient {
    pub fn new(adapter: Box<dyn AssistantAdapter>, runner: ProcessRunner) -> Self {
        Self { adapter, runner }
    }

    pub fn claude(executable: impl Into<String>) -> Self {
        Self::new(
            Box::new(ClaudeAdapter::new(executable)),
            ProcessRunner::default(),
        )
    }

    pub fn adapter_name(&self) -> &str {
        self.adapter.name()
    }
}

impl AssistantClient for CliAssistantClient {
    fn execute(
        &self,
        request: &AssistantRequest,
        on_tick: &mut dyn FnMut(Duration),
    ) -> Result<ProcessOutput, AgentError> {
        if request.prompt.trim().is_empty() {
            return Err(AgentError::InvalidRequest {
                message: "prompt must not be empty".to_string(),
            });
        }
        if request.timeout_secs == 0 {
            return Err(AgentError::InvalidRequest {
                message: "timeout_secs must be greater than zero".to_string(),
            });
        }

        let command = self.adapter.build_command(request);
        self.runner.run(&command, request.timeout(), on_tick)
    }
}
