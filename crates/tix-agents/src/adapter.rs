use crate::types::{AssistantCommand, AssistantRequest};

/// Turns an [`AssistantRequest`] into a concrete command line for one
/// assistant CLI.
pub trait AssistantAdapter: Send + Sync {
    fn name(&self) -> &str;
    fn build_command(&self, request: &AssistantRequest) -> AssistantCommand;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaudeAdapter {
    pub executable: String,
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self {
            executable: "claude".to_string(),
        }
    }
}

impl ClaudeAdapter {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl AssistantAdapter for ClaudeAdapter {
    fn name(&self) -> &str {
        "claude"
    }

    fn build_command(&self, request: &AssistantRequest) -> AssistantCommand {
        let mut args = vec!["-p".to_string(), request.prompt.clone()];
        if !request.model.trim().is_empty() {
            args.push("--model".to_string());
            args.push(request.model.clone());
        }
        if !request.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(request.allowed_tools.join(","));
        }
        if !request.system_prompt.trim().is_empty() {
            args.push("--system-prompt".to_string());
            args.push(request.system_prompt.clone());
        }
        args.push("--output-format".to_string());
        args.push(if request.json_output { "json" } else { "text" }.to_string());

        AssistantCommand {
            executable: self.executable.clone(),
            args,
            env: Vec::new(),
        }
    }
}
