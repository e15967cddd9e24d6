//! Validation for tix configuration.

use serde::{Deserialize, Serialize};

use crate::config::TixConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

impl Validate for TixConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.user_name.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "user_name.empty",
                message: "userName is not set; tickets cannot be filtered by assignee".to_string(),
            });
        }

        if let Some(url) = &self.notion_database_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Error,
                    code: "notion_database_url.invalid",
                    message: "notionDatabaseUrl should start with http:// or https://"
                        .to_string(),
                });
            }
        }

        if self.notion_database_url.is_none() && self.notion_data_source_id.is_none() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "notion.unconfigured",
                message: "neither notionDatabaseUrl nor notionDataSourceId is set; \
                          only open-ended search is available"
                    .to_string(),
            });
        }

        if self.sync.timeout_secs == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "sync.timeout.zero",
                message: "sync timeout cannot be 0".to_string(),
            });
        } else if self.sync.timeout_secs < 15 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "sync.timeout.low",
                message: format!(
                    "sync timeout {}s is very low; the assistant may be killed before it answers",
                    self.sync.timeout_secs
                ),
            });
        }

        if self.assistant.executable.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "assistant.executable.empty",
                message: "assistant executable must not be empty".to_string(),
            });
        }

        if self.ticket_prefix.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "ticket_prefix.empty",
                message: "ticketPrefix is empty; bare ticket numbers stay unprefixed".to_string(),
            });
        }

        issues
    }
}

pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues
        .iter()
        .any(|issue| issue.level == ValidationLevel::Error)
}
