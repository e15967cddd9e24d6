use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tix_agents::AssistantRequest;
use tix_core::{TixConfig, COMPLETED_STATUSES};

use crate::field_map::NormalizeRules;

pub const NOTION_FETCH_TOOL: &str = "mcp__notion__notion-fetch";
pub const NOTION_QUERY_TOOL: &str = "mcp__notion__notion-query-data-sources";
pub const NOTION_SEARCH_TOOL: &str = "mcp__notion__notion-search";

/// Floor for the open-ended search timeout.
pub const MIN_SEARCH_TIMEOUT: Duration = Duration::from_secs(120);

pub const SINGLE_CALL_SYSTEM_PROMPT: &str = "You are a data retrieval tool. Make exactly one \
tool call to answer the request. Do not explore, do not make follow-up calls, and do not ask \
questions. Reply with the tool result only, without commentary.";

/// Keys the open-ended search is asked to return for every ticket.
pub const TICKET_SCHEMA_FIELDS: [&str; 8] = [
    "id",
    "ticketNumber",
    "title",
    "status",
    "priority",
    "lastUpdated",
    "url",
    "githubLinks",
];

/// Markers that make a structured-view answer unusable.
const VIEW_ERROR_MARKERS: [&str; 2] = ["error", "Invalid"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    StructuredView,
    StructuredQuery,
    OpenEndedSearch,
}

/// Strategies in the order they are attempted.
pub const STRATEGY_ORDER: [StrategyKind; 3] = [
    StrategyKind::StructuredView,
    StrategyKind::StructuredQuery,
    StrategyKind::OpenEndedSearch,
];

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::StructuredView => "structured-view",
            StrategyKind::StructuredQuery => "structured-query",
            StrategyKind::OpenEndedSearch => "open-ended-search",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a strategy needs to build its request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncParams {
    pub user_name: String,
    pub database_url: Option<String>,
    pub data_source_id: Option<String>,
    pub model: String,
    pub json_output: bool,
    pub base_timeout: Duration,
    pub rules: NormalizeRules,
}

impl SyncParams {
    /// `timeout_override_secs` comes from `tix sync --timeout`.
    pub fn from_config(config: &TixConfig, timeout_override_secs: Option<u64>) -> Self {
        let timeout_secs = timeout_override_secs.unwrap_or(config.sync.timeout_secs);
        Self {
            user_name: config.user_name.trim().to_string(),
            database_url: non_blank(config.notion_database_url.as_deref()),
            data_source_id: non_blank(config.notion_data_source_id.as_deref()),
            model: config.assistant.model.clone(),
            json_output: config.assistant.json_output,
            base_timeout: Duration::from_secs(timeout_secs),
            rules: NormalizeRules {
                ticket_prefix: config.ticket_prefix.clone(),
            },
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub fn is_eligible(kind: StrategyKind, params: &SyncParams) -> bool {
    match kind {
        StrategyKind::StructuredView => {
            params.database_url.is_some() && params.data_source_id.is_none()
        }
        StrategyKind::StructuredQuery => params.data_source_id.is_some(),
        StrategyKind::OpenEndedSearch => true,
    }
}

pub fn strategy_timeout(kind: StrategyKind, params: &SyncParams) -> Duration {
    match kind {
        StrategyKind::StructuredView | StrategyKind::StructuredQuery => params.base_timeout,
        StrategyKind::OpenEndedSearch => (params.base_timeout * 2).max(MIN_SEARCH_TIMEOUT),
    }
}

pub fn build_request(kind: StrategyKind, params: &SyncParams) -> AssistantRequest {
    let (prompt, tool) = match kind {
        StrategyKind::StructuredView => (view_prompt(params), NOTION_FETCH_TOOL),
        StrategyKind::StructuredQuery => (query_prompt(params), NOTION_QUERY_TOOL),
        StrategyKind::OpenEndedSearch => (search_prompt(params), NOTION_SEARCH_TOOL),
    };
    single_tool_request(prompt, tool, strategy_timeout(kind, params), params)
}

pub(crate) fn single_tool_request(
    prompt: String,
    tool: &str,
    timeout: Duration,
    params: &SyncParams,
) -> AssistantRequest {
    AssistantRequest {
        prompt,
        system_prompt: SINGLE_CALL_SYSTEM_PROMPT.to_string(),
        allowed_tools: vec![tool.to_string()],
        model: params.model.clone(),
        timeout_secs: timeout.as_secs().max(1),
        json_output: params.json_output,
    }
}

/// Why a successful process exit still cannot be used, if it cannot.
pub fn soft_failure_reason(kind: StrategyKind, output: &str) -> Option<String> {
    if output.trim().is_empty() {
        return Some("assistant returned no output".to_string());
    }
    if kind == StrategyKind::StructuredView {
        if let Some(marker) = VIEW_ERROR_MARKERS
            .iter()
            .find(|marker| output.contains(**marker))
        {
            return Some(format!("output contains error marker '{marker}'"));
        }
    }
    None
}

fn completed_status_list() -> String {
    COMPLETED_STATUSES
        .iter()
        .map(|status| sql_literal(status))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Single-quoted SQL literal with embedded quotes doubled.
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn query_sql(data_source_id: &str, user_name: &str) -> String {
    let pattern = format!("%{user_name}%");
    format!(
        "SELECT * FROM \"collection://{data_source_id}\" WHERE \"Assignee\" LIKE {} \
         AND LOWER(\"Status\") NOT IN ({})",
        sql_literal(&pattern),
        completed_status_list()
    )
}

fn view_prompt(params: &SyncParams) -> String {
    let url = params.database_url.as_deref().unwrap_or_default();
    format!(
        "Fetch the Notion database view at {url} with the notion-fetch tool. Return the rows \
         assigned to \"{user}\" whose status is not one of: {completed}. Reply with a JSON array \
         only; each element must have the keys {schema}.",
        user = params.user_name,
        completed = COMPLETED_STATUSES.join(", "),
        schema = TICKET_SCHEMA_FIELDS.join(", "),
    )
}

fn query_prompt(params: &SyncParams) -> String {
    let data_source_id = params.data_source_id.as_deref().unwrap_or_default();
    format!(
        "Run this query with the notion-query-data-sources tool exactly as written and return \
         the raw result rows as JSON, with no commentary:\n\n{}",
        query_sql(data_source_id, &params.user_name)
    )
}

fn search_prompt(params: &SyncParams) -> String {
    format!(
        "Search Notion for tickets assigned to \"{user}\" that are not completed. Return ONLY a \
         JSON array, with no prose and no code fence. Each element must be an object with \
         exactly these keys: {schema}. Use an empty string for unknown values and [] for \
         githubLinks when there are none.",
        user = params.user_name,
        schema = TICKET_SCHEMA_FIELDS.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SyncParams {
        SyncParams {
            user_name: "Ada O'Neil".to_string(),
            database_url: Some("https://www.notion.so/acme/tickets?v=1".to_string()),
            data_source_id: None,
            model: "sonnet".to_string(),
            json_output: false,
            base_timeout: Duration::from_secs(60),
            rules: NormalizeRules::default(),
        }
    }

    #[test]
    fn view_is_eligible_only_without_data_source_id() {
        let mut params = params();
        assert!(is_eligible(StrategyKind::StructuredView, &params));
        assert!(!is_eligible(StrategyKind::StructuredQuery, &params));

        params.data_source_id = Some("2f8c1a9e-3b4d-4e5f-8a6b-7c8d9e0f1a2b".to_string());
        assert!(!is_eligible(StrategyKind::StructuredView, &params));
        assert!(is_eligible(StrategyKind::StructuredQuery, &params));

        params.database_url = None;
        params.data_source_id = None;
        assert!(!is_eligible(StrategyKind::StructuredView, &params));
        assert!(is_eligible(StrategyKind::OpenEndedSearch, &params));
    }

    #[test]
    fn search_timeout_is_doubled_with_a_floor() {
        let mut params = params();
        assert_eq!(
            strategy_timeout(StrategyKind::StructuredView, &params),
            Duration::from_secs(60)
        );
        assert_eq!(
            strategy_timeout(StrategyKind::OpenEndedSearch, &params),
            Duration::from_secs(120)
        );

        params.base_timeout = Duration::from_secs(90);
        assert_eq!(
            strategy_timeout(StrategyKind::OpenEndedSearch, &params),
            Duration::from_secs(180)
        );

        params.base_timeout = Duration::from_secs(10);
        assert_eq!(
            strategy_timeout(StrategyKind::OpenEndedSearch, &params),
            MIN_SEARCH_TIMEOUT
        );
    }

    #[test]
    fn each_strategy_allows_exactly_one_tool() {
        let mut params = params();
        params.data_source_id = Some("abc".to_string());
        for (kind, tool) in [
            (StrategyKind::StructuredView, NOTION_FETCH_TOOL),
            (StrategyKind::StructuredQuery, NOTION_QUERY_TOOL),
            (StrategyKind::OpenEndedSearch, NOTION_SEARCH_TOOL),
        ] {
            let request = build_request(kind, &params);
            assert_eq!(request.allowed_tools, vec![tool.to_string()]);
            assert_eq!(request.system_prompt, SINGLE_CALL_SYSTEM_PROMPT);
            assert_eq!(request.model, "sonnet");
        }
    }

    #[test]
    fn query_sql_filters_assignee_and_completed_statuses() {
        let sql = query_sql("abc-123", "Ada O'Neil");
        assert!(sql.starts_with("SELECT * FROM \"collection://abc-123\""));
        assert!(sql.contains("LIKE '%Ada O''Neil%'"));
        assert!(sql.contains("NOT IN ('done', 'complete', 'completed'"));
        assert!(sql.contains("'won''t do'"));
    }

    #[test]
    fn query_request_embeds_sql_verbatim() {
        let mut params = params();
        params.data_source_id = Some("abc-123".to_string());
        let request = build_request(StrategyKind::StructuredQuery, &params);
        assert!(request
            .prompt
            .contains(&query_sql("abc-123", "Ada O'Neil")));
        assert_eq!(request.timeout_secs, 60);
    }

    #[test]
    fn search_request_documents_field_schema() {
        let request = build_request(StrategyKind::OpenEndedSearch, &params());
        for field in TICKET_SCHEMA_FIELDS {
            assert!(request.prompt.contains(field), "missing {field}");
        }
        assert!(request.prompt.contains("Ada O'Neil"));
        assert_eq!(request.timeout_secs, 120);
    }

    #[test]
    fn view_output_with_error_markers_is_a_soft_failure() {
        assert!(soft_failure_reason(StrategyKind::StructuredView, "Invalid URL").is_some());
        assert!(soft_failure_reason(StrategyKind::StructuredView, "an error occurred").is_some());
        assert!(soft_failure_reason(StrategyKind::StructuredView, "[{\"id\": \"1\"}]").is_none());
        assert!(
            soft_failure_reason(StrategyKind::OpenEndedSearch, "[{\"title\": \"error page\"}]")
                .is_none()
        );
        assert!(soft_failure_reason(StrategyKind::OpenEndedSearch, "   ").is_some());
    }

    #[test]
    fn params_from_config_apply_timeout_override_and_ignore_blank_values() {
        let mut config = TixConfig {
            user_name: " ada ".to_string(),
            notion_database_url: Some("  ".to_string()),
            notion_data_source_id: Some("abc".to_string()),
            ..TixConfig::default()
        };
        config.sync.timeout_secs = 45;

        let params = SyncParams::from_config(&config, None);
        assert_eq!(params.user_name, "ada");
        assert!(params.database_url.is_none());
        assert_eq!(params.data_source_id.as_deref(), Some("abc"));
        assert_eq!(params.base_timeout, Duration::from_secs(45));

        let params = SyncParams::from_config(&config, Some(200));
        assert_eq!(params.base_timeout, Duration::from_secs(200));
    }

    #[test]
    fn strategy_labels_are_kebab_case() {
        assert_eq!(StrategyKind::StructuredView.to_string(), "structured-view");
        assert_eq!(StrategyKind::StructuredQuery.as_str(), "structured-query");
        assert_eq!(STRATEGY_ORDER[2], StrategyKind::OpenEndedSearch);
    }
}
