//! Runs the query strategies in order and turns the first usable answer into
//! a fresh cache snapshot.
//!
//! Individual strategy failures are recorded and the next eligible strategy
//! is tried. Only exhausting every strategy, failing to interpret an accepted
//! answer, or failing to write the cache ends a sync with an error.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tix_agents::{AgentError, AssistantClient, ProcessOutput};
use tix_core::{save_config, ConfigError, TicketRecord, TixConfig};
use tracing::{debug, info, warn};

use crate::cache::{CacheError, TicketCache};
use crate::discovery::{build_discovery_request, extract_data_source_id};
use crate::normalize::{normalize_output, unwrap_result_envelope, NormalizeError};
use crate::progress::SyncProgress;
use crate::strategy::{
    build_request, is_eligible, soft_failure_reason, StrategyKind, SyncParams, STRATEGY_ORDER,
};

const OUTPUT_EXCERPT_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Accepted,
    /// The assistant answered, but the answer is unusable.
    SoftFailure { reason: String },
    /// The call itself failed: spawn error, timeout, or non-zero exit.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyAttempt {
    pub kind: StrategyKind,
    pub outcome: AttemptOutcome,
    pub elapsed: Duration,
}

impl StrategyAttempt {
    fn summary(&self) -> String {
        match &self.outcome {
            AttemptOutcome::Accepted => format!("{}: accepted", self.kind),
            AttemptOutcome::SoftFailure { reason } | AttemptOutcome::Failed { reason } => {
                format!("{}: {reason}", self.kind)
            }
        }
    }
}

fn summarize_attempts(attempts: &[StrategyAttempt]) -> String {
    if attempts.is_empty() {
        return "no strategy was eligible".to_string();
    }
    attempts
        .iter()
        .map(StrategyAttempt::summary)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result of a successful sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRun {
    pub strategy: StrategyKind,
    pub records: Vec<TicketRecord>,
    pub attempts: Vec<StrategyAttempt>,
    /// The accepted answer came from a process that exited non-zero.
    pub exit_tolerated: bool,
    pub cache_path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(
        "all query strategies failed ({}); try a larger --timeout or check that the assistant CLI can reach Notion",
        summarize_attempts(.attempts)
    )]
    Exhausted { attempts: Vec<StrategyAttempt> },
    #[error("could not interpret {strategy} output: {source}")]
    Normalize {
        strategy: StrategyKind,
        #[source]
        source: NormalizeError,
    },
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("data source discovery failed: {message}")]
    Discovery { message: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no Notion database URL configured; run `tix config set notionDatabaseUrl <url>` or pass one to --discover")]
    MissingDatabaseUrl,
    #[error("no user name configured; run `tix config set userName <name>`")]
    MissingUserName,
}

pub struct SyncEngine<C: AssistantClient> {
    client: C,
    cache: TicketCache,
    params: SyncParams,
}

impl<C: AssistantClient> SyncEngine<C> {
    pub fn new(client: C, cache: TicketCache, params: SyncParams) -> Self {
        Self {
            client,
            cache,
            params,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn cache(&self) -> &TicketCache {
        &self.cache
    }

    pub fn params(&self) -> &SyncParams {
        &self.params
    }

    pub fn run(&self, progress: &mut dyn SyncProgress) -> Result<SyncRun, SyncError> {
        if self.params.user_name.is_empty() {
            return Err(SyncError::MissingUserName);
        }

        let mut attempts = Vec::new();
        for kind in STRATEGY_ORDER {
            if !is_eligible(kind, &self.params) {
                debug!(strategy = %kind, "strategy not eligible; skipping");
                continue;
            }

            let request = build_request(kind, &self.params);
            info!(strategy = %kind, timeout_secs = request.timeout_secs, "trying strategy");
            progress.strategy_started(kind, request.timeout());

            let started = Instant::now();
            let result = self
                .client
                .execute(&request, &mut |elapsed| progress.tick(kind, elapsed));
            let elapsed = started.elapsed();

            let (outcome, accepted) = match result {
                Ok(output) => match unusable_reason(kind, &output) {
                    Some(reason) => (AttemptOutcome::SoftFailure { reason }, None),
                    None => (AttemptOutcome::Accepted, Some(output)),
                },
                Err(err) => (
                    AttemptOutcome::Failed {
                        reason: failure_reason(&err),
                    },
                    None,
                ),
            };

            let attempt = StrategyAttempt {
                kind,
                outcome,
                elapsed,
            };
            if let AttemptOutcome::SoftFailure { reason } | AttemptOutcome::Failed { reason } =
                &attempt.outcome
            {
                warn!(strategy = %kind, ?elapsed, reason = %reason, "strategy failed; falling back");
            }
            progress.strategy_finished(&attempt);
            attempts.push(attempt);

            if let Some(output) = accepted {
                return self.finish(kind, output, attempts, progress);
            }
        }

        Err(SyncError::Exhausted { attempts })
    }

    fn finish(
        &self,
        kind: StrategyKind,
        output: ProcessOutput,
        attempts: Vec<StrategyAttempt>,
        progress: &mut dyn SyncProgress,
    ) -> Result<SyncRun, SyncError> {
        let records = normalize_output(&output.stdout, &self.params.rules).map_err(|source| {
            SyncError::Normalize {
                strategy: kind,
                source,
            }
        })?;
        self.cache.save(&records)?;
        info!(strategy = %kind, records = records.len(), "sync complete");

        let run = SyncRun {
            strategy: kind,
            records,
            attempts,
            exit_tolerated: output.exit_tolerated,
            cache_path: self.cache.path().to_path_buf(),
        };
        progress.completed(&run);
        Ok(run)
    }

    /// Looks up the data source behind `database_url` (or the configured
    /// database URL) and stores it in the config file at `config_path`.
    ///
    /// `config` is only updated, and the file only written, when an
    /// identifier was found. Ticks are reported under the structured-view
    /// strategy, whose fetch tool discovery uses.
    pub fn discover(
        &self,
        database_url: Option<&str>,
        config_path: &Path,
        config: &mut TixConfig,
        progress: &mut dyn SyncProgress,
    ) -> Result<String, SyncError> {
        let database_url = database_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .or(self.params.database_url.as_deref())
            .ok_or(SyncError::MissingDatabaseUrl)?;

        let kind = StrategyKind::StructuredView;
        let request = build_discovery_request(database_url, &self.params);
        info!(database_url, "discovering data source id");
        progress.strategy_started(kind, request.timeout());

        let output = self
            .client
            .execute(&request, &mut |elapsed| progress.tick(kind, elapsed))
            .map_err(|err| SyncError::Discovery {
                message: failure_reason(&err),
            })?;

        let envelope = unwrap_result_envelope(&output.stdout);
        if envelope.is_error {
            return Err(SyncError::Discovery {
                message: format!("assistant reported an error: {}", excerpt(&envelope.text)),
            });
        }
        let data_source_id =
            extract_data_source_id(&envelope.text, database_url).ok_or_else(|| {
                SyncError::Discovery {
                    message: format!(
                        "no data source identifier in assistant output: {}",
                        excerpt(&envelope.text)
                    ),
                }
            })?;

        let mut updated = config.clone();
        updated.notion_data_source_id = Some(data_source_id.clone());
        save_config(config_path, &updated)?;
        *config = updated;

        info!(data_source_id = %data_source_id, path = %config_path.display(), "stored data source id");
        Ok(data_source_id)
    }
}

fn unusable_reason(kind: StrategyKind, output: &ProcessOutput) -> Option<String> {
    let envelope = unwrap_result_envelope(&output.stdout);
    if envelope.is_error {
        return Some(format!(
            "assistant reported an error: {}",
            excerpt(&envelope.text)
        ));
    }
    soft_failure_reason(kind, &envelope.text)
}

fn failure_reason(err: &AgentError) -> String {
    match err {
        AgentError::Timeout { timeout, .. } => format!("timed out after {}s", timeout.as_secs()),
        other => other.to_string(),
    }
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= OUTPUT_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let mut short: String = trimmed.chars().take(OUTPUT_EXCERPT_CHARS).collect();
    short.push_str("...");
    short
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_map::NormalizeRules;
    use crate::strategy::{NOTION_FETCH_TOOL, NOTION_QUERY_TOOL, NOTION_SEARCH_TOOL};
    use chrono::Utc;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use tix_agents::AssistantRequest;
    use tix_core::load_config;

    const DATABASE_URL: &str = "https://www.notion.so/acme/1a2b3c4d5e6f47809a1b2c3d4e5f6a7b";
    const DATA_SOURCE_ID: &str = "2f8c1a9e-3b4d-4e5f-8a6b-7c8d9e0f1a2b";

    /// Replays canned results in order and records every request.
    #[derive(Default)]
    struct ScriptedClient {
        responses: RefCell<VecDeque<Result<ProcessOutput, AgentError>>>,
        requests: RefCell<Vec<AssistantRequest>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Result<ProcessOutput, AgentError>>) -> Self {
            Self {
                responses: RefCell::new(responses.into()),
                requests: RefCell::new(Vec::new()),
            }
        }

        fn tools(&self) -> Vec<String> {
            self.requests
                .borrow()
                .iter()
                .map(|request| request.allowed_tools.join(","))
                .collect()
        }
    }

    impl AssistantClient for ScriptedClient {
        fn execute(
            &self,
            request: &AssistantRequest,
            on_tick: &mut dyn FnMut(Duration),
        ) -> Result<ProcessOutput, AgentError> {
            self.requests.borrow_mut().push(request.clone());
            on_tick(Duration::from_secs(1));
            self.responses
                .borrow_mut()
                .pop_front()
                .expect("unexpected assistant call")
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        started: Vec<StrategyKind>,
        ticks: usize,
        finished: Vec<StrategyAttempt>,
        completed: usize,
    }

    impl SyncProgress for RecordingProgress {
        fn strategy_started(&mut self, kind: StrategyKind, _timeout: Duration) {
            self.started.push(kind);
        }

        fn tick(&mut self, _kind: StrategyKind, _elapsed: Duration) {
            self.ticks += 1;
        }

        fn strategy_finished(&mut self, attempt: &StrategyAttempt) {
            self.finished.push(attempt.clone());
        }

        fn completed(&mut self, _run: &SyncRun) {
            self.completed += 1;
        }
    }

    fn ok(stdout: &str) -> Result<ProcessOutput, AgentError> {
        Ok(ProcessOutput {
            command: "claude -p ...".to_string(),
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: Some(0),
            exit_tolerated: false,
            started_at: Utc::now(),
            elapsed: Duration::from_millis(5),
        })
    }

    fn timeout() -> Result<ProcessOutput, AgentError> {
        Err(AgentError::Timeout {
            command: "claude -p ...".to_string(),
            timeout: Duration::from_secs(60),
        })
    }

    fn params(data_source_id: Option<&str>) -> SyncParams {
        SyncParams {
            user_name: "Ada".to_string(),
            database_url: Some(DATABASE_URL.to_string()),
            data_source_id: data_source_id.map(str::to_string),
            model: "sonnet".to_string(),
            json_output: false,
            base_timeout: Duration::from_secs(60),
            rules: NormalizeRules {
                ticket_prefix: "ENG".to_string(),
            },
        }
    }

    const SEARCH_ANSWER: &str = r#"[
        {"id": "p1", "ticketNumber": "12", "title": "Fix login", "status": "In Progress",
         "githubLinks": ["https://github.com/acme/api/pull/3"]},
        {"id": "p2", "title": "Old work", "status": "Done"}
    ]"#;

    #[test]
    fn invalid_view_output_falls_through_to_search() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = TicketCache::new(dir.path().join("tickets.json"));
        let client = ScriptedClient::new(vec![ok("Invalid database view URL"), ok(SEARCH_ANSWER)]);
        let engine = SyncEngine::new(client, cache, params(None));
        let mut progress = RecordingProgress::default();

        let run = engine.run(&mut progress).expect("sync succeeds");

        assert_eq!(run.strategy, StrategyKind::OpenEndedSearch);
        assert_eq!(run.records.len(), 1);
        assert_eq!(run.records[0].ticket_number.as_deref(), Some("ENG-12"));
        assert!(matches!(
            run.attempts[0].outcome,
            AttemptOutcome::SoftFailure { .. }
        ));
        assert_eq!(run.attempts[1].outcome, AttemptOutcome::Accepted);
        assert_eq!(
            engine.client().tools(),
            vec![NOTION_FETCH_TOOL.to_string(), NOTION_SEARCH_TOOL.to_string()]
        );
        assert_eq!(engine.cache().load(), run.records);
        assert_eq!(
            progress.started,
            vec![StrategyKind::StructuredView, StrategyKind::OpenEndedSearch]
        );
        assert_eq!(progress.ticks, 2);
        assert_eq!(progress.finished.len(), 2);
        assert_eq!(progress.completed, 1);
    }

    #[test]
    fn data_source_id_selects_query_strategy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = TicketCache::new(dir.path().join("tickets.json"));
        let client = ScriptedClient::new(vec![ok(
            r#"{"results": [{"id": "q1", "Name": "Rotate keys", "Status": "To Do"}]}"#,
        )]);
        let engine = SyncEngine::new(client, cache, params(Some(DATA_SOURCE_ID)));

        let run = engine
            .run(&mut crate::progress::NoopProgress)
            .expect("sync succeeds");

        assert_eq!(run.strategy, StrategyKind::StructuredQuery);
        assert_eq!(run.records[0].title, "Rotate keys");
        assert_eq!(engine.client().tools(), vec![NOTION_QUERY_TOOL.to_string()]);
    }

    #[test]
    fn error_envelope_and_empty_output_are_soft_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = TicketCache::new(dir.path().join("tickets.json"));
        let client = ScriptedClient::new(vec![
            ok(r#"{"type": "result", "is_error": true, "result": "tool not allowed"}"#),
            ok("   "),
        ]);
        let engine = SyncEngine::new(client, cache, params(Some(DATA_SOURCE_ID)));

        let err = engine
            .run(&mut crate::progress::NoopProgress)
            .expect_err("every strategy fails");

        match err {
            SyncError::Exhausted { attempts } => {
                assert_eq!(attempts.len(), 2);
                assert!(attempts
                    .iter()
                    .all(|attempt| matches!(attempt.outcome, AttemptOutcome::SoftFailure { .. })));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn exhausted_strategies_leave_cache_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = TicketCache::new(dir.path().join("tickets.json"));
        let previous = vec![TicketRecord {
            id: "keep".to_string(),
            title: "Previous sync".to_string(),
            ..TicketRecord::default()
        }];
        cache.save(&previous).expect("seed cache");

        let client = ScriptedClient::new(vec![
            timeout(),
            Err(AgentError::CommandFailed {
                command: "claude -p ...".to_string(),
                status: Some(1),
                stderr: "not logged in".to_string(),
            }),
        ]);
        let engine = SyncEngine::new(client, cache, params(None));

        let err = engine
            .run(&mut crate::progress::NoopProgress)
            .expect_err("all strategies fail");
        let message = err.to_string();

        assert!(message.contains("--timeout"), "{message}");
        assert!(message.contains("structured-view: timed out after 60s"), "{message}");
        assert!(message.contains("not logged in"), "{message}");
        assert_eq!(engine.cache().load(), previous);
    }

    #[test]
    fn unrecognized_accepted_output_aborts_without_writing_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tickets.json");
        let client = ScriptedClient::new(vec![ok("You have a few tickets, mostly about login.")]);
        let engine = SyncEngine::new(client, TicketCache::new(&path), params(Some(DATA_SOURCE_ID)));
        let err = engine
            .run(&mut crate::progress::NoopProgress)
            .expect_err("prose cannot be normalized");

        assert!(matches!(
            err,
            SyncError::Normalize {
                strategy: StrategyKind::StructuredQuery,
                ..
            }
        ));
        assert!(!path.exists());
    }

    #[test]
    fn error_object_answer_aborts_and_keeps_previous_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = TicketCache::new(dir.path().join("tickets.json"));
        let previous = vec![TicketRecord {
            id: "keep".to_string(),
            title: "Previous sync".to_string(),
            ..TicketRecord::default()
        }];
        cache.save(&previous).expect("seed cache");

        let client = ScriptedClient::new(vec![ok(
            r#"{"object": "error", "status": 404, "code": "object_not_found", "message": "Could not find data source."}"#,
        )]);
        let engine = SyncEngine::new(client, cache, params(Some(DATA_SOURCE_ID)));
        let err = engine
            .run(&mut crate::progress::NoopProgress)
            .expect_err("an error object holds no tickets");

        assert!(matches!(
            err,
            SyncError::Normalize {
                strategy: StrategyKind::StructuredQuery,
                ..
            }
        ));
        assert_eq!(engine.cache().load(), previous);
    }

    #[test]
    fn result_envelope_without_answer_falls_through_to_search() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = TicketCache::new(dir.path().join("tickets.json"));
        let client = ScriptedClient::new(vec![
            ok(r#"{"type": "result", "subtype": "error_max_turns", "is_error": false, "num_turns": 2}"#),
            ok(SEARCH_ANSWER),
        ]);
        let engine = SyncEngine::new(client, cache, params(Some(DATA_SOURCE_ID)));

        let run = engine
            .run(&mut crate::progress::NoopProgress)
            .expect("search answers");

        assert_eq!(run.strategy, StrategyKind::OpenEndedSearch);
        assert!(matches!(
            run.attempts[0].outcome,
            AttemptOutcome::SoftFailure { .. }
        ));
        assert_eq!(engine.cache().load(), run.records);
    }

    #[test]
    fn tolerated_nonzero_exit_is_reported_on_the_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = TicketCache::new(dir.path().join("tickets.json"));
        let output = ProcessOutput {
            exit_code: Some(1),
            exit_tolerated: true,
            ..ok(SEARCH_ANSWER).expect("canned output")
        };
        let client = ScriptedClient::new(vec![Ok(output)]);
        let engine = SyncEngine::new(client, cache, params(Some(DATA_SOURCE_ID)));

        let run = engine
            .run(&mut crate::progress::NoopProgress)
            .expect("tolerated exit still syncs");

        assert!(run.exit_tolerated);
        assert_eq!(run.strategy, StrategyKind::StructuredQuery);
        assert_eq!(run.records.len(), 1);
        assert_eq!(engine.cache().load(), run.records);
    }

    #[test]
    fn missing_user_name_is_rejected_before_any_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut params = params(None);
        params.user_name.clear();
        let engine = SyncEngine::new(
            ScriptedClient::default(),
            TicketCache::new(dir.path().join("tickets.json")),
            params,
        );

        let err = engine
            .run(&mut crate::progress::NoopProgress)
            .expect_err("user name required");
        assert!(matches!(err, SyncError::MissingUserName));
        assert!(engine.client().requests.borrow().is_empty());
    }

    #[test]
    fn discover_persists_data_source_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("config.toml");
        let mut config = TixConfig {
            user_name: "Ada".to_string(),
            notion_database_url: Some(DATABASE_URL.to_string()),
            ..TixConfig::default()
        };
        let client = ScriptedClient::new(vec![ok(
            "<data-source url=\"collection://2f8c1a9e3b4d4e5f8a6b7c8d9e0f1a2b\">",
        )]);
        let engine = SyncEngine::new(
            client,
            TicketCache::new(dir.path().join("tickets.json")),
            params(None),
        );

        let id = engine
            .discover(None, &config_path, &mut config, &mut crate::progress::NoopProgress)
            .expect("discovery succeeds");

        assert_eq!(id, DATA_SOURCE_ID);
        assert_eq!(config.notion_data_source_id.as_deref(), Some(DATA_SOURCE_ID));
        let stored = load_config(&config_path).expect("config written");
        assert_eq!(stored.notion_data_source_id.as_deref(), Some(DATA_SOURCE_ID));
        assert_eq!(stored.user_name, "Ada");
    }

    #[test]
    fn failed_discovery_keeps_previous_data_source_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("config.toml");
        let mut config = TixConfig {
            user_name: "Ada".to_string(),
            notion_database_url: Some(DATABASE_URL.to_string()),
            notion_data_source_id: Some(DATA_SOURCE_ID.to_string()),
            ..TixConfig::default()
        };
        save_config(&config_path, &config).expect("seed config");
        let before = std::fs::read_to_string(&config_path).expect("read config");

        let client = ScriptedClient::new(vec![ok("I could not open that page."), timeout()]);
        let engine = SyncEngine::new(
            client,
            TicketCache::new(dir.path().join("tickets.json")),
            params(Some(DATA_SOURCE_ID)),
        );

        for _ in 0..2 {
            let err = engine
                .discover(
                    Some("https://www.notion.so/acme/other"),
                    &config_path,
                    &mut config,
                    &mut crate::progress::NoopProgress,
                )
                .expect_err("discovery fails");
            assert!(matches!(err, SyncError::Discovery { .. }));
        }

        assert_eq!(config.notion_data_source_id.as_deref(), Some(DATA_SOURCE_ID));
        let after = std::fs::read_to_string(&config_path).expect("read config");
        assert_eq!(before, after);
    }

    #[test]
    fn discover_without_any_database_url_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut params = params(None);
        params.database_url = None;
        let engine = SyncEngine::new(
            ScriptedClient::default(),
            TicketCache::new(dir.path().join("tickets.json")),
            params,
        );

        let err = engine
            .discover(
                Some("  "),
                &dir.path().join("config.toml"),
                &mut TixConfig::default(),
                &mut crate::progress::NoopProgress,
            )
            .expect_err("url required");
        assert!(matches!(err, SyncError::MissingDatabaseUrl));
    }
}
