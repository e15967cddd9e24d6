use regex::Regex;
use std::sync::OnceLock;
use tix_agents::AssistantRequest;

use crate::strategy::{
    single_tool_request, strategy_timeout, StrategyKind, SyncParams, NOTION_FETCH_TOOL,
};

static COLLECTION_ID_REGEX: OnceLock<Regex> = OnceLock::new();
static UUID_REGEX: OnceLock<Regex> = OnceLock::new();

const UUID_PATTERN: &str =
    r"[0-9a-fA-F]{8}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{12}";

fn collection_id_regex() -> &'static Regex {
    COLLECTION_ID_REGEX.get_or_init(|| {
        Regex::new(&format!(r"collection://({UUID_PATTERN})\b"))
            .expect("collection id regex should compile")
    })
}

fn uuid_regex() -> &'static Regex {
    UUID_REGEX.get_or_init(|| {
        Regex::new(&format!(r"\b{UUID_PATTERN}\b")).expect("uuid regex should compile")
    })
}

pub fn build_discovery_request(database_url: &str, params: &SyncParams) -> AssistantRequest {
    let prompt = format!(
        "Fetch the Notion database at {database_url} with the notion-fetch tool. Reply with \
         the data source identifier it contains (the value after collection://) and nothing \
         else."
    );
    single_tool_request(
        prompt,
        NOTION_FETCH_TOOL,
        strategy_timeout(StrategyKind::StructuredView, params),
        params,
    )
}

/// Finds the data source identifier in a fetch answer.
///
/// A UUID that follows `collection://` wins. Otherwise the first UUID-shaped
/// token that is not the database's own page id (the last UUID in the path
/// of `database_url`) is used. The result is lowercase and hyphenated.
pub fn extract_data_source_id(output: &str, database_url: &str) -> Option<String> {
    if let Some(found) = collection_id_regex()
        .captures_iter(output)
        .filter_map(|captures| captures.get(1))
        .find_map(|id| canonical_uuid(id.as_str()))
    {
        return Some(found);
    }

    let url_path = database_url.split('?').next().unwrap_or(database_url);
    let database_id = uuid_regex()
        .find_iter(url_path)
        .last()
        .and_then(|id| canonical_uuid(id.as_str()));

    uuid_regex()
        .find_iter(output)
        .filter_map(|id| canonical_uuid(id.as_str()))
        .find(|id| Some(id) != database_id.as_ref())
}

/// Lowercase 8-4-4-4-12 form of a UUID written with or without hyphens.
fn canonical_uuid(raw: &str) -> Option<String> {
    let hex: String = raw
        .chars()
        .filter(|ch| *ch != '-')
        .map(|ch| ch.to_ascii_lowercase())
        .collect();
    if hex.len() != 32 || !hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    ))
}
