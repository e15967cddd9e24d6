//! Maps loosely keyed rows onto [`TicketRecord`] fields.
//!
//! The remote schema is user-defined, so every canonical field is looked up
//! through a list of candidate keys. Keys compare case-insensitively with
//! spaces, underscores and hyphens ignored.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tix_core::TicketRecord;

pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    Id,
    TicketNumber,
    Title,
    Status,
    Priority,
    LastUpdated,
    Url,
}

/// Candidate keys per canonical field, in priority order.
pub const FIELD_SYNONYMS: [(CanonicalField, &[&str]); 7] = [
    (CanonicalField::Id, &["id", "page_id", "notion_id", "pageid"]),
    (
        CanonicalField::TicketNumber,
        &[
            "ticket_number",
            "ticketnumber",
            "ticket_id",
            "ticket_no",
            "number",
            "key",
        ],
    ),
    (CanonicalField::Title, &["title", "name", "task", "ticket"]),
    (CanonicalField::Status, &["status", "state"]),
    (CanonicalField::Priority, &["priority", "urgency"]),
    (
        CanonicalField::LastUpdated,
        &[
            "last_updated",
            "last_edited_time",
            "last_edited",
            "updated_at",
            "updated",
            "modified",
        ],
    ),
    (
        CanonicalField::Url,
        &["url", "link", "page_url", "notion_url"],
    ),
];

/// Settings that shape how rows become records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeRules {
    /// Prefix applied to ticket numbers that carry no `-` separator.
    pub ticket_prefix: String,
}

impl Default for NormalizeRules {
    fn default() -> Self {
        Self {
            ticket_prefix: tix_core::DEFAULT_TICKET_PREFIX.to_string(),
        }
    }
}

static GITHUB_LINK_REGEX: OnceLock<Regex> = OnceLock::new();
static TITLE_TICKET_REGEX: OnceLock<Regex> = OnceLock::new();
static URL_ID_REGEX: OnceLock<Regex> = OnceLock::new();

fn github_link_regex() -> &'static Regex {
    GITHUB_LINK_REGEX.get_or_init(|| {
        Regex::new(r#"https?://(?:www\.)?github\.com/[^\s"'<>()\[\]{}|,]+"#)
            .expect("github link regex should compile")
    })
}

fn title_ticket_regex() -> &'static Regex {
    TITLE_TICKET_REGEX.get_or_init(|| {
        Regex::new(r"\b[A-Z][A-Z0-9]{1,9}-\d+\b").expect("ticket number regex should compile")
    })
}

fn url_id_regex() -> &'static Regex {
    URL_ID_REGEX
        .get_or_init(|| Regex::new(r"(?i)[0-9a-f]{32}").expect("url id regex should compile"))
}

pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|ch| !matches!(ch, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn candidates(field: CanonicalField) -> &'static [&'static str] {
    FIELD_SYNONYMS
        .iter()
        .find(|(canonical, _)| *canonical == field)
        .map(|(_, keys)| *keys)
        .unwrap_or(&[])
}

/// First non-blank value stored under any candidate key for `field`.
pub fn lookup(row: &Row, field: CanonicalField) -> Option<&Value> {
    for candidate in candidates(field) {
        let wanted = normalize_key(candidate);
        let found = row
            .iter()
            .find(|(key, value)| normalize_key(key) == wanted && !value_to_text(value).is_empty());
        if let Some((_, value)) = found {
            return Some(value);
        }
    }
    None
}

pub fn lookup_text(row: &Row, field: CanonicalField) -> String {
    lookup(row, field).map(value_to_text).unwrap_or_default()
}

/// Flattens a value into display text. Objects contribute their most
/// name-like member, arrays are joined with `", "`.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.trim().to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(map) => ["name", "plain_text", "title", "content", "start", "url", "value"]
            .iter()
            .find_map(|key| {
                map.get(*key)
                    .map(value_to_text)
                    .filter(|text| !text.is_empty())
            })
            .unwrap_or_default(),
    }
}

/// Lifts a nested Notion `properties` object into the row itself, reducing
/// typed property values to plain JSON. Existing top-level keys win.
pub fn flatten_properties(row: &Row) -> Row {
    let Some(Value::Object(properties)) = row.get("properties") else {
        return row.clone();
    };

    let mut flat: Row = row
        .iter()
        .filter(|(key, _)| key.as_str() != "properties")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    for (name, property) in properties {
        let (key, value) = if property_type(property) == Some("unique_id") {
            ("ticket_number".to_string(), plain_property_value(property))
        } else {
            (name.clone(), plain_property_value(property))
        };
        let normalized = normalize_key(&key);
        if flat.keys().any(|existing| normalize_key(existing) == normalized) {
            continue;
        }
        flat.insert(key, value);
    }
    flat
}

fn property_type(property: &Value) -> Option<&str> {
    property.get("type").and_then(Value::as_str)
}

fn plain_property_value(property: &Value) -> Value {
    let Some(kind) = property_type(property) else {
        return property.clone();
    };
    let inner = property.get(kind).cloned().unwrap_or(Value::Null);
    match kind {
        "title" | "rich_text" => Value::String(
            inner
                .as_array()
                .map(|parts| {
                    parts
                        .iter()
                        .filter_map(|part| part.get("plain_text").and_then(Value::as_str))
                        .collect::<String>()
                })
                .unwrap_or_default(),
        ),
        "select" | "status" => inner.get("name").cloned().unwrap_or(Value::Null),
        "multi_select" | "people" => Value::Array(
            inner
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.get("name").cloned())
                        .collect()
                })
                .unwrap_or_default(),
        ),
        "date" => inner.get("start").cloned().unwrap_or(Value::Null),
        "unique_id" => {
            let number = inner.get("number").map(value_to_text).unwrap_or_default();
            match inner.get("prefix").and_then(Value::as_str) {
                Some(prefix) if !prefix.is_empty() && !number.is_empty() => {
                    Value::String(format!("{prefix}-{number}"))
                }
                _ => Value::String(number),
            }
        }
        "formula" => property_type(&inner)
            .and_then(|formula_kind| inner.get(formula_kind).cloned())
            .unwrap_or(Value::Null),
        _ => inner,
    }
}

/// Every GitHub URL found in any value of the row, in the order the keys
/// appeared in the assistant's output.
pub fn harvest_github_links(row: &Row) -> Vec<String> {
    let mut links = Vec::new();
    for value in row.values() {
        collect_links(value, &mut links);
    }
    links
}

fn collect_links(value: &Value, links: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            for found in github_link_regex().find_iter(text) {
                let link = found
                    .as_str()
                    .trim_end_matches(['.', ';', ':', '!', '?'])
                    .to_string();
                if !links.contains(&link) {
                    links.push(link);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_links(item, links);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_links(item, links);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

pub fn normalize_ticket_number(raw: &str, prefix: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('#').trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains('-') || prefix.trim().is_empty() {
        return Some(trimmed.to_string());
    }
    Some(format!("{}-{trimmed}", prefix.trim().trim_end_matches('-')))
}

fn ticket_number_from_title(title: &str) -> Option<String> {
    title_ticket_regex()
        .find(title)
        .map(|found| found.as_str().to_string())
}

fn id_from_url(url: &str) -> Option<String> {
    url_id_regex()
        .find_iter(url)
        .last()
        .map(|found| found.as_str().to_lowercase())
}

fn id_from_title(title: &str) -> Option<String> {
    let slug = title
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        None
    } else {
        Some(format!("local-{slug}"))
    }
}

/// Builds a record from one raw row. Returns `None` when no identifier can be
/// found or derived.
pub fn row_to_record(row: &Row, rules: &NormalizeRules) -> Option<TicketRecord> {
    let row = flatten_properties(row);

    let title = lookup_text(&row, CanonicalField::Title);
    let url = lookup_text(&row, CanonicalField::Url);
    let ticket_number = normalize_ticket_number(
        &lookup_text(&row, CanonicalField::TicketNumber),
        &rules.ticket_prefix,
    )
    .or_else(|| ticket_number_from_title(&title));

    let explicit_id = lookup_text(&row, CanonicalField::Id);
    let id = if explicit_id.is_empty() {
        id_from_url(&url)
            .or_else(|| ticket_number.clone())
            .or_else(|| id_from_title(&title))?
    } else {
        explicit_id
    };

    Some(TicketRecord {
        id,
        ticket_number,
        title,
        status: lookup_text(&row, CanonicalField::Status),
        priority: lookup_text(&row, CanonicalField::Priority),
        last_updated: lookup_text(&row, CanonicalField::LastUpdated),
        url,
        github_links: harvest_github_links(&row),
    })
}
