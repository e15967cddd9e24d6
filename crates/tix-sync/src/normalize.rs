//! Turns raw assistant output into canonical ticket records.
//!
//! Assistant output has no fixed transport format. It is interpreted by an
//! ordered list of parse attempts; the first one that recognizes the text
//! wins, and when none does the whole sync attempt fails. A partially
//! understood answer is never accepted.

use serde_json::Value;
use std::collections::HashMap;
use tix_core::TicketRecord;
use tracing::{debug, warn};

use crate::field_map::{row_to_record, NormalizeRules, Row};

const EXCERPT_CHARS: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("unable to recognize ticket data in assistant output: {excerpt}")]
    UnrecognizedShape { excerpt: String },
}

type ParseAttempt = fn(&str) -> Option<Vec<Row>>;

/// Shapes tried in order after the code fence is stripped.
const PARSE_ATTEMPTS: [(&str, ParseAttempt); 4] = [
    ("results-object", parse_results_object),
    ("json-array", parse_json_array),
    ("concatenated-objects", parse_concatenated_objects),
    ("markdown-table", parse_markdown_table),
];

/// Output text after removing the `--output-format json` envelope, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeText {
    pub text: String,
    /// The envelope reported `"is_error": true`.
    pub is_error: bool,
}

/// Unwraps `{"result": "..."}`. A `"type": "result"` envelope without a
/// `result` (e.g. `error_max_turns`) carries no answer and yields empty text.
/// Anything that is not such an envelope is returned unchanged.
pub fn unwrap_result_envelope(raw: &str) -> EnvelopeText {
    let passthrough = || EnvelopeText {
        text: raw.to_string(),
        is_error: false,
    };

    let Ok(Value::Object(envelope)) = serde_json::from_str::<Value>(raw.trim()) else {
        return passthrough();
    };
    let is_error = envelope.get("is_error").and_then(Value::as_bool) == Some(true);
    let Some(result) = envelope.get("result") else {
        if envelope.get("type").and_then(Value::as_str) == Some("result") {
            return EnvelopeText {
                text: String::new(),
                is_error,
            };
        }
        return passthrough();
    };

    let text = match result {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    EnvelopeText { text, is_error }
}

/// Removes a surrounding markdown code fence (```` ``` ```` or ```` ```json ````)
/// when the whole blob is fenced.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.len() < 6 || !trimmed.starts_with("```") || !trimmed.ends_with("```") {
        return trimmed;
    }
    let inner = &trimmed[3..trimmed.len() - 3];
    match inner.find('\n') {
        Some(newline) => inner[newline + 1..].trim(),
        None => inner.trim(),
    }
}

/// Runs the parse cascade and returns the raw rows of the first shape that
/// matches.
pub fn parse_rows(raw: &str) -> Result<Vec<Row>, NormalizeError> {
    let unwrapped = unwrap_result_envelope(raw);
    let text = strip_code_fence(&unwrapped.text);

    for (shape, attempt) in PARSE_ATTEMPTS {
        if let Some(rows) = attempt(text) {
            debug!(shape, rows = rows.len(), "recognized assistant output");
            return Ok(rows);
        }
    }

    Err(NormalizeError::UnrecognizedShape {
        excerpt: excerpt(text),
    })
}

pub fn normalize_output(
    raw: &str,
    rules: &NormalizeRules,
) -> Result<Vec<TicketRecord>, NormalizeError> {
    let rows = parse_rows(raw)?;
    let records = dedup_records(&rows, rules);
    // Rows were found but none looks like a ticket (an error object, say).
    if records.is_empty() && !rows.is_empty() {
        return Err(NormalizeError::UnrecognizedShape {
            excerpt: excerpt(raw),
        });
    }
    Ok(drop_completed(records))
}

/// Maps rows to records, keeping the first position of each id and the
/// values of its last occurrence, then drops completed tickets.
pub fn rows_to_records(rows: &[Row], rules: &NormalizeRules) -> Vec<TicketRecord> {
    drop_completed(dedup_records(rows, rules))
}

fn dedup_records(rows: &[Row], rules: &NormalizeRules) -> Vec<TicketRecord> {
    let mut records: Vec<TicketRecord> = Vec::with_capacity(rows.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let Some(record) = row_to_record(row, rules) else {
            warn!(keys = ?row.keys().collect::<Vec<_>>(), "dropping row without an identifier");
            continue;
        };
        match positions.get(&record.id) {
            Some(&position) => records[position] = record,
            None => {
                positions.insert(record.id.clone(), records.len());
                records.push(record);
            }
        }
    }
    records
}

fn drop_completed(mut records: Vec<TicketRecord>) -> Vec<TicketRecord> {
    let before = records.len();
    records.retain(|record| !record.is_completed());
    if records.len() != before {
        debug!(dropped = before - records.len(), "dropped completed tickets");
    }
    records
}

fn parse_results_object(text: &str) -> Option<Vec<Row>> {
    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(text) {
        if let Some(rows) = results_rows(&object) {
            return Some(rows);
        }
    }
    balanced_objects(text).into_iter().find_map(|candidate| {
        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(object)) => results_rows(&object),
            _ => None,
        }
    })
}

fn results_rows(object: &Row) -> Option<Vec<Row>> {
    object
        .get("results")
        .and_then(Value::as_array)
        .map(|items| object_rows(items))
}

fn parse_json_array(text: &str) -> Option<Vec<Row>> {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(text) {
        return array_rows(&items);
    }

    // Array embedded in prose; an object opening first means the brackets
    // belong to that object instead.
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start || text.find('{').is_some_and(|brace| brace < start) {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Array(items)) => array_rows(&items),
        _ => None,
    }
}

fn array_rows(items: &[Value]) -> Option<Vec<Row>> {
    let rows = object_rows(items);
    if rows.is_empty() && !items.is_empty() {
        return None;
    }
    Some(rows)
}

fn object_rows(items: &[Value]) -> Vec<Row> {
    items
        .iter()
        .filter_map(|item| item.as_object().cloned())
        .collect()
}

fn parse_concatenated_objects(text: &str) -> Option<Vec<Row>> {
    let rows: Vec<Row> = balanced_objects(text)
        .into_iter()
        .filter_map(|candidate| match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(object)) => Some(object),
            _ => None,
        })
        .collect();
    if rows.is_empty() {
        None
    } else {
        Some(rows)
    }
}

/// Top-level `{...}` spans of `text`. Braces inside JSON strings are ignored;
/// an unterminated trailing object is dropped.
pub fn balanced_objects(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if depth > 0 && in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '{' => {
                if depth == 0 {
                    start = idx;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push(&text[start..=idx]);
                }
            }
            '"' if depth > 0 => in_string = true,
            _ => {}
        }
    }
    spans
}

fn parse_markdown_table(text: &str) -> Option<Vec<Row>> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();

    let header_idx = (0..lines.len().saturating_sub(1)).find(|&idx| {
        lines[idx].starts_with('|') && is_separator_row(lines[idx + 1])
    })?;

    let headers = split_table_row(lines[header_idx]);
    if headers.iter().all(|header| header.is_empty()) {
        return None;
    }

    let rows = lines[header_idx + 2..]
        .iter()
        .take_while(|line| line.starts_with('|'))
        .map(|line| {
            let cells = split_table_row(line);
            headers
                .iter()
                .zip(cells)
                .filter(|(header, _)| !header.is_empty())
                .map(|(header, cell)| (header.clone(), Value::String(cell)))
                .collect::<Row>()
        })
        .filter(|row| !row.is_empty())
        .collect();
    Some(rows)
}

fn split_table_row(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner.split('|').map(|cell| cell.trim().to_string()).collect()
}

fn is_separator_row(line: &str) -> bool {
    if !line.starts_with('|') {
        return false;
    }
    let cells = split_table_row(line);
    !cells.is_empty()
        && cells.iter().all(|cell| {
            let core = cell.trim_start_matches(':').trim_end_matches(':');
            !core.is_empty() && core.chars().all(|ch| ch == '-')
        })
}

fn excerpt(text: &str) -> String {
    let flat = text.trim().replace('\n', " ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let mut out: String = flat.chars().take(EXCERPT_CHARS).collect();
    out.push_str("...");
    out
}
