//! Canonical ticket types shared by the sync engine and its readers.

use serde::{Deserialize, Serialize};

/// Lowercase status tokens that mark a ticket as finished. Rows carrying one
/// of these are never written to the cache.
pub const COMPLETED_STATUSES: [&str; 12] = [
    "done",
    "complete",
    "completed",
    "closed",
    "resolved",
    "shipped",
    "released",
    "archived",
    "cancelled",
    "canceled",
    "won't do",
    "wont do",
];

pub fn is_completed_status(status: &str) -> bool {
    let lowered = status.trim().to_lowercase();
    COMPLETED_STATUSES.contains(&lowered.as_str())
}

/// A ticket after normalization. `id` is always non-empty for records that
/// reach the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TicketRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_number: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub github_links: Vec<String>,
}

impl TicketRecord {
    pub fn is_completed(&self) -> bool {
        is_completed_status(&self.status)
    }

    /// Matches either the remote id or the short ticket number,
    /// ignoring case.
    pub fn matches_key(&self, key: &str) -> bool {
        let key = key.trim();
        if key.is_empty() {
            return false;
        }
        if self.id.eq_ignore_ascii_case(key) {
            return true;
        }
        self.ticket_number
            .as_deref()
            .is_some_and(|number| number.eq_ignore_ascii_case(key))
    }

    /// Short label for listings: the ticket number when known, otherwise the id.
    pub fn label(&self) -> &str {
        self.ticket_number.as_deref().unwrap_or(&self.id)
    }
}
