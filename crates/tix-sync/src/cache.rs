use chrono::{DateTime, Local};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tix_core::TicketRecord;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to create cache directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize ticket cache: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write ticket cache at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to replace ticket cache {path}: {source}")]
    Rename {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Local snapshot of the last successful sync. Every save replaces the whole
/// file; records are never merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketCache {
    path: PathBuf,
}

/// What `tix status` shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSnapshot {
    pub records: Vec<TicketRecord>,
    pub last_synced_at: Option<DateTime<Local>>,
}

impl TicketCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    /// Writes `records` to a temporary sibling and renames it over the
    /// snapshot. On error the previous snapshot is left in place.
    pub fn save(&self, records: &[TicketRecord]) -> Result<(), CacheError> {
        if let Some(parent) = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
        {
            fs::create_dir_all(parent).map_err(|source| CacheError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let body =
            serde_json::to_string_pretty(records).map_err(|source| CacheError::Serialize { source })?;
        let temp = self.temp_path();
        fs::write(&temp, body).map_err(|source| CacheError::Write {
            path: temp.clone(),
            source,
        })?;
        if let Err(source) = fs::rename(&temp, &self.path) {
            let _ = fs::remove_file(&temp);
            return Err(CacheError::Rename {
                path: self.path.clone(),
                source,
            });
        }

        debug!(path = %self.path.display(), records = records.len(), "ticket cache saved");
        Ok(())
    }

    /// Cached records. A missing file is an empty cache; an unreadable or
    /// corrupt one is logged and also treated as empty.
    pub fn load(&self) -> Vec<TicketRecord> {
        let body = match fs::read_to_string(&self.path) {
            Ok(body) => body,
            Err(err) if err.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "ticket cache unreadable; treating as empty");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<TicketRecord>>(&body) {
            Ok(records) => records,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "ticket cache corrupt; treating as empty");
                Vec::new()
            }
        }
    }

    pub fn last_synced_at(&self) -> Option<DateTime<Local>> {
        let modified = fs::metadata(&self.path).ok()?.modified().ok()?;
        Some(DateTime::<Local>::from(modified))
    }

    pub fn find(&self, key: &str) -> Option<TicketRecord> {
        self.load().into_iter().find(|record| record.matches_key(key))
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            records: self.load(),
            last_synced_at: self.last_synced_at(),
        }
    }
}
