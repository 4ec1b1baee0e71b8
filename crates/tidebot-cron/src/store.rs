//! JSON-file-backed job storage.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::StoreError;
use crate::types::{JobStore, STORE_VERSION, ScheduledJob};

/// Loose shape used while loading so one bad job does not drop the rest.
#[derive(Deserialize)]
struct RawStore {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    jobs: Vec<serde_json::Value>,
}

fn default_version() -> u32 {
    STORE_VERSION
}

/// Persistent storage for cron jobs.
pub struct JobStoreFile {
    path: PathBuf,
}

impl JobStoreFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the store.
    ///
    /// A missing file is an empty store. An unreadable or malformed file is
    /// logged and also treated as empty; individual malformed jobs are
    /// skipped.
    pub fn load(&self) -> JobStore {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No cron store yet");
                return JobStore::default();
            }
            Err(e) => {
                warn!(path = %self.path.display(), "Failed to read cron store: {e}");
                return JobStore::default();
            }
        };

        let raw: RawStore = match serde_json::from_str(&content) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %self.path.display(), "Malformed cron store, starting empty: {e}");
                return JobStore::default();
            }
        };

        let jobs = raw
            .jobs
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<ScheduledJob>(value) {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!("Skipping malformed cron job: {e}");
                    None
                }
            })
            .collect();

        JobStore {
            version: raw.version,
            jobs,
        }
    }

    /// Write the store, leaving the heartbeat job out.
    ///
    /// Writes to a sibling temp file and renames it over the target.
    pub fn save(&self, store: &JobStore) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let persisted = JobStore {
            version: store.version,
            jobs: store
                .jobs
                .iter()
                .filter(|job| !job.is_heartbeat())
                .cloned()
                .collect(),
        };
        let content = serde_json::to_string_pretty(&persisted)?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
