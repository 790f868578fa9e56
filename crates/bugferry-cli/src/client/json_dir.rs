//! Source tracker over a directory of exported `<bug_id>.json` records.

use std::path::{Path, PathBuf};

use bugferry_core::model::BugRecord;
use bugferry_core::store::{SourceTracker, StoreError, StoreResult};
use tracing::info;

#[derive(Debug, Clone)]
pub struct JsonBugDirectory {
    dir: PathBuf,
}

impl JsonBugDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, bug_id: u64) -> PathBuf {
        self.dir.join(format!("{bug_id}.json"))
    }
}

fn read_record(path: &Path) -> StoreResult<BugRecord> {
    let content = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        context: format!("failed to read {}", path.display()),
        source,
    })?;
    serde_json::from_str(&content).map_err(|err| StoreError::Decode {
        url: path.display().to_string(),
        reason: err.to_string(),
    })
}

impl SourceTracker for JsonBugDirectory {
    fn read_bug(&self, bug_id: u64) -> StoreResult<BugRecord> {
        let path = self.path_for(bug_id);
        if !path.exists() {
            return Err(StoreError::NotFound {
                what: format!("bug {bug_id} in {}", self.dir.display()),
            });
        }
        let record = read_record(&path)?;
        if record.bug_id != bug_id {
            return Err(StoreError::Decode {
                url: path.display().to_string(),
                reason: format!("file holds bug {}", record.bug_id),
            });
        }
        Ok(record)
    }

    /// Exported records are read-only; closing is logged and skipped.
    fn close_bug(&self, bug_id: u64, status: &str, resolution: &str, _: &str) -> StoreResult<()> {
        info!(bug_id, status, resolution, "offline source, not closing bug");
        Ok(())
    }
}
