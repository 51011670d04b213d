//! File-backed snapshot sink.
//!
//! The latest snapshot lives in memory behind an `Arc` swap and on disk as
//! JSON. Disk writes go to a sibling temp file that is renamed over the target,
//! so a reader of the file never sees half a record.

use anyhow::{Context, Result};
use pylon_core::{SnapshotSink, TelemetrySnapshot};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

pub const DEFAULT_SNAPSHOT_FILE: &str = "liveRace.json";

#[derive(Debug)]
pub struct FileSnapshotStore {
    path: PathBuf,
    current: RwLock<Option<Arc<TelemetrySnapshot>>>,
}

impl FileSnapshotStore {
    /// Open the store, picking up any snapshot already on disk as last-known.
    ///
    /// A missing or unreadable file starts the store empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match read_snapshot(&path) {
            Ok(Some(s)) => {
                debug!(file = %path.display(), "loaded last-known snapshot");
                Some(Arc::new(s))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(file = %path.display(), error = %format!("{e:#}"), "ignoring unreadable snapshot");
                None
            }
        };

        Self {
            path,
            current: RwLock::new(current),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read a snapshot file. `Ok(None)` when it does not exist.
pub fn read_snapshot(path: &Path) -> Result<Option<TelemetrySnapshot>> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };
    let snap = serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(snap))
}

/// Write `snapshot` to `path` via temp file + rename.
pub fn write_snapshot_atomic(path: &Path, snapshot: &TelemetrySnapshot) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }

    let json = serde_json::to_string_pretty(snapshot).context("serialize snapshot")?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

impl SnapshotSink for FileSnapshotStore {
    fn latest(&self) -> Option<Arc<TelemetrySnapshot>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, snapshot: TelemetrySnapshot) -> Result<Arc<TelemetrySnapshot>> {
        write_snapshot_atomic(&self.path, &snapshot)?;

        let fresh = Arc::new(snapshot);
        let mut guard = self
            .current
            .write()
            .map_err(|_| anyhow::anyhow!("snapshot slot poisoned"))?;
        *guard = Some(Arc::clone(&fresh));
        Ok(fresh)
    }
}
