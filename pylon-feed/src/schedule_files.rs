//! Load per-series schedule files from a data directory.
//!
//! Files are read in the configured order (top series first), which is the
//! priority order the window evaluator scans in. A missing file is simply not
//! part of the result; an unreadable or malformed one is logged and skipped.

use anyhow::{Context, Result};
use pylon_core::{ScheduleLoader, ScheduleSnapshot, SeriesSchedule};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default file names, Cup first.
pub const DEFAULT_SCHEDULE_FILES: [&str; 3] = ["sched.json", "schedOR.json", "schedTruck.json"];

#[derive(Debug, Clone)]
pub struct FileScheduleLoader {
    dir: PathBuf,
    files: Vec<String>,
}

impl FileScheduleLoader {
    pub fn new(dir: impl Into<PathBuf>, files: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            files,
        }
    }

    pub fn with_default_files(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, DEFAULT_SCHEDULE_FILES.iter().map(|s| s.to_string()).collect())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Read one schedule file. `Ok(None)` when it does not exist.
pub fn read_schedule_file(path: &Path) -> Result<Option<SeriesSchedule>> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };

    let sched: SeriesSchedule =
        serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(sched))
}

impl ScheduleLoader for FileScheduleLoader {
    fn load_schedules(&self) -> Result<ScheduleSnapshot> {
        let mut series = Vec::with_capacity(self.files.len());

        for name in &self.files {
            let path = self.dir.join(name);
            match read_schedule_file(&path) {
                Ok(Some(s)) => series.push(s),
                Ok(None) => debug!(file = %path.display(), "schedule file absent"),
                Err(e) => warn!(file = %path.display(), error = %format!("{e:#}"), "skipping schedule file"),
            }
        }

        Ok(ScheduleSnapshot::new(series))
    }
}
