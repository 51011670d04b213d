use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

pub fn pylon_home() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".pylon"))
}

pub fn ensure_pylon_home() -> Result<PathBuf> {
    let dir = pylon_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

/// Default data directory for schedules and the live snapshot.
pub fn default_data_dir() -> Result<PathBuf> {
    Ok(pylon_home()?.join("data"))
}
