//! Timestamped experiment session log.
//!
//! One line per event, `[YYYY-MM-DD HH:MM:SS] message`, appended to a plain
//! text file that survives across sessions.

use crate::error::Result;
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time in the session log format.
pub fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Append-only session log.
#[derive(Debug, Clone)]
pub struct SessionLog {
    path: PathBuf,
}

impl SessionLog {
    /// Open (or create) the log, creating its parent directory if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line.
    pub fn write(&self, message: &str) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "[{}] {}", timestamp(), message)?;
        file.flush()?;
        Ok(())
    }

    pub fn session_started(&self, project: &str) -> Result<()> {
        info!(project, "Experiment session started");
        self.write(&format!("Experiment session started.EXECUTING: {project}"))
    }

    pub fn session_ended(&self, project: &str) -> Result<()> {
        info!(project, "Experiment session ended");
        self.write(&format!("Experiment session ended.EXECUTED: {project}"))
    }

    pub fn run_progress(&self, project: &str, run: u64, total: u64) -> Result<()> {
        info!(project, run, total, "Grid point finished");
        self.write(&format!("EXECUTING.{project} RUN {run} OF {total}"))
    }

    pub fn session_failed(&self, project: &str, err: &dyn std::fmt::Display) -> Result<()> {
        error!(project, error = %err, "Experiment session failed");
        self.write(&format!("ERROR: {project}. {err}"))
    }
}
