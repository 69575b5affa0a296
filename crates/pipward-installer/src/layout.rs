use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn ledgers_dir(&self) -> PathBuf {
        self.root.join("ledgers")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    pub fn run_download_dir(&self, run_id: &str) -> PathBuf {
        self.downloads_dir().join(run_id)
    }

    pub fn ledger_path(&self, run_id: &str) -> PathBuf {
        self.ledgers_dir().join(format!("{run_id}.json"))
    }

    pub fn report_path(&self, run_id: &str) -> PathBuf {
        self.reports_dir().join(format!("{run_id}.json"))
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [self.reports_dir(), self.ledgers_dir(), self.downloads_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create state dir: {}", dir.display()))?;
        }
        Ok(())
    }
}

/// `$PIPWARD_HOME`, else `.pipward` under the user's home directory.
pub fn default_state_root() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os("PIPWARD_HOME").filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(home));
    }

    if cfg!(windows) {
        let profile = std::env::var("USERPROFILE")
            .context("USERPROFILE is not set; cannot resolve pipward state dir")?;
        return Ok(PathBuf::from(profile).join(".pipward"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve pipward state dir")?;
    Ok(PathBuf::from(home).join(".pipward"))
}
