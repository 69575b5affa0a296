use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pipward_core::RunMode;
use pipward_installer::{default_state_root, AuditConfig, RunOptions, StateLayout};
use pipward_security::LicensePolicy;
use serde::Deserialize;

pub(crate) const CONFIG_FILE_NAME: &str = "pipward.toml";

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub(crate) struct ConfigFile {
    pub(crate) python: Option<PathBuf>,
    pub(crate) user: Option<bool>,
    pub(crate) state_dir: Option<PathBuf>,
    pub(crate) retry_mismatches: Option<bool>,
    pub(crate) keep_downloads: Option<bool>,
    #[serde(default)]
    pub(crate) license: LicenseSection,
    #[serde(default)]
    pub(crate) audit: AuditSection,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub(crate) struct LicenseSection {
    pub(crate) denied: Option<Vec<String>>,
    pub(crate) allow_unknown: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub(crate) struct AuditSection {
    pub(crate) pip_audit: Option<PathBuf>,
    pub(crate) pipdeptree: Option<PathBuf>,
}

/// Environment variables that override the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct EnvOverrides {
    pub(crate) home: Option<PathBuf>,
    pub(crate) python: Option<PathBuf>,
}

impl EnvOverrides {
    pub(crate) fn from_process() -> Self {
        let read = |key: &str| {
            std::env::var_os(key)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        };
        Self {
            home: read("PIPWARD_HOME"),
            python: read("PIPWARD_PYTHON"),
        }
    }
}

/// Command-line flags that override everything else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FlagOverrides {
    pub(crate) python: Option<PathBuf>,
    pub(crate) state_dir: Option<PathBuf>,
    pub(crate) user: bool,
    pub(crate) no_retry: bool,
    pub(crate) keep_downloads: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Settings {
    pub(crate) python: PathBuf,
    pub(crate) user: bool,
    pub(crate) state_root: PathBuf,
    pub(crate) retry_mismatches: bool,
    pub(crate) keep_downloads: bool,
    pub(crate) license_policy: LicensePolicy,
    pub(crate) audit: AuditConfig,
}

impl Settings {
    pub(crate) fn layout(&self) -> StateLayout {
        StateLayout::new(&self.state_root)
    }

    pub(crate) fn run_options(&self, mode: RunMode) -> RunOptions {
        RunOptions {
            mode,
            license_policy: self.license_policy.clone(),
            retry_mismatches: self.retry_mismatches,
            keep_downloads: self.keep_downloads,
            downloads_dir: self.layout().downloads_dir(),
        }
    }
}

pub(crate) fn parse_config(raw: &str) -> Result<ConfigFile> {
    toml::from_str(raw).context("failed to parse pipward config")
}

/// Reads an explicit config path, or `./pipward.toml` when it exists.
pub(crate) fn load_config_file(explicit: Option<&Path>) -> Result<ConfigFile> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let candidate = PathBuf::from(CONFIG_FILE_NAME);
            if !candidate.is_file() {
                return Ok(ConfigFile::default());
            }
            candidate
        }
    };

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    parse_config(&raw).with_context(|| format!("invalid config: {}", path.display()))
}

pub(crate) fn resolve_settings(
    file: ConfigFile,
    env: &EnvOverrides,
    flags: &FlagOverrides,
) -> Result<Settings> {
    let python = flags
        .python
        .clone()
        .or_else(|| env.python.clone())
        .or(file.python)
        .unwrap_or_else(default_python);

    let state_root = match flags
        .state_dir
        .clone()
        .or_else(|| env.home.clone())
        .or(file.state_dir)
    {
        Some(root) => root,
        None => default_state_root()?,
    };

    let mut license_policy = LicensePolicy::default();
    if let Some(denied) = file.license.denied {
        license_policy.denied = denied;
    }
    if let Some(allow_unknown) = file.license.allow_unknown {
        license_policy.allow_unknown = allow_unknown;
    }

    Ok(Settings {
        python,
        user: flags.user || file.user.unwrap_or(false),
        state_root,
        retry_mismatches: !flags.no_retry && file.retry_mismatches.unwrap_or(true),
        keep_downloads: flags.keep_downloads || file.keep_downloads.unwrap_or(false),
        license_policy,
        audit: AuditConfig {
            pip_audit: file.audit.pip_audit,
            pipdeptree: file.audit.pipdeptree,
        },
    })
}

fn default_python() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("python")
    } else {
        PathBuf::from("python3")
    }
}
