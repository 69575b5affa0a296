use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::command::CommandOutput;

/// Everything the executor needs from a Python package manager.
///
/// Installed and outdated names are keyed by their normalized form. Install
/// calls return the captured output so a non-zero exit becomes a `failed`
/// ledger record instead of aborting the run.
pub trait PackageBackend {
    fn describe(&self) -> String;

    fn installed_versions(&self) -> Result<BTreeMap<String, String>>;

    fn outdated(&self) -> Result<BTreeSet<String>>;

    /// Downloads the artifact for `spec` without dependencies into `dest`.
    fn download(&self, spec: &str, dest: &Path) -> Result<PathBuf>;

    fn install_artifact(&self, artifact: &Path, force_reinstall: bool) -> Result<CommandOutput>;

    fn install_specs(&self, specs: &[String], force_reinstall: bool) -> Result<CommandOutput>;

    fn license(&self, name: &str) -> Result<Option<String>>;
}
