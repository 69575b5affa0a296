use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::manifest::RequirementsManifest;
use crate::requirement::Requirement;
use crate::version::compare_versions;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlannedAction {
    Install,
    Upgrade,
    Downgrade,
    Reinstall,
    Keep,
}

impl PlannedAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Downgrade => "downgrade",
            Self::Reinstall => "reinstall",
            Self::Keep => "keep",
        }
    }

    fn reinstall_or_keep(force_reinstall: bool) -> Self {
        if force_reinstall {
            Self::Reinstall
        } else {
            Self::Keep
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChange {
    pub requirement: Requirement,
    pub installed: Option<String>,
    pub action: PlannedAction,
}

impl PlannedChange {
    pub fn name(&self) -> &str {
        &self.requirement.name
    }

    pub fn target_version(&self) -> Option<&str> {
        self.requirement.pinned_version()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradePlan {
    pub changes: Vec<PlannedChange>,
    pub force_reinstall: bool,
}

impl UpgradePlan {
    pub fn pending(&self) -> impl Iterator<Item = &PlannedChange> {
        self.changes
            .iter()
            .filter(|change| change.action != PlannedAction::Keep)
    }

    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    /// Install specs for pending changes, split into pinned and loose batches.
    pub fn split_batches(&self) -> (Vec<String>, Vec<String>) {
        let mut pinned = Vec::new();
        let mut loose = Vec::new();
        for change in self.pending() {
            if change.requirement.pinned_version().is_some() {
                pinned.push(change.requirement.install_spec());
            } else {
                loose.push(change.requirement.install_spec());
            }
        }
        (pinned, loose)
    }
}

/// Diffs a manifest against the environment.
///
/// `installed` and `outdated` are keyed by normalized package name.
pub fn build_upgrade_plan(
    manifest: &RequirementsManifest,
    installed: &BTreeMap<String, String>,
    outdated: &BTreeSet<String>,
    force_reinstall: bool,
) -> UpgradePlan {
    let changes = manifest
        .requirements
        .iter()
        .map(|requirement| {
            let key = requirement.normalized_name();
            let current = installed.get(&key).cloned();
            let action = match current.as_deref() {
                None => PlannedAction::Install,
                Some(version) => plan_installed(
                    requirement,
                    version,
                    outdated.contains(&key),
                    force_reinstall,
                ),
            };
            PlannedChange {
                requirement: requirement.clone(),
                installed: current,
                action,
            }
        })
        .collect();

    UpgradePlan {
        changes,
        force_reinstall,
    }
}

fn plan_installed(
    requirement: &Requirement,
    installed: &str,
    outdated: bool,
    force_reinstall: bool,
) -> PlannedAction {
    let satisfied = requirement.is_satisfied_by(installed);
    let unchanged = PlannedAction::reinstall_or_keep(force_reinstall);

    match requirement.pinned_version() {
        Some(_) if satisfied => unchanged,
        Some(pinned) => match compare_versions(pinned, installed) {
            Some(Ordering::Less) => PlannedAction::Downgrade,
            _ => PlannedAction::Upgrade,
        },
        None if !satisfied || outdated => PlannedAction::Upgrade,
        None => unchanged,
    }
}
