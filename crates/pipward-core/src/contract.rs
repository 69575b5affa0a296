//! JSON payloads exchanged with the release orchestrator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::manifest::RequirementsManifest;

pub const CONTRACT_COMMAND: &str = "pipward";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishedArtifact {
    pub main: String,
    #[serde(default)]
    pub anc: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PublishOptions {
    #[serde(default)]
    pub use_user: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContractContext {
    #[serde(default)]
    pub dry_run: Option<bool>,
    #[serde(default)]
    pub verbose: Option<bool>,
    #[serde(default)]
    pub publish_opts: Option<PublishOptions>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClonerInfo {
    #[serde(default)]
    pub target_dir: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ContractParameters {
    pub packages: Vec<String>,
    pub repo_parent_root: String,
    pub published_versions: BTreeMap<String, Option<String>>,
    pub published_artifacts: BTreeMap<String, PublishedArtifact>,
    #[serde(default)]
    pub context: Option<ContractContext>,
    #[serde(default)]
    pub cloner: Option<ClonerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ContractInput {
    pub command: String,
    pub parameters: ContractParameters,
}

impl ContractInput {
    pub fn validate(&self) -> Result<(), FailurePayload> {
        if self.command != CONTRACT_COMMAND {
            return Err(invalid_field(
                "command",
                format!("expected '{CONTRACT_COMMAND}', got '{}'", self.command),
            ));
        }

        let parameters = &self.parameters;
        if parameters.repo_parent_root.trim().is_empty() {
            return Err(FailurePayload::new("repo_parent_root is required")
                .with_detail("field", json!("repo_parent_root")));
        }
        if let Some(index) = parameters
            .packages
            .iter()
            .position(|package| package.trim().is_empty())
        {
            return Err(invalid_field(
                &format!("parameters.packages[{index}]"),
                "package names must not be empty",
            ));
        }
        for (name, version) in &parameters.published_versions {
            if matches!(version.as_deref(), Some(v) if v.trim().is_empty()) {
                return Err(invalid_field(
                    &format!("parameters.published_versions.{name}"),
                    "published version must be a non-empty string or null",
                ));
            }
        }
        for (name, artifact) in &parameters.published_artifacts {
            if artifact.main.trim().is_empty() {
                return Err(invalid_field(
                    &format!("parameters.published_artifacts.{name}.main"),
                    "artifact main path must not be empty",
                ));
            }
            if artifact.anc.iter().any(|path| path.trim().is_empty()) {
                return Err(invalid_field(
                    &format!("parameters.published_artifacts.{name}.anc"),
                    "ancillary artifact paths must not be empty",
                ));
            }
        }
        if let Some(target_dir) = parameters
            .cloner
            .as_ref()
            .and_then(|cloner| cloner.target_dir.as_deref())
        {
            if target_dir.trim().is_empty() {
                return Err(invalid_field(
                    "parameters.cloner.target_dir",
                    "target_dir must not be empty",
                ));
            }
        }

        Ok(())
    }

    pub fn dry_run(&self) -> bool {
        self.parameters
            .context
            .as_ref()
            .and_then(|context| context.dry_run)
            .unwrap_or(false)
    }

    /// Reads `context.publish_opts.use_user`, accepting booleans and truthy strings.
    pub fn use_user(&self) -> bool {
        let value = self
            .parameters
            .context
            .as_ref()
            .and_then(|context| context.publish_opts.as_ref())
            .and_then(|opts| opts.use_user.as_ref());
        match value {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(text)) => {
                matches!(text.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
            }
            _ => false,
        }
    }

    pub fn manifest(&self) -> anyhow::Result<RequirementsManifest> {
        RequirementsManifest::from_published_versions(
            &self.parameters.packages,
            &self.parameters.published_versions,
        )
    }
}

/// Parses and validates an input payload, mapping every problem to a failure payload.
pub fn parse_contract_input(raw: &str) -> Result<ContractInput, FailurePayload> {
    let input: ContractInput = serde_json::from_str(raw).map_err(|err| {
        FailurePayload::new("input payload failed validation")
            .with_detail("error", json!(err.to_string()))
            .with_detail("line", json!(err.line()))
            .with_detail("column", json!(err.column()))
    })?;
    input.validate()?;
    Ok(input)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailureStatus {
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailurePayload {
    pub status: FailureStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
}

impl FailurePayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: FailureStatus::Failure,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

fn invalid_field(path: &str, message: impl Into<String>) -> FailurePayload {
    FailurePayload::new("input payload failed validation")
        .with_detail("path", json!(path))
        .with_detail("error", json!(message.into()))
}
