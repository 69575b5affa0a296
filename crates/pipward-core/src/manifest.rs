use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{anyhow, Context};

use crate::requirement::{normalize_name, Requirement, SpecifierOp, VersionSpecifier};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequirementsManifest {
    pub requirements: Vec<Requirement>,
}

impl RequirementsManifest {
    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let mut requirements: Vec<Requirement> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for (line_no, line) in logical_lines(input) {
            let parsed = Requirement::parse(&line)
                .with_context(|| format!("requirements line {line_no} is invalid"))?;
            let Some(requirement) = parsed else {
                continue;
            };

            let key = requirement.normalized_name();
            if let Some(index) = seen.get(&key) {
                if requirements[*index].same_constraints(&requirement) {
                    continue;
                }
                return Err(anyhow!(
                    "requirements line {line_no}: package '{}' is listed more than once with different constraints",
                    requirement.name
                ));
            }
            seen.insert(key, requirements.len());
            requirements.push(requirement);
        }

        let hashed = requirements.iter().filter(|r| !r.hashes.is_empty()).count();
        if hashed > 0 && hashed < requirements.len() {
            let missing = requirements
                .iter()
                .filter(|r| r.hashes.is_empty())
                .map(|r| r.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(anyhow!(
                "hash checking is all-or-nothing; requirements without --hash: {missing}"
            ));
        }

        Ok(Self { requirements })
    }

    /// Builds a manifest from an orchestrator package list; published versions become pins.
    pub fn from_published_versions(
        packages: &[String],
        published_versions: &BTreeMap<String, Option<String>>,
    ) -> anyhow::Result<Self> {
        let mut requirements = Vec::new();
        let mut seen = HashSet::new();
        for package in packages.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
            if !seen.insert(normalize_name(package)) {
                continue;
            }
            let mut requirement = Requirement::parse(package)
                .with_context(|| format!("invalid package name '{package}'"))?
                .ok_or_else(|| anyhow!("invalid package name '{package}'"))?;
            if !requirement.specifiers.is_empty() {
                return Err(anyhow!(
                    "package '{package}' must be a bare name; versions come from published_versions"
                ));
            }
            let published = published_versions
                .get(package)
                .or_else(|| {
                    published_versions
                        .iter()
                        .find(|(name, _)| normalize_name(name) == normalize_name(package))
                        .map(|(_, version)| version)
                })
                .and_then(|version| version.as_deref())
                .filter(|version| !version.trim().is_empty());
            if let Some(version) = published {
                requirement.specifiers.push(VersionSpecifier {
                    op: SpecifierOp::Equal,
                    version: version.trim().to_string(),
                });
            }
            requirements.push(requirement);
        }
        Ok(Self { requirements })
    }

    pub fn requires_hashes(&self) -> bool {
        self.requirements.iter().any(|r| !r.hashes.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.requirements.iter().map(|r| r.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Requirement> {
        let key = normalize_name(name);
        self.requirements
            .iter()
            .find(|requirement| requirement.normalized_name() == key)
    }
}

// Joins backslash continuations, reporting the line number where each logical line starts.
fn logical_lines(input: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (index, raw) in input.lines().enumerate() {
        let (start, mut buffer) = pending
            .take()
            .unwrap_or_else(|| (index + 1, String::new()));
        let trimmed_end = raw.trim_end();
        match trimmed_end.strip_suffix('\\') {
            Some(head) => {
                buffer.push_str(head);
                buffer.push(' ');
                pending = Some((start, buffer));
            }
            None => {
                buffer.push_str(trimmed_end);
                lines.push((start, buffer));
            }
        }
    }
    if let Some(rest) = pending {
        lines.push(rest);
    }
    lines
}
