use std::fmt;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::version::specifier_matches;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SpecifierOp {
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = ">=")]
    GreaterEqual,
    #[serde(rename = "<=")]
    LessEqual,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "~=")]
    Compatible,
    #[serde(rename = "===")]
    Arbitrary,
}

impl SpecifierOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::GreaterEqual => ">=",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::Less => "<",
            Self::Compatible => "~=",
            Self::Arbitrary => "===",
        }
    }

    // Longest operators first so "===" never parses as "==" followed by "=".
    fn split_prefix(input: &str) -> Option<(Self, &str)> {
        const ORDERED: [SpecifierOp; 8] = [
            SpecifierOp::Arbitrary,
            SpecifierOp::Compatible,
            SpecifierOp::Equal,
            SpecifierOp::NotEqual,
            SpecifierOp::GreaterEqual,
            SpecifierOp::LessEqual,
            SpecifierOp::Greater,
            SpecifierOp::Less,
        ];
        ORDERED.iter().find_map(|op| {
            input
                .strip_prefix(op.as_str())
                .map(|rest| (*op, rest.trim()))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSpecifier {
    pub op: SpecifierOp,
    pub version: String,
}

impl VersionSpecifier {
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let (op, version) = SpecifierOp::split_prefix(trimmed)
            .ok_or_else(|| anyhow!("missing comparison operator in specifier '{trimmed}'"))?;
        if version.is_empty() {
            return Err(anyhow!("specifier '{trimmed}' has no version"));
        }
        if version.chars().any(char::is_whitespace) {
            return Err(anyhow!("specifier '{trimmed}' contains whitespace"));
        }
        if version.ends_with(".*") && !matches!(op, SpecifierOp::Equal | SpecifierOp::NotEqual) {
            return Err(anyhow!(
                "wildcard versions are only valid with '==' or '!=': {trimmed}"
            ));
        }
        if op == SpecifierOp::Compatible && !version.contains('.') {
            return Err(anyhow!(
                "'~=' requires at least two release segments: {trimmed}"
            ));
        }

        Ok(Self {
            op,
            version: version.to_string(),
        })
    }

    pub fn is_wildcard(&self) -> bool {
        self.version.ends_with(".*")
    }

    pub fn matches(&self, version: &str) -> bool {
        specifier_matches(self, version)
    }
}

impl fmt::Display for VersionSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.as_str(), self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedHash {
    pub algorithm: String,
    pub hex: String,
}

impl ExpectedHash {
    pub fn parse(value: &str) -> Result<Self> {
        let (algorithm, hex) = value
            .split_once(':')
            .ok_or_else(|| anyhow!("hash must use '<algorithm>:<hex>' form: {value}"))?;
        let algorithm = algorithm.trim().to_ascii_lowercase();
        if algorithm != "sha256" {
            return Err(anyhow!(
                "unsupported hash algorithm '{algorithm}'; only sha256 is accepted"
            ));
        }
        let hex = hex.trim().to_ascii_lowercase();
        if hex.len() != 64 || !hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return Err(anyhow!("sha256 digest must be 64 hex characters: {value}"));
        }

        Ok(Self { algorithm, hex })
    }

    pub fn matches(&self, actual_hex: &str) -> bool {
        self.hex.eq_ignore_ascii_case(actual_hex.trim())
    }
}

impl fmt::Display for ExpectedHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

/// One line of a requirements manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub extras: Vec<String>,
    pub specifiers: Vec<VersionSpecifier>,
    pub marker: Option<String>,
    pub hashes: Vec<ExpectedHash>,
}

impl Requirement {
    /// Parses a single logical requirements line. Blank lines and comments yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let content = strip_comment(line).trim();
        if content.is_empty() {
            return Ok(None);
        }
        if content.starts_with('-') {
            return Err(anyhow!("option lines are not supported: {content}"));
        }

        let (body, hashes) = match content.find(" --") {
            Some(index) => {
                let hashes = parse_hash_options(&content[index + 1..])
                    .with_context(|| format!("invalid options in requirement '{content}'"))?;
                (content[..index].trim(), hashes)
            }
            None => (content, Vec::new()),
        };

        let (body, marker) = match body.split_once(';') {
            Some((head, marker)) => {
                let marker = marker.trim();
                if marker.is_empty() {
                    return Err(anyhow!("empty environment marker in '{content}'"));
                }
                (head.trim(), Some(marker.to_string()))
            }
            None => (body, None),
        };

        if body.contains(" @ ") || body.contains("://") {
            return Err(anyhow!("direct references are not supported: {content}"));
        }

        let name_len = body
            .find(|ch: char| !(ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.')))
            .unwrap_or(body.len());
        let name = &body[..name_len];
        validate_name(name).with_context(|| format!("invalid requirement '{content}'"))?;

        let mut rest = body[name_len..].trim_start();
        let mut extras = Vec::new();
        if let Some(after_bracket) = rest.strip_prefix('[') {
            let Some((inner, tail)) = after_bracket.split_once(']') else {
                return Err(anyhow!("unterminated extras in '{content}'"));
            };
            for extra in inner.split(',').map(str::trim) {
                if extra.is_empty() {
                    return Err(anyhow!("empty extra name in '{content}'"));
                }
                extras.push(extra.to_string());
            }
            rest = tail.trim_start();
        }

        let mut specifiers = Vec::new();
        if !rest.is_empty() {
            for part in rest.split(',') {
                let specifier = VersionSpecifier::parse(part)
                    .with_context(|| format!("invalid version specifier in '{content}'"))?;
                specifiers.push(specifier);
            }
        }

        Ok(Some(Self {
            name: name.to_string(),
            extras,
            specifiers,
            marker,
            hashes,
        }))
    }

    /// Equality that ignores how the name is spelled.
    pub fn same_constraints(&self, other: &Self) -> bool {
        self.normalized_name() == other.normalized_name()
            && self.extras == other.extras
            && self.specifiers == other.specifiers
            && self.marker == other.marker
            && self.hashes == other.hashes
    }

    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    /// The exact version requested by an `==`/`===` specifier, if any.
    pub fn pinned_version(&self) -> Option<&str> {
        self.specifiers
            .iter()
            .find(|spec| {
                matches!(spec.op, SpecifierOp::Equal | SpecifierOp::Arbitrary)
                    && !spec.is_wildcard()
            })
            .map(|spec| spec.version.as_str())
    }

    pub fn is_satisfied_by(&self, version: &str) -> bool {
        self.specifiers.iter().all(|spec| spec.matches(version))
    }

    /// Argument handed to pip for this requirement, without markers or hashes.
    pub fn install_spec(&self) -> String {
        let mut spec = self.name_with_extras();
        match self.pinned_version() {
            Some(version) => {
                spec.push_str("==");
                spec.push_str(version);
            }
            None => spec.push_str(&self.specifier_string()),
        }
        spec
    }

    pub fn specifier_string(&self) -> String {
        self.specifiers
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    fn name_with_extras(&self) -> String {
        if self.extras.is_empty() {
            self.name.clone()
        } else {
            format!("{}[{}]", self.name, self.extras.join(","))
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name_with_extras(), self.specifier_string())?;
        if let Some(marker) = &self.marker {
            write!(f, "; {marker}")?;
        }
        Ok(())
    }
}

/// PEP 503 name normalization.
pub fn normalize_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut previous_separator = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            if !previous_separator {
                normalized.push('-');
            }
            previous_separator = true;
        } else {
            normalized.push(ch.to_ascii_lowercase());
            previous_separator = false;
        }
    }
    normalized
}

fn validate_name(name: &str) -> Result<()> {
    let Some(first) = name.chars().next() else {
        return Err(anyhow!("package name must not be empty"));
    };
    let last = name.chars().last().unwrap_or(first);
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return Err(anyhow!(
            "package name must start and end with a letter or digit: {name}"
        ));
    }
    Ok(())
}

fn strip_comment(line: &str) -> &str {
    let mut previous_whitespace = true;
    for (index, ch) in line.char_indices() {
        if ch == '#' && previous_whitespace {
            return &line[..index];
        }
        previous_whitespace = ch.is_whitespace();
    }
    line
}

fn parse_hash_options(options: &str) -> Result<Vec<ExpectedHash>> {
    let mut hashes = Vec::new();
    let mut tokens = options.split_whitespace();
    while let Some(token) = tokens.next() {
        let value = if token == "--hash" {
            tokens
                .next()
                .ok_or_else(|| anyhow!("'--hash' requires a value"))?
        } else if let Some(value) = token.strip_prefix("--hash=") {
            value
        } else {
            return Err(anyhow!("unsupported per-requirement option '{token}'"));
        };
        hashes.push(ExpectedHash::parse(value)?);
    }
    Ok(hashes)
}
