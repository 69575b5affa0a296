use std::cmp::Ordering;
use std::fmt;

use crate::requirement::{SpecifierOp, VersionSpecifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreLabel {
    Alpha,
    Beta,
    Rc,
}

impl PreLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alpha => "a",
            Self::Beta => "b",
            Self::Rc => "rc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LocalSegment {
    Text(String),
    Number(u64),
}

impl Ord for LocalSegment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(left), Self::Number(right)) => left.cmp(right),
            (Self::Text(left), Self::Text(right)) => left.cmp(right),
            (Self::Text(_), Self::Number(_)) => Ordering::Less,
            (Self::Number(_), Self::Text(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for LocalSegment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for LocalSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(number) => write!(f, "{number}"),
        }
    }
}

// Declaration order is sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PreKey {
    DevOnly,
    Pre(PreLabel, u64),
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum DevKey {
    Dev(u64),
    Release,
}

/// A parsed PEP 440 version, ordered by epoch, release, pre, post, dev
/// and local label in that order.
#[derive(Debug, Clone)]
pub struct PythonVersion {
    epoch: u64,
    release: Vec<u64>,
    pre: Option<(PreLabel, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
    local: Vec<LocalSegment>,
}

impl PythonVersion {
    /// Parses the PEP 440 forms pip reports, including alternate spellings
    /// (`alpha`, `preview`, `rev`, `-N` post releases, a leading `v`).
    /// Returns `None` for anything else.
    pub fn parse(text: &str) -> Option<Self> {
        let lowered = text.trim().to_ascii_lowercase();
        let lowered = lowered.strip_prefix('v').unwrap_or(&lowered);
        let (public, local) = match lowered.split_once('+') {
            Some((public, local)) => (public, Some(local)),
            None => (lowered, None),
        };
        let (epoch, public) = match public.split_once('!') {
            Some((epoch, rest)) => (epoch.parse().ok()?, rest),
            None => (0, public),
        };

        let (release, mut tail) = split_release(public)?;

        const PRE_LABELS: [&str; 8] = ["alpha", "beta", "preview", "pre", "rc", "a", "b", "c"];
        let mut pre = None;
        if let Some((label, number, rest)) = take_labeled(tail, &PRE_LABELS) {
            let label = match label {
                "alpha" | "a" => PreLabel::Alpha,
                "beta" | "b" => PreLabel::Beta,
                _ => PreLabel::Rc,
            };
            pre = Some((label, number));
            tail = rest;
        }

        let mut post = None;
        if let Some((_, number, rest)) = take_labeled(tail, &["post", "rev", "r"]) {
            post = Some(number);
            tail = rest;
        } else if let Some((number, rest)) = take_implicit_post(tail) {
            post = Some(number);
            tail = rest;
        }

        let mut dev = None;
        if let Some((_, number, rest)) = take_labeled(tail, &["dev"]) {
            dev = Some(number);
            tail = rest;
        }
        if !tail.is_empty() {
            return None;
        }

        let local = match local {
            Some(local) => parse_local(local)?,
            None => Vec::new(),
        };

        Some(Self {
            epoch,
            release,
            pre,
            post,
            dev,
            local,
        })
    }

    pub fn release(&self) -> &[u64] {
        &self.release
    }

    pub fn has_local(&self) -> bool {
        !self.local.is_empty()
    }

    /// Compares everything except the local label.
    pub fn cmp_public(&self, other: &Self) -> Ordering {
        self.public_key().cmp(&other.public_key())
    }

    fn public_key(&self) -> (u64, &[u64], PreKey, Option<u64>, DevKey) {
        let significant = self
            .release
            .iter()
            .rposition(|segment| *segment != 0)
            .map_or(0, |index| index + 1);
        let pre = match (self.pre, self.post, self.dev) {
            (Some((label, number)), _, _) => PreKey::Pre(label, number),
            (None, None, Some(_)) => PreKey::DevOnly,
            _ => PreKey::Final,
        };
        let dev = self.dev.map_or(DevKey::Release, DevKey::Dev);
        (self.epoch, &self.release[..significant], pre, self.post, dev)
    }
}

impl Ord for PythonVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_public(other).then_with(|| self.local.cmp(&other.local))
    }
}

impl PartialOrd for PythonVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PythonVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PythonVersion {}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let release = self
            .release
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".");
        f.write_str(&release)?;
        if let Some((label, number)) = self.pre {
            write!(f, "{}{number}", label.as_str())?;
        }
        if let Some(post) = self.post {
            write!(f, ".post{post}")?;
        }
        if let Some(dev) = self.dev {
            write!(f, ".dev{dev}")?;
        }
        if !self.local.is_empty() {
            let local = self
                .local
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(".");
            write!(f, "+{local}")?;
        }
        Ok(())
    }
}

/// Orders two pip versions; `None` when they cannot be compared.
pub fn compare_versions(left: &str, right: &str) -> Option<Ordering> {
    match (PythonVersion::parse(left), PythonVersion::parse(right)) {
        (Some(left), Some(right)) => Some(left.cmp(&right)),
        _ if left.trim().eq_ignore_ascii_case(right.trim()) => Some(Ordering::Equal),
        _ => None,
    }
}

pub fn specifier_matches(spec: &VersionSpecifier, candidate: &str) -> bool {
    if spec.op == SpecifierOp::Arbitrary {
        return spec.version.eq_ignore_ascii_case(candidate.trim());
    }

    if let Some(prefix) = spec.version.strip_suffix(".*") {
        let matched = release_prefix_matches(prefix, candidate);
        return match spec.op {
            SpecifierOp::Equal => matched,
            SpecifierOp::NotEqual => !matched,
            _ => false,
        };
    }

    let (Some(wanted), Some(actual)) = (
        PythonVersion::parse(&spec.version),
        PythonVersion::parse(candidate),
    ) else {
        let same = spec.version.eq_ignore_ascii_case(candidate.trim());
        return match spec.op {
            SpecifierOp::Equal => same,
            SpecifierOp::NotEqual => !same,
            _ => false,
        };
    };

    match spec.op {
        SpecifierOp::Equal => equal_ignoring_local(&wanted, &actual),
        SpecifierOp::NotEqual => !equal_ignoring_local(&wanted, &actual),
        SpecifierOp::GreaterEqual => actual >= wanted,
        SpecifierOp::LessEqual => actual <= wanted,
        SpecifierOp::Greater => actual > wanted,
        SpecifierOp::Less => actual < wanted,
        SpecifierOp::Compatible => {
            let segments = wanted.release();
            let prefix = segments[..segments.len().saturating_sub(1)]
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(".");
            actual >= wanted && release_prefix_matches(&prefix, candidate)
        }
        SpecifierOp::Arbitrary => false,
    }
}

// A specifier without a local label matches any local label of the same public version.
fn equal_ignoring_local(wanted: &PythonVersion, actual: &PythonVersion) -> bool {
    if wanted.has_local() {
        return wanted == actual;
    }
    wanted.cmp_public(actual) == Ordering::Equal
}

fn release_prefix_matches(prefix: &str, candidate: &str) -> bool {
    let Some((wanted, _)) = split_release(prefix) else {
        return false;
    };
    let Some(actual) = PythonVersion::parse(candidate) else {
        return false;
    };
    let mut actual = actual.release().to_vec();
    if actual.len() < wanted.len() {
        actual.resize(wanted.len(), 0);
    }
    actual[..wanted.len()] == wanted[..]
}

fn split_release(input: &str) -> Option<(Vec<u64>, &str)> {
    let end = input
        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
        .unwrap_or(input.len());
    let mut release_text = &input[..end];
    let mut tail = &input[end..];
    // "1.0.post1" leaves a trailing dot on the release part.
    if let Some(stripped) = release_text.strip_suffix('.') {
        release_text = stripped;
        tail = &input[end - 1..];
    }
    if release_text.is_empty() {
        return None;
    }
    let release = release_text
        .split('.')
        .map(|segment| segment.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    Some((release, tail))
}

fn take_labeled<'a>(input: &'a str, labels: &[&'a str]) -> Option<(&'a str, u64, &'a str)> {
    let trimmed = input.trim_start_matches(['.', '-', '_']);
    let label = *labels.iter().find(|label| trimmed.starts_with(**label))?;
    let after = trimmed[label.len()..].trim_start_matches(['.', '-', '_']);
    let digits_end = after
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(after.len());
    let number = if digits_end == 0 {
        0
    } else {
        after[..digits_end].parse().ok()?
    };
    Some((label, number, &after[digits_end..]))
}

// "1.0-1" is the implicit spelling of "1.0.post1".
fn take_implicit_post(input: &str) -> Option<(u64, &str)> {
    let after = input.strip_prefix('-')?;
    let digits_end = after
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(after.len());
    if digits_end == 0 {
        return None;
    }
    Some((after[..digits_end].parse().ok()?, &after[digits_end..]))
}

fn parse_local(local: &str) -> Option<Vec<LocalSegment>> {
    local
        .split(['.', '-', '_'])
        .map(|segment| {
            if segment.is_empty() || !segment.chars().all(|ch| ch.is_ascii_alphanumeric()) {
                None
            } else if segment.chars().all(|ch| ch.is_ascii_digit()) {
                segment.parse().ok().map(LocalSegment::Number)
            } else {
                Some(LocalSegment::Text(segment.to_string()))
            }
        })
        .collect()
}
