/// License identifiers that halt a run unless the operator overrides the denylist.
///
/// Spelled-out names cover trove classifiers such as
/// `GNU Affero General Public License v3`.
pub const DEFAULT_DENIED_LICENSES: [&str; 7] = [
    "AGPL",
    "Affero",
    "SSPL",
    "Server Side Public License",
    "BUSL",
    "Business Source License",
    "Commons Clause",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LicenseVerdict {
    Allowed,
    Unknown,
    Suspect(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicensePolicy {
    pub denied: Vec<String>,
    pub allow_unknown: bool,
}

impl Default for LicensePolicy {
    fn default() -> Self {
        Self {
            denied: DEFAULT_DENIED_LICENSES
                .iter()
                .map(|token| token.to_string())
                .collect(),
            allow_unknown: true,
        }
    }
}

impl LicensePolicy {
    pub fn evaluate(&self, license: Option<&str>) -> LicenseVerdict {
        let Some(license) = license.map(str::trim).filter(|value| is_known(value)) else {
            return LicenseVerdict::Unknown;
        };

        let words = tokenize(license);
        self.denied
            .iter()
            .map(|entry| entry.trim())
            .find(|entry| contains_phrase(&words, &tokenize(entry)))
            .map(|entry| LicenseVerdict::Suspect(entry.to_string()))
            .unwrap_or(LicenseVerdict::Allowed)
    }

    /// Whether a verdict should stop the run.
    pub fn halts_on(&self, verdict: &LicenseVerdict) -> bool {
        match verdict {
            LicenseVerdict::Allowed => false,
            LicenseVerdict::Unknown => !self.allow_unknown,
            LicenseVerdict::Suspect(_) => true,
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

// Denied words match whole license words, optionally followed by a version
// such as `v3` or `3`, so `gpl` matches `GPLv3` but not `LGPL` or `AGPL`.
fn contains_phrase(words: &[String], phrase: &[String]) -> bool {
    if phrase.is_empty() || phrase.len() > words.len() {
        return false;
    }
    words.windows(phrase.len()).any(|window| {
        window
            .iter()
            .zip(phrase)
            .all(|(word, wanted)| word_matches(word, wanted))
    })
}

fn word_matches(word: &str, wanted: &str) -> bool {
    match word.strip_prefix(wanted) {
        Some("") => true,
        Some(rest) => {
            let digits = rest.strip_prefix('v').unwrap_or(rest);
            !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit())
        }
        None => false,
    }
}

fn is_known(value: &str) -> bool {
    !value.is_empty()
        && !value.eq_ignore_ascii_case("unknown")
        && !value.eq_ignore_ascii_case("none")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_flags_network_copyleft() {
        let policy = LicensePolicy::default();
        assert_eq!(
            policy.evaluate(Some("GNU AGPLv3")),
            LicenseVerdict::Suspect("AGPL".to_string())
        );
        assert_eq!(policy.evaluate(Some("MIT")), LicenseVerdict::Allowed);
        assert_eq!(
            policy.evaluate(Some("Apache-2.0 with Commons Clause")),
            LicenseVerdict::Suspect("Commons Clause".to_string())
        );
    }

    #[test]
    fn unknown_licenses_halt_only_when_disallowed() {
        let mut policy = LicensePolicy::default();
        assert_eq!(policy.evaluate(Some("UNKNOWN")), LicenseVerdict::Unknown);
        assert_eq!(policy.evaluate(None), LicenseVerdict::Unknown);
        assert!(!policy.halts_on(&LicenseVerdict::Unknown));

        policy.allow_unknown = false;
        assert!(policy.halts_on(&LicenseVerdict::Unknown));
        assert!(!policy.halts_on(&LicenseVerdict::Allowed));
    }

    #[test]
    fn custom_denylist_replaces_defaults() {
        let policy = LicensePolicy {
            denied: vec!["gpl-3.0".to_string(), "  ".to_string()],
            allow_unknown: true,
        };
        assert_eq!(policy.evaluate(Some("AGPL-3.0")), LicenseVerdict::Allowed);
        assert_eq!(policy.evaluate(Some("MIT")), LicenseVerdict::Allowed);
        assert_eq!(
            policy.evaluate(Some("GPL-3.0-or-later")),
            LicenseVerdict::Suspect("gpl-3.0".to_string())
        );
    }

    #[test]
    fn denied_words_match_on_word_boundaries() {
        let policy = LicensePolicy {
            denied: vec!["GPL".to_string()],
            allow_unknown: true,
        };
        assert_eq!(policy.evaluate(Some("LGPL-2.1-only")), LicenseVerdict::Allowed);
        assert_eq!(policy.evaluate(Some("AGPL-3.0")), LicenseVerdict::Allowed);
        assert_eq!(
            policy.evaluate(Some("GPL-2.0")),
            LicenseVerdict::Suspect("GPL".to_string())
        );
        assert_eq!(
            policy.evaluate(Some("GNU GPLv3")),
            LicenseVerdict::Suspect("GPL".to_string())
        );
        assert_eq!(policy.evaluate(Some("GPLish")), LicenseVerdict::Allowed);
    }

    #[test]
    fn default_policy_flags_spelled_out_classifiers() {
        let policy = LicensePolicy::default();
        assert_eq!(
            policy.evaluate(Some("GNU Affero General Public License v3")),
            LicenseVerdict::Suspect("Affero".to_string())
        );
        assert_eq!(
            policy.evaluate(Some("Server Side Public License (SSPL)")),
            LicenseVerdict::Suspect("SSPL".to_string())
        );
        assert_eq!(
            policy.evaluate(Some("GNU Lesser General Public License v3 (LGPLv3)")),
            LicenseVerdict::Allowed
        );
    }
}
