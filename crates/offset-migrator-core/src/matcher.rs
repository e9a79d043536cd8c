//! Full-name pattern matching with positional capture extraction.
//!
//! A [`NamePattern`] only matches when the regex covers the entire name;
//! a match on a substring is reported as [`MatchOutcome::Unmatched`].
//!
//! Capture groups that did not participate in a match are recorded as
//! absent, so a template that references them fails to render instead of
//! silently producing an empty segment.

use std::fmt;

use regex::Regex;

use crate::error::{ConfigError, ConfigResult};

/// A compiled regex that must match a name in full.
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    regex: Regex,
}

impl NamePattern {
    /// Compile a pattern, anchoring it at both ends.
    ///
    /// `key` names the configuration entry the pattern came from and is
    /// only used for error reporting.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex does not compile.
    pub fn new(key: &str, pattern: &str) -> ConfigResult<Self> {
        let invalid = |source| ConfigError::InvalidPattern {
            key: key.to_string(),
            source,
        };
        // Compiled bare first so errors quote the pattern as written.
        Regex::new(pattern).map_err(invalid)?;
        let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(invalid)?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// The pattern that matches every name.
    #[must_use]
    pub fn match_all() -> Self {
        Self {
            source: ".*".to_string(),
            regex: Regex::new("^(?:.*)$").expect("valid regex"),
        }
    }

    /// The pattern as written in configuration.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Check whether the pattern matches the whole name.
    #[must_use]
    pub fn is_full_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// Match a name and extract its capture groups.
    #[must_use]
    pub fn match_name(&self, name: &str) -> MatchOutcome {
        match self.regex.captures(name) {
            Some(caps) => MatchOutcome::Matched(CaptureTokens {
                groups: caps
                    .iter()
                    .map(|group| group.map(|m| m.as_str().to_string()))
                    .collect(),
            }),
            None => MatchOutcome::Unmatched,
        }
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Result of matching a name against a [`NamePattern`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The pattern matched the entire name.
    Matched(CaptureTokens),
    /// The pattern did not match, or only matched part of the name.
    Unmatched,
}

impl MatchOutcome {
    /// Consume the outcome, returning the tokens on a match.
    #[must_use]
    pub fn into_tokens(self) -> Option<CaptureTokens> {
        match self {
            Self::Matched(tokens) => Some(tokens),
            Self::Unmatched => None,
        }
    }

    /// Whether the outcome is a match.
    #[must_use]
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched(_))
    }
}

/// Positional capture groups of a successful match.
///
/// Index 0 is the whole name; indices `1..` are the pattern's groups in
/// declaration order. A group that did not participate is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureTokens {
    groups: Vec<Option<String>>,
}

impl CaptureTokens {
    /// Build tokens from explicit values, index 0 first.
    #[must_use]
    pub fn from_groups<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self {
            groups: groups.into_iter().map(|g| g.map(Into::into)).collect(),
        }
    }

    /// The value captured at `index`, if that group participated.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }

    /// Whether no group at all is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of groups in the pattern, including group 0.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }
}

impl fmt::Display for CaptureTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        let mut first = true;
        for (index, group) in self.groups.iter().enumerate() {
            if let Some(value) = group {
                if !first {
                    f.write_str(", ")?;
                }
                write!(f, "{index}={value}")?;
                first = false;
            }
        }
        f.write_str("}")
    }
}
