//! Namespaced key/value configuration store.
//!
//! Migration files are flat `a.b.c = value` namespaces. They can be written
//! as Java-style `.properties` files or as YAML, where nested mappings are
//! flattened into dotted keys. Values are expanded against the environment
//! on load: `${NAME}` is replaced by the variable `NAME`. Placeholders whose
//! name is not an identifier, such as the `${1}` of a rename template, are
//! left untouched.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde_yaml::Value;

use crate::error::{ConfigError, ConfigResult};

/// Expand environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable `VAR_NAME`.
/// If the variable is not set, replaces with an empty string.
pub(crate) fn expand_env_vars(s: &str) -> String {
    static ENV_VAR: OnceLock<Regex> = OnceLock::new();
    let re = ENV_VAR
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));
    re.replace_all(s, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

/// A flat, ordered set of configuration entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    /// Load a file, choosing the format from its extension.
    ///
    /// `.yaml` and `.yml` files are read as YAML, everything else as
    /// `.properties`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

        if is_yaml {
            Self::from_yaml_str(&content).map_err(|e| match e {
                ConfigError::NotAMapping(_) => ConfigError::NotAMapping(path.display().to_string()),
                other => other,
            })
        } else {
            Ok(Self::from_properties_str(&content))
        }
    }

    /// Parse `.properties` content.
    ///
    /// Follows the Java format: `#` and `!` start comments, keys end at the
    /// first unescaped `=`, `:` or whitespace, a trailing backslash joins
    /// the next line, and backslash escapes are decoded (write `\\d` for a
    /// regex `\d`).
    #[must_use]
    pub fn from_properties_str(content: &str) -> Self {
        let mut entries = BTreeMap::new();
        let mut lines = content.lines();

        while let Some(line) = lines.next() {
            let mut logical = line.trim_start().to_string();
            if logical.is_empty() || logical.starts_with('#') || logical.starts_with('!') {
                continue;
            }
            while ends_with_continuation(&logical) {
                logical.pop();
                match lines.next() {
                    Some(next) => logical.push_str(next.trim_start()),
                    None => break,
                }
            }

            let (key, value) = split_entry(&logical);
            entries.insert(unescape(key), expand_env_vars(&unescape(value)));
        }

        Self { entries }
    }

    /// Parse YAML content, flattening nested mappings into dotted keys.
    ///
    /// Sequences become comma-separated values, so `targets: [a, b]` reads
    /// the same as `targets=a,b`.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is not YAML or its root is not a mapping.
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let root: Value = serde_yaml::from_str(content)?;
        let mut entries = BTreeMap::new();
        match root {
            Value::Mapping(_) => flatten_yaml("", &root, &mut entries),
            Value::Null => {}
            _ => return Err(ConfigError::NotAMapping("<yaml>".to_string())),
        }
        Ok(Self { entries })
    }

    /// Build from explicit pairs. Values are taken literally.
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Get a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Get a value that is present and not blank.
    #[must_use]
    pub fn get_non_blank(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }

    /// Parse a value, falling back to `default` when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is present but does not parse.
    pub fn get_parsed<T: FromStr>(&self, key: &str, default: T) -> ConfigResult<T> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
            }),
        }
    }

    /// A boolean flag that is only off when explicitly set to `false`
    /// (case-insensitive).
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        !self
            .get(key)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("false"))
    }

    /// The sub-namespace under `prefix`, with the prefix stripped.
    #[must_use]
    pub fn partition(&self, prefix: &str) -> Self {
        let dotted = format!("{prefix}.");
        Self {
            entries: self
                .entries
                .iter()
                .filter_map(|(k, v)| {
                    k.strip_prefix(&dotted)
                        .map(|rest| (rest.to_string(), v.clone()))
                })
                .collect(),
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

/// Split a logical line into raw key and value.
fn split_entry(line: &str) -> (&str, &str) {
    let mut escaped = false;
    let mut key_end = line.len();
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' | ' ' | '\t' | '\u{c}' => {
                key_end = i;
                break;
            }
            _ => {}
        }
    }

    let key = &line[..key_end];
    let rest = line[key_end..].trim_start_matches(is_separator_space);
    let rest = rest
        .strip_prefix(|c: char| c == '=' || c == ':')
        .map_or(rest, |r| r.trim_start_matches(is_separator_space));
    (key, rest)
}

fn is_separator_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\u{c}')
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn flatten_yaml(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                let Some(segment) = scalar_to_string(k) else {
                    continue;
                };
                let key = if prefix.is_empty() {
                    segment
                } else {
                    format!("{prefix}.{segment}")
                };
                flatten_yaml(&key, v, out);
            }
        }
        Value::Sequence(items) => {
            let joined: Vec<String> = items.iter().filter_map(scalar_to_string).collect();
            out.insert(prefix.to_string(), expand_env_vars(&joined.join(",")));
        }
        Value::Tagged(tagged) => flatten_yaml(prefix, &tagged.value, out),
        Value::Null => {}
        scalar => {
            if let Some(s) = scalar_to_string(scalar) {
                out.insert(prefix.to_string(), expand_env_vars(&s));
            }
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        Value::Null | Value::Sequence(_) | Value::Mapping(_) => None,
    }
}
