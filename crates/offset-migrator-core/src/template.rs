//! Rename templates with positional `${N}` placeholders.
//!
//! A template is parsed once at configuration time into literal and
//! placeholder segments. Rendering substitutes captured values verbatim;
//! a substituted value is never scanned for further placeholders.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{ConfigError, ConfigResult, TemplateError};
use crate::matcher::CaptureTokens;

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\$\{(\d+)\}").expect("valid regex"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Group(usize),
}

/// A parsed rename template such as `migrated-orders-${1}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl RenameTemplate {
    /// Parse a template.
    ///
    /// # Errors
    ///
    /// Returns an error if a placeholder index does not fit in `usize`.
    pub fn parse(key: &str, template: &str) -> ConfigResult<Self> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in placeholder_regex().captures_iter(template) {
            let whole = caps.get(0).expect("group 0 always participates");
            let digits = &caps[1];
            let index = digits
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidTemplate {
                    key: key.to_string(),
                    message: format!("placeholder index {digits} is out of range"),
                })?;

            if whole.start() > last {
                segments.push(Segment::Literal(template[last..whole.start()].to_string()));
            }
            segments.push(Segment::Group(index));
            last = whole.end();
        }
        if last < template.len() {
            segments.push(Segment::Literal(template[last..].to_string()));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    /// The template that keeps a name unchanged (`${0}`).
    #[must_use]
    pub fn identity() -> Self {
        Self {
            source: "${0}".to_string(),
            segments: vec![Segment::Group(0)],
        }
    }

    /// The template as written in configuration.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Highest placeholder index referenced, if any.
    #[must_use]
    pub fn max_group(&self) -> Option<usize> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Group(i) => Some(*i),
                Segment::Literal(_) => None,
            })
            .max()
    }

    /// Expand the template with the given capture tokens.
    ///
    /// Empty tokens leave the template unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::MissingGroup`] if a placeholder refers to a
    /// group absent from `tokens`.
    pub fn render(&self, tokens: &CaptureTokens) -> Result<String, TemplateError> {
        if tokens.is_empty() {
            return Ok(self.source.clone());
        }

        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Group(index) => {
                    let value =
                        tokens
                            .get(*index)
                            .ok_or_else(|| TemplateError::MissingGroup {
                                index: *index,
                                template: self.source.clone(),
                            })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for RenameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(t: &str) -> RenameTemplate {
        RenameTemplate::parse("test.rename", t).unwrap()
    }

    fn tokens(groups: &[&str]) -> CaptureTokens {
        CaptureTokens::from_groups(groups.iter().map(|g| Some(*g)))
    }

    #[test]
    fn test_render_substitutes_groups() {
        let rendered = template("migrated-orders-${1}")
            .render(&tokens(&["app-orders-1", "1"]))
            .unwrap();
        assert_eq!(rendered, "migrated-orders-1");
    }

    #[test]
    fn test_render_repeated_and_reordered_groups() {
        let rendered = template("${2}.${1}.${2}")
            .render(&tokens(&["x", "a", "b"]))
            .unwrap();
        assert_eq!(rendered, "b.a.b");
    }

    #[test]
    fn test_identity() {
        let rendered = RenameTemplate::identity()
            .render(&tokens(&["orders.us"]))
            .unwrap();
        assert_eq!(rendered, "orders.us");
        assert_eq!(RenameTemplate::identity().as_str(), "${0}");
    }

    #[test]
    fn test_empty_tokens_return_template_unchanged() {
        let rendered = template("archived.${1}")
            .render(&CaptureTokens::default())
            .unwrap();
        assert_eq!(rendered, "archived.${1}");
    }

    #[test]
    fn test_missing_group_is_an_error() {
        let result = template("new-${3}").render(&tokens(&["old-1", "1"]));
        assert_eq!(
            result,
            Err(TemplateError::MissingGroup {
                index: 3,
                template: "new-${3}".to_string(),
            })
        );
    }

    #[test]
    fn test_non_participating_group_is_an_error() {
        let t = CaptureTokens::from_groups([Some("b"), None, Some("b")]);
        let result = template("${1}");
        assert!(matches!(
            result.render(&t),
            Err(TemplateError::MissingGroup { index: 1, .. })
        ));
    }

    #[test]
    fn test_no_recursive_expansion() {
        let rendered = template("x-${1}")
            .render(&tokens(&["whole", "${0}"]))
            .unwrap();
        assert_eq!(rendered, "x-${0}");
    }

    #[test]
    fn test_malformed_placeholders_are_literal() {
        let rendered = template("$1-${a}-${}-${1")
            .render(&tokens(&["x", "y"]))
            .unwrap();
        assert_eq!(rendered, "$1-${a}-${}-${1");
    }

    #[test]
    fn test_oversized_index_rejected() {
        let result = RenameTemplate::parse("s.group.rename", "g-${99999999999999999999999}");
        assert!(matches!(result, Err(ConfigError::InvalidTemplate { .. })));
    }

    #[test]
    fn test_max_group() {
        assert_eq!(template("a-${1}-${4}").max_group(), Some(4));
        assert_eq!(template("plain").max_group(), None);
    }
}
