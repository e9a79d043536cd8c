//! Migration configuration: which sets to run, how often, and their rules.
//!
//! Built from a [`Properties`] namespace. Global keys:
//!
//! | key | default |
//! |---|---|
//! | `migration.targets` | none: comma-separated set names, run in order |
//! | `loops` | `1` (negative runs forever) |
//! | `interval.ms` | `3000` |
//! | `require.stable` | `true` |
//!
//! Per set `S`: `S.enable`, `S.group.regex`, `S.group.rename`,
//! `S.topic.regex` (default `.*`), `S.topic.rename` (default `${0}`),
//! `S.group.blacklist.regex`, `S.topic.blacklist.regex`.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::{ConfigError, ConfigResult};
use crate::matcher::NamePattern;
use crate::properties::Properties;
use crate::template::RenameTemplate;

const DEFAULT_LOOPS: i64 = 1;
const DEFAULT_INTERVAL_MS: u64 = 3000;

/// How many loop iterations the scheduler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCount {
    /// Stop after this many iterations.
    Bounded(u64),
    /// Keep syncing until the process is stopped.
    Unbounded,
}

impl LoopCount {
    /// Interpret the `loops` setting: negative means unbounded.
    #[must_use]
    pub fn from_setting(loops: i64) -> Self {
        u64::try_from(loops).map_or(Self::Unbounded, Self::Bounded)
    }

    /// Whether `completed` iterations reach the terminal state.
    #[must_use]
    pub fn is_exhausted(&self, completed: u64) -> bool {
        match self {
            Self::Bounded(max) => completed >= *max,
            Self::Unbounded => false,
        }
    }
}

impl fmt::Display for LoopCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(max) => write!(f, "{max}"),
            Self::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// A regex paired with the template that renames what it matches.
#[derive(Debug, Clone)]
pub struct RenameRule {
    /// Names this rule applies to.
    pub pattern: NamePattern,
    /// Template rendered from the pattern's captures.
    pub template: RenameTemplate,
}

impl RenameRule {
    /// Compile a rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex or the template is invalid.
    pub fn new(key: &str, regex: &str, rename: &str) -> ConfigResult<Self> {
        Ok(Self {
            pattern: NamePattern::new(&format!("{key}.regex"), regex)?,
            template: RenameTemplate::parse(&format!("{key}.rename"), rename)?,
        })
    }

    /// The rule that keeps every name as it is.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            pattern: NamePattern::match_all(),
            template: RenameTemplate::identity(),
        }
    }
}

/// One named unit of migration rules.
#[derive(Debug, Clone)]
pub struct MigrationSet {
    /// Set name, as listed in `migration.targets`.
    pub name: String,
    /// Disabled sets are skipped every loop.
    pub enabled: bool,
    /// Group rule; a set without one does nothing.
    pub group: Option<RenameRule>,
    /// Topic rule, matching and keeping every topic by default.
    pub topic: RenameRule,
    /// Groups excluded even when the group rule matches them.
    pub group_blacklist: Option<NamePattern>,
    /// Topics excluded even when the topic rule matches them.
    pub topic_blacklist: Option<NamePattern>,
    /// Why the configured rules did not compile. Such a set fails every
    /// loop while the other sets keep running.
    pub invalid: Option<Arc<ConfigError>>,
}

impl MigrationSet {
    /// Create an enabled set with a group rule and default topic handling.
    ///
    /// # Errors
    ///
    /// Returns an error if the group regex or template is invalid.
    pub fn new(name: &str, group_regex: &str, group_rename: &str) -> ConfigResult<Self> {
        Ok(Self {
            group: Some(RenameRule::new(
                &format!("{name}.group"),
                group_regex,
                group_rename,
            )?),
            ..Self::empty(name)
        })
    }

    fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            group: None,
            topic: RenameRule::identity(),
            group_blacklist: None,
            topic_blacklist: None,
            invalid: None,
        }
    }

    /// Replace the topic rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic regex or template is invalid.
    pub fn with_topic_rule(mut self, regex: &str, rename: &str) -> ConfigResult<Self> {
        self.topic = RenameRule::new(&format!("{}.topic", self.name), regex, rename)?;
        Ok(self)
    }

    /// Exclude groups fully matching `regex`.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex is invalid.
    pub fn with_group_blacklist(mut self, regex: &str) -> ConfigResult<Self> {
        self.group_blacklist = Some(NamePattern::new(
            &format!("{}.group.blacklist.regex", self.name),
            regex,
        )?);
        Ok(self)
    }

    /// Exclude topics fully matching `regex`.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex is invalid.
    pub fn with_topic_blacklist(mut self, regex: &str) -> ConfigResult<Self> {
        self.topic_blacklist = Some(NamePattern::new(
            &format!("{}.topic.blacklist.regex", self.name),
            regex,
        )?);
        Ok(self)
    }

    /// Mark the set as disabled.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Build a set from its namespace (keys without the `name.` prefix).
    ///
    /// A disabled set's rules are not read. A blank group regex or rename
    /// leaves the set without a group rule. Blank topic and blacklist
    /// settings fall back to their defaults. A regex or template that does
    /// not compile is kept in [`MigrationSet::invalid`] instead of failing
    /// the whole configuration.
    #[must_use]
    pub fn from_properties(name: &str, props: &Properties) -> Self {
        if !props.flag("enable") {
            return Self::empty(name).disabled();
        }
        Self::compile(name, props).unwrap_or_else(|e| {
            warn!(set = name, error = %e, "invalid migration set rules");
            Self {
                invalid: Some(Arc::new(e)),
                ..Self::empty(name)
            }
        })
    }

    fn compile(name: &str, props: &Properties) -> ConfigResult<Self> {
        let group = match (
            props.get_non_blank("group.regex"),
            props.get_non_blank("group.rename"),
        ) {
            (Some(regex), Some(rename)) => Some(RenameRule::new(
                &format!("{name}.group"),
                regex,
                rename,
            )?),
            _ => None,
        };

        let topic = RenameRule::new(
            &format!("{name}.topic"),
            props.get_non_blank("topic.regex").unwrap_or(".*"),
            props.get_non_blank("topic.rename").unwrap_or("${0}"),
        )?;

        let blacklist = |key: &str| {
            props
                .get_non_blank(key)
                .map(|regex| NamePattern::new(&format!("{name}.{key}"), regex))
                .transpose()
        };

        Ok(Self {
            group,
            topic,
            group_blacklist: blacklist("group.blacklist.regex")?,
            topic_blacklist: blacklist("topic.blacklist.regex")?,
            ..Self::empty(name)
        })
    }
}

/// Everything the scheduler needs for one process run.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Sets in `migration.targets` order.
    pub sets: Vec<MigrationSet>,
    /// Number of loop iterations.
    pub loops: LoopCount,
    /// Delay between loop iterations.
    pub interval: Duration,
    /// Only read settled offsets (`true`) or include pending ones (`false`).
    pub require_stable: bool,
}

impl MigrationConfig {
    /// Load from a `.properties` or YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value is invalid.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        Self::from_properties(&Properties::from_file(path)?)
    }

    /// Build from a loaded namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if a global value does not parse. Invalid set rules
    /// only affect their own set.
    pub fn from_properties(props: &Properties) -> ConfigResult<Self> {
        let sets = props
            .get("migration.targets")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| MigrationSet::from_properties(name, &props.partition(name)))
            .collect();

        Ok(Self {
            sets,
            loops: LoopCount::from_setting(props.get_parsed("loops", DEFAULT_LOOPS)?),
            interval: Duration::from_millis(
                props.get_parsed("interval.ms", DEFAULT_INTERVAL_MS)?,
            ),
            require_stable: props.flag("require.stable"),
        })
    }

    /// Create a config for the given sets with default loop settings.
    #[must_use]
    pub fn with_sets(sets: Vec<MigrationSet>) -> Self {
        Self {
            sets,
            loops: LoopCount::from_setting(DEFAULT_LOOPS),
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            require_stable: true,
        }
    }

    /// Whether `migration.targets` named at least one set.
    #[must_use]
    pub fn has_targets(&self) -> bool {
        !self.sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders_props() -> Properties {
        Properties::from_pairs([
            ("migration.targets", " orders , payments,, "),
            ("loops", "-1"),
            ("interval.ms", "250"),
            ("require.stable", "False"),
            ("orders.group.regex", r"app-orders-(\d+)"),
            ("orders.group.rename", "migrated-orders-${1}"),
            ("orders.topic.regex", r"orders\.(.*)"),
            ("orders.topic.rename", "archived.${1}"),
            ("orders.group.blacklist.regex", "app-orders-9+"),
            ("payments.enable", "false"),
        ])
    }

    #[test]
    fn test_global_settings() {
        let config = MigrationConfig::from_properties(&orders_props()).unwrap();
        assert_eq!(config.loops, LoopCount::Unbounded);
        assert_eq!(config.interval, Duration::from_millis(250));
        assert!(!config.require_stable);
        let names: Vec<&str> = config.sets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["orders", "payments"]);
    }

    #[test]
    fn test_defaults() {
        let props = Properties::from_pairs([("migration.targets", "s")]);
        let config = MigrationConfig::from_properties(&props).unwrap();
        assert_eq!(config.loops, LoopCount::Bounded(1));
        assert_eq!(config.interval, Duration::from_millis(3000));
        assert!(config.require_stable);

        let set = &config.sets[0];
        assert!(set.enabled);
        assert!(set.group.is_none());
        assert_eq!(set.topic.pattern.as_str(), ".*");
        assert_eq!(set.topic.template.as_str(), "${0}");
        assert!(set.group_blacklist.is_none());
        assert!(set.topic_blacklist.is_none());
    }

    #[test]
    fn test_set_rules() {
        let config = MigrationConfig::from_properties(&orders_props()).unwrap();
        let orders = &config.sets[0];
        let group = orders.group.as_ref().unwrap();
        assert_eq!(group.pattern.as_str(), r"app-orders-(\d+)");
        assert_eq!(group.template.as_str(), "migrated-orders-${1}");
        assert_eq!(orders.topic.template.as_str(), "archived.${1}");
        assert!(orders
            .group_blacklist
            .as_ref()
            .unwrap()
            .is_full_match("app-orders-99"));

        let payments = &config.sets[1];
        assert!(!payments.enabled);
        assert!(payments.group.is_none());
    }

    #[test]
    fn test_missing_targets() {
        let config = MigrationConfig::from_properties(&Properties::default()).unwrap();
        assert!(!config.has_targets());

        let blank = Properties::from_pairs([("migration.targets", "  ")]);
        assert!(!MigrationConfig::from_properties(&blank).unwrap().has_targets());
    }

    #[test]
    fn test_blank_group_rename_means_no_rule() {
        let props = Properties::from_pairs([("group.regex", "a"), ("group.rename", " ")]);
        let set = MigrationSet::from_properties("s", &props);
        assert!(set.group.is_none());
        assert!(set.invalid.is_none());
    }

    #[test]
    fn test_invalid_regex_names_the_key() {
        let props = Properties::from_pairs([
            ("migration.targets", "s"),
            ("s.group.regex", "a"),
            ("s.group.rename", "b"),
            ("s.topic.blacklist.regex", "(("),
        ]);
        let config = MigrationConfig::from_properties(&props).unwrap();
        let set = &config.sets[0];
        assert!(set.enabled);
        assert!(set.group.is_none());
        assert!(matches!(
            set.invalid.as_deref(),
            Some(ConfigError::InvalidPattern { key, .. }) if key == "s.topic.blacklist.regex"
        ));
    }

    #[test]
    fn test_disabled_set_rules_are_not_compiled() {
        let props = Properties::from_pairs([
            ("migration.targets", "healthy,old"),
            ("healthy.group.regex", "app-(.*)"),
            ("healthy.group.rename", "new-${1}"),
            ("old.enable", "false"),
            ("old.group.regex", "legacy-("),
            ("old.group.rename", "x"),
        ]);
        let config = MigrationConfig::from_properties(&props).unwrap();

        assert!(config.sets[0].group.is_some());
        let old = &config.sets[1];
        assert!(!old.enabled);
        assert!(old.group.is_none());
        assert!(old.invalid.is_none());
    }

    #[test]
    fn test_invalid_loops() {
        let props = Properties::from_pairs([("migration.targets", "s"), ("loops", "many")]);
        assert!(matches!(
            MigrationConfig::from_properties(&props),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_loop_count() {
        assert_eq!(LoopCount::from_setting(-5), LoopCount::Unbounded);
        assert_eq!(LoopCount::from_setting(0), LoopCount::Bounded(0));
        assert!(LoopCount::Bounded(1).is_exhausted(1));
        assert!(!LoopCount::Bounded(2).is_exhausted(1));
        assert!(!LoopCount::Unbounded.is_exhausted(u64::MAX));
    }

    #[test]
    fn test_builder() {
        let set = MigrationSet::new("s", "g-(.*)", "h-${1}")
            .unwrap()
            .with_topic_rule("t-(.*)", "u-${1}")
            .unwrap()
            .with_topic_blacklist("t-skip")
            .unwrap()
            .disabled();
        assert!(!set.enabled);
        assert_eq!(set.topic.template.as_str(), "u-${1}");
        assert!(set.topic_blacklist.is_some());
    }
}
