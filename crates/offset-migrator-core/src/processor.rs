//! Runs one migration set against the broker's current state.
//!
//! A run lists groups, keeps the ones the set's group rule selects, fetches
//! their committed offsets in one batch, renames groups and topics, and
//! hands each renamed group's offsets to the [`OffsetApplier`].
//!
//! Failures are contained where they occur. A name that fails to render
//! skips that pair (or that group), a failed write skips that group, and
//! only invalid rules or a failed listing or fetch abort the set.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::admin::{GroupOffsets, OffsetAdmin, TopicPartition};
use crate::applier::{ApplyOutcome, OffsetApplier};
use crate::error::{AdminError, MigrationError, Result};
use crate::matcher::{CaptureTokens, MatchOutcome};
use crate::migration::{MigrationSet, RenameRule};

/// Counters for one completed set run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetReport {
    /// Source groups selected by the group rule.
    pub candidates: usize,
    /// Renamed groups that had offsets to apply.
    pub groups_applied: usize,
    /// Offsets actually written to the broker.
    pub offsets_written: usize,
    /// Snapshot entries excluded by the topic rule or blacklist.
    pub skipped_entries: usize,
    /// Group or topic names that could not be rendered.
    pub template_errors: usize,
    /// Renamed groups whose write failed.
    pub write_failures: usize,
}

/// How a set run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOutcome {
    /// The set is disabled.
    Disabled,
    /// The set has no group rule, so there is nothing to do.
    NoGroupRule,
    /// No listed group was selected.
    NoCandidates,
    /// None of the selected groups has committed offsets.
    NoOffsets,
    /// Offsets were planned and applied.
    Completed(SetReport),
}

impl SetOutcome {
    /// Short label used in logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::NoGroupRule => "no_group_rule",
            Self::NoCandidates => "no_candidates",
            Self::NoOffsets => "no_offsets",
            Self::Completed(_) => "completed",
        }
    }

    /// Offsets written during the run.
    #[must_use]
    pub fn offsets_written(&self) -> usize {
        match self {
            Self::Completed(report) => report.offsets_written,
            _ => 0,
        }
    }
}

/// A source group selected by the group rule, with its captures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Source group id.
    pub group: String,
    /// Captures from matching the group rule.
    pub tokens: CaptureTokens,
}

/// Offsets to apply per renamed group, plus what was dropped on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    /// Renamed group to renamed offsets.
    pub groups: BTreeMap<String, GroupOffsets>,
    /// Snapshot entries excluded by the topic rule or blacklist.
    pub skipped_entries: usize,
    /// Names that could not be rendered.
    pub template_errors: usize,
}

/// Select the groups a set applies to, in listing order.
///
/// The group blacklist is checked first and excludes unconditionally.
#[must_use]
pub fn select_candidates(set: &MigrationSet, rule: &RenameRule, groups: &[String]) -> Vec<Candidate> {
    groups
        .iter()
        .filter_map(|group| {
            if set
                .group_blacklist
                .as_ref()
                .is_some_and(|blacklist| blacklist.is_full_match(group))
            {
                debug!(set = %set.name, group, "group excluded by blacklist");
                return None;
            }
            match rule.pattern.match_name(group) {
                MatchOutcome::Matched(tokens) => {
                    info!(set = %set.name, group, "group selected");
                    Some(Candidate {
                        group: group.clone(),
                        tokens,
                    })
                }
                MatchOutcome::Unmatched => {
                    debug!(set = %set.name, group, pattern = %rule.pattern, "group does not match");
                    None
                }
            }
        })
        .collect()
}

/// Rename each candidate's committed offsets.
///
/// Candidates are visited in order and each snapshot in topic-partition
/// order. When two source partitions rename to the same target partition
/// for one renamed group, the last one visited wins.
#[must_use]
pub fn plan_offsets(
    set: &MigrationSet,
    rule: &RenameRule,
    candidates: &[Candidate],
    snapshots: &HashMap<String, GroupOffsets>,
) -> MigrationPlan {
    let mut plan = MigrationPlan::default();

    for candidate in candidates {
        let Some(snapshot) = snapshots.get(&candidate.group) else {
            continue;
        };

        let new_group = match rule.template.render(&candidate.tokens) {
            Ok(name) => name,
            Err(e) => {
                warn!(set = %set.name, group = %candidate.group, error = %e, "cannot rename group, skipping it");
                plan.template_errors += 1;
                continue;
            }
        };

        let mut renamed = GroupOffsets::new();
        for (tp, offset) in snapshot {
            let topic = &tp.topic;
            if set
                .topic_blacklist
                .as_ref()
                .is_some_and(|blacklist| blacklist.is_full_match(topic))
            {
                debug!(set = %set.name, group = %candidate.group, topic, "topic excluded by blacklist");
                plan.skipped_entries += 1;
                continue;
            }

            let Some(tokens) = set.topic.pattern.match_name(topic).into_tokens() else {
                debug!(set = %set.name, group = %candidate.group, topic, "topic does not match");
                plan.skipped_entries += 1;
                continue;
            };

            match set.topic.template.render(&tokens) {
                Ok(new_topic) => {
                    debug!(
                        group = %new_group,
                        topic = %new_topic,
                        partition = tp.partition,
                        offset,
                        "planned offset"
                    );
                    renamed.insert(TopicPartition::new(new_topic, tp.partition), *offset);
                }
                Err(e) => {
                    warn!(set = %set.name, group = %candidate.group, topic, error = %e, "cannot rename topic, skipping it");
                    plan.template_errors += 1;
                }
            }
        }

        if !renamed.is_empty() {
            plan.groups.entry(new_group).or_default().extend(renamed);
        }
    }

    plan
}

/// Executes migration sets through an admin interface.
#[derive(Debug, Clone, Copy)]
pub struct SetProcessor {
    require_stable: bool,
}

impl SetProcessor {
    /// Create a processor; `require_stable` selects settled offsets only.
    #[must_use]
    pub fn new(require_stable: bool) -> Self {
        Self { require_stable }
    }

    /// Run `set` once.
    ///
    /// # Errors
    ///
    /// Returns an error if the set's rules are invalid or listing groups or
    /// fetching offsets fails. Render and write failures are counted in the
    /// report instead.
    pub async fn run(
        &self,
        set: &MigrationSet,
        admin: &dyn OffsetAdmin,
        applier: &mut OffsetApplier,
    ) -> Result<SetOutcome> {
        if !set.enabled {
            info!(set = %set.name, "set is disabled, skipping");
            return Ok(SetOutcome::Disabled);
        }
        if let Some(source) = &set.invalid {
            return Err(MigrationError::Config {
                set: set.name.clone(),
                source: Arc::clone(source),
            });
        }
        let Some(rule) = set.group.as_ref() else {
            info!(set = %set.name, "set has no group rule, skipping");
            return Ok(SetOutcome::NoGroupRule);
        };

        let admin_error = |source: AdminError| MigrationError::Admin {
            set: set.name.clone(),
            source,
        };

        let groups = admin.list_consumer_groups().await.map_err(admin_error)?;
        debug!(set = %set.name, groups = groups.len(), "listed consumer groups");

        let candidates = select_candidates(set, rule, &groups);
        if candidates.is_empty() {
            info!(set = %set.name, pattern = %rule.pattern, "no consumer group matched");
            return Ok(SetOutcome::NoCandidates);
        }

        let wanted: BTreeSet<String> = candidates.iter().map(|c| c.group.clone()).collect();
        let snapshots = admin
            .list_committed_offsets(&wanted, self.require_stable)
            .await
            .map_err(admin_error)?;
        if snapshots.is_empty() {
            info!(set = %set.name, "no committed offsets found");
            return Ok(SetOutcome::NoOffsets);
        }

        let plan = plan_offsets(set, rule, &candidates, &snapshots);
        let mut report = SetReport {
            candidates: candidates.len(),
            skipped_entries: plan.skipped_entries,
            template_errors: plan.template_errors,
            ..SetReport::default()
        };

        for (group, proposed) in &plan.groups {
            report.groups_applied += 1;
            match applier.apply(admin, group, proposed).await {
                ApplyOutcome::Written(count) => {
                    info!(set = %set.name, group, count, "altered offsets");
                    report.offsets_written += count;
                }
                ApplyOutcome::Unchanged => {
                    info!(set = %set.name, group, "no updates");
                }
                ApplyOutcome::Failed(_) => report.write_failures += 1,
            }
        }

        info!(
            set = %set.name,
            candidates = report.candidates,
            written = report.offsets_written,
            "set done"
        );
        Ok(SetOutcome::Completed(report))
    }
}
