//! Conflict Resolver.
//!
//! Fixed events and anchors always survive. A generated entry overlapping
//! one of them is dropped, or under [`ResolvePolicy::Shift`] moved to the
//! nearest free slot within its own phase or an adjacent one. Generated
//! entries overlapping an earlier accepted entry are dropped.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::phase::{PhaseTable, ResolvedAnchor};
use crate::schedule::{EntryKind, FixedEvent, ScheduleEntry};
use crate::task::{PriorityTier, WorkUnit};
use crate::timeline::{BusySpan, TimeGapDetector};

/// What to do with a generated entry that hits an immovable one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvePolicy {
    #[default]
    Drop,
    Shift,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DropReason {
    /// The generator re-emitted a fixed event or anchor
    EchoesImmovable,
    OverlapsImmovable { with: String },
    OverlapsEntry { with: String },
    OutsideWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedEntry {
    pub entry: ScheduleEntry,
    #[serde(flatten)]
    pub reason: DropReason,
}

/// An urgent task that ends up with no time on the day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConflictWarning {
    /// Every entry for the task collided and was removed
    FullyDisplaced {
        task_id: String,
        title: String,
        tier: PriorityTier,
    },
    /// Nothing was planned for the task at all
    Unplaced {
        task_id: String,
        title: String,
        tier: PriorityTier,
    },
}

impl fmt::Display for ConflictWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictWarning::FullyDisplaced { title, tier, .. } => {
                write!(f, "{tier} task '{title}' was fully displaced by conflicts")
            }
            ConflictWarning::Unplaced { title, tier, .. } => {
                write!(f, "{tier} task '{title}' has no time on the schedule")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Chronological, immovable entries first on equal starts
    pub entries: Vec<ScheduleEntry>,
    pub dropped: Vec<DroppedEntry>,
    pub shifted: usize,
    pub warnings: Vec<ConflictWarning>,
}

/// Fixed events and anchors as schedule entries.
pub fn immovable_entries(fixed: &[FixedEvent], anchors: &[ResolvedAnchor]) -> Vec<ScheduleEntry> {
    fixed
        .iter()
        .map(FixedEvent::to_entry)
        .chain(anchors.iter().map(|a| ScheduleEntry {
            title: a.name.clone(),
            start: a.start,
            end: a.end,
            kind: EntryKind::Anchor,
            source_id: None,
            phase: Some(a.phase),
        }))
        .collect()
}

/// Units of one task, for matching entries back to their task.
struct TaskGroup<'u> {
    tier: PriorityTier,
    title: &'u str,
    ids: HashSet<&'u str>,
    titles: HashSet<String>,
}

impl TaskGroup<'_> {
    fn matches(&self, entry: &ScheduleEntry) -> bool {
        entry.kind == EntryKind::Task
            && (entry.source_id.as_deref().is_some_and(|id| self.ids.contains(id))
                || self.titles.contains(&entry.title.trim().to_lowercase()))
    }
}

fn group_units(units: &[WorkUnit]) -> BTreeMap<&str, TaskGroup<'_>> {
    let mut groups: BTreeMap<&str, TaskGroup<'_>> = BTreeMap::new();
    for unit in units {
        let group = groups.entry(unit.source_id.as_str()).or_insert_with(|| TaskGroup {
            tier: unit.tier,
            title: &unit.task_title,
            ids: HashSet::from([unit.source_id.as_str()]),
            titles: HashSet::from([unit.task_title.trim().to_lowercase()]),
        });
        group.ids.insert(&unit.id);
        group.titles.insert(unit.title.trim().to_lowercase());
    }
    groups
}

pub struct ConflictResolver<'a> {
    phases: &'a PhaseTable,
    policy: ResolvePolicy,
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(phases: &'a PhaseTable, policy: ResolvePolicy) -> Self {
        Self {
            phases,
            policy,
            window: None,
        }
    }

    /// Keep generated entries, shifted ones included, inside `[start, end)`.
    pub fn with_window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.window = Some((start, end));
        self
    }

    fn within_window(&self, entry: &ScheduleEntry) -> bool {
        self.window
            .map_or(true, |(start, end)| entry.start >= start && entry.end <= end)
    }

    pub fn resolve(
        &self,
        candidates: Vec<ScheduleEntry>,
        fixed: &[FixedEvent],
        anchors: &[ResolvedAnchor],
        units: &[WorkUnit],
    ) -> Resolution {
        let immovable = immovable_entries(fixed, anchors);
        let mut resolution = Resolution::default();
        let mut accepted: Vec<ScheduleEntry> = Vec::with_capacity(candidates.len());
        let groups = group_units(units);
        let mut proposed: HashSet<&str> = HashSet::new();

        for candidate in candidates {
            if candidate.kind.is_immovable() {
                debug!(title = %candidate.title, kind = %candidate.kind, "ignoring echoed immovable entry");
                resolution.dropped.push(DroppedEntry {
                    entry: candidate,
                    reason: DropReason::EchoesImmovable,
                });
                continue;
            }
            for (task_id, group) in &groups {
                if group.matches(&candidate) {
                    proposed.insert(*task_id);
                }
            }

            if !self.within_window(&candidate) {
                warn!(title = %candidate.title, start = %candidate.start, "dropping entry outside the planning window");
                resolution.dropped.push(DroppedEntry {
                    entry: candidate,
                    reason: DropReason::OutsideWindow,
                });
                continue;
            }

            if let Some(block) = immovable.iter().find(|f| f.overlaps(&candidate)) {
                if self.policy == ResolvePolicy::Shift {
                    if let Some(moved) = self.shift(&candidate, &immovable, &accepted) {
                        info!(
                            title = %candidate.title,
                            from = %candidate.start,
                            to = %moved.start,
                            "shifted entry off an immovable block"
                        );
                        resolution.shifted += 1;
                        accepted.push(moved);
                        continue;
                    }
                }
                warn!(title = %candidate.title, with = %block.title, "dropping entry overlapping an immovable block");
                resolution.dropped.push(DroppedEntry {
                    reason: DropReason::OverlapsImmovable {
                        with: block.title.clone(),
                    },
                    entry: candidate,
                });
                continue;
            }

            if let Some(other) = accepted.iter().find(|a| a.overlaps(&candidate)) {
                warn!(title = %candidate.title, with = %other.title, "dropping entry overlapping an earlier entry");
                resolution.dropped.push(DroppedEntry {
                    reason: DropReason::OverlapsEntry {
                        with: other.title.clone(),
                    },
                    entry: candidate,
                });
                continue;
            }

            accepted.push(candidate);
        }

        for (task_id, group) in &groups {
            if !group.tier.is_urgent() || accepted.iter().any(|e| group.matches(e)) {
                continue;
            }
            let warning = if proposed.contains(task_id) {
                ConflictWarning::FullyDisplaced {
                    task_id: task_id.to_string(),
                    title: group.title.to_string(),
                    tier: group.tier,
                }
            } else {
                ConflictWarning::Unplaced {
                    task_id: task_id.to_string(),
                    title: group.title.to_string(),
                    tier: group.tier,
                }
            };
            warn!(task_id = %task_id, warning = %warning, "scheduling gap for urgent task");
            resolution.warnings.push(warning);
        }

        let mut entries = immovable;
        entries.extend(accepted);
        entries.sort_by_key(|e| (e.start, !e.kind.is_immovable(), e.end));
        resolution.entries = entries;
        resolution
    }

    /// Nearest free slot for `entry` within its phase and the phases on
    /// either side of it.
    fn shift(
        &self,
        entry: &ScheduleEntry,
        immovable: &[ScheduleEntry],
        accepted: &[ScheduleEntry],
    ) -> Option<ScheduleEntry> {
        let phases = self.phases.phases();
        let home = self.phases.phase_at(entry.start)?;
        let region_start = phases
            .iter()
            .find(|p| p.end == home.start)
            .map_or(home.start, |p| p.start);
        let region_end = self.phases.next_phase(home).map_or(home.end, |p| p.end);
        let (region_start, region_end) = match self.window {
            Some((start, end)) => (region_start.max(start), region_end.min(end)),
            None => (region_start, region_end),
        };
        if region_start >= region_end {
            return None;
        }

        let busy: Vec<BusySpan> = immovable
            .iter()
            .chain(accepted)
            .map(|e| BusySpan::new(e.start, e.end))
            .collect();
        let length = entry.end - entry.start;

        let best: Option<DateTime<Utc>> = TimeGapDetector::new()
            .find_gaps(&busy, region_start, region_end)
            .into_iter()
            .filter(|gap| gap.end_time - gap.start_time >= length)
            .map(|gap| entry.start.clamp(gap.start_time, gap.end_time - length))
            .min_by_key(|start| (*start - entry.start).num_seconds().abs());

        best.map(|start| ScheduleEntry {
            start,
            end: start + length,
            phase: self.phases.phase_at(start).map(|p| p.name).or(entry.phase),
            ..entry.clone()
        })
    }
}

impl Resolution {
    /// Entries this run produced (tasks and habits).
    pub fn generated(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries.iter().filter(|e| !e.kind.is_immovable())
    }
}
