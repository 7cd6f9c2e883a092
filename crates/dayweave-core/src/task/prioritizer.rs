//! Task Prioritizer.
//!
//! Raw tasks become an ordered list of schedulable work units:
//!
//! 1. decode records (invalid ones are skipped)
//! 2. group children under their parent; a project's deadline is the
//!    earliest of its own and its children's, its effort their sum
//! 3. tier each project or standalone task by hours per day needed
//! 4. sort by tier, then nearest deadline, then hours per day
//! 5. keep the tier's sub-unit cap of each project's children
//! 6. cap the day at `max_units` items
//! 7. split anything longer than `max_chunk_minutes` into even chunks

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{step_number, PriorityTier, RawTask, Task, TierTable};
use crate::error::ValidationError;
use crate::phase::PhaseName;

/// Shortest interval used as "days until deadline" (one hour).
const MIN_DAYS_UNTIL: f64 = 1.0 / 24.0;

/// Position of a chunk within its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: u32,
    pub count: u32,
}

/// A schedulable portion of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Unique within one run (`<task id>` or `<task id>#<n>` for chunks)
    pub id: String,
    /// Id of the task this unit came from
    pub source_id: String,
    pub title: String,
    /// Title of the task itself, without the chunk suffix
    pub task_title: String,
    pub effort_minutes: u32,
    pub tier: PriorityTier,
    pub deadline: Option<DateTime<Utc>>,
    pub hours_per_day: Option<f64>,
    pub chunk: Option<Chunk>,
    pub parent_title: Option<String>,
    /// Preferred phases for this unit's tier
    pub phases: Vec<PhaseName>,
}

/// Why a task produced no work unit this run.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Invalid(ValidationError),
    /// Beyond its project's per-tier sub-unit cap
    OverSubunitCap,
    /// Beyond the daily work-unit limit
    OverDailyLimit,
    NoEffort,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Invalid(err) => write!(f, "invalid: {err}"),
            SkipReason::OverSubunitCap => f.write_str("beyond its project's sub-unit cap"),
            SkipReason::OverDailyLimit => f.write_str("beyond the daily work-unit limit"),
            SkipReason::NoEffort => f.write_str("no effort left"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedTask {
    pub id: String,
    pub title: String,
    pub reason: SkipReason,
}

/// Work units plus the tasks left out of this run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prioritization {
    pub units: Vec<WorkUnit>,
    pub skipped: Vec<SkippedTask>,
}

/// A standalone task or a project with its ordered children.
struct Item {
    head: Task,
    children: Vec<Task>,
    tier: PriorityTier,
    deadline: Option<DateTime<Utc>>,
    hours_per_day: Option<f64>,
    order: usize,
}

pub struct TaskPrioritizer<'a> {
    tiers: &'a TierTable,
    max_chunk_minutes: u32,
    max_units: usize,
}

impl<'a> TaskPrioritizer<'a> {
    pub fn new(tiers: &'a TierTable, max_chunk_minutes: u32, max_units: usize) -> Self {
        Self {
            tiers,
            max_chunk_minutes: max_chunk_minutes.max(1),
            max_units,
        }
    }

    /// Hours per day needed to finish `effort_hours` by `deadline`.
    pub fn hours_per_day(effort_hours: f64, deadline: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let days_until = (deadline - now).num_seconds() as f64 / 86_400.0;
        effort_hours / days_until.max(MIN_DAYS_UNTIL)
    }

    pub fn prioritize(&self, raw: &[RawTask], now: DateTime<Utc>, tz: Tz) -> Prioritization {
        let mut result = Prioritization::default();

        // 1. Decode
        let mut tasks = Vec::with_capacity(raw.len());
        for record in raw {
            match Task::from_raw(record, tz) {
                Ok(task) => tasks.push(task),
                Err(err) => {
                    warn!(task_id = %record.id, title = %record.title, reason = %err, "skipping invalid task");
                    result.skipped.push(SkippedTask {
                        id: record.id.clone(),
                        title: record.title.clone(),
                        reason: SkipReason::Invalid(err),
                    });
                }
            }
        }

        // 2. Group
        let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        let mut children: HashMap<String, Vec<(usize, Task)>> = HashMap::new();
        let mut heads = Vec::new();
        for (order, task) in tasks.iter().enumerate() {
            match task.parent_id.as_deref() {
                Some(parent) if parent != task.id && ids.contains(parent) => {
                    children
                        .entry(parent.to_string())
                        .or_default()
                        .push((order, task.clone()));
                }
                Some(parent) => {
                    warn!(task_id = %task.id, parent_id = %parent, "parent not in batch, treating subtask as standalone");
                    heads.push((order, task.clone()));
                }
                None => heads.push((order, task.clone())),
            }
        }

        // 3. Tier
        let mut items: Vec<Item> = heads
            .into_iter()
            .map(|(order, head)| {
                let mut kids: Vec<(usize, Task)> = children.remove(&head.id).unwrap_or_default();
                kids.sort_by_key(|(i, t)| (step_number(&t.title).unwrap_or(u32::MAX), t.position, *i));
                let kids: Vec<Task> = kids.into_iter().map(|(_, t)| t).collect();

                let (effort, deadline) = if kids.is_empty() {
                    (head.effort_hours, head.deadline)
                } else {
                    let effort = kids.iter().map(|k| k.effort_hours).sum();
                    let deadline = std::iter::once(head.deadline)
                        .chain(kids.iter().map(|k| k.deadline))
                        .flatten()
                        .min();
                    (effort, deadline)
                };
                let hours_per_day = deadline.map(|d| Self::hours_per_day(effort, d, now));
                let tier = self.tiers.classify(hours_per_day);
                debug!(task_id = %head.id, %tier, ?hours_per_day, children = kids.len(), "tiered task");

                Item {
                    head,
                    children: kids,
                    tier,
                    deadline,
                    hours_per_day,
                    order,
                }
            })
            .collect();

        // Children of a parent whose own record was a child elsewhere still
        // hang off `children`; they are standalone for this run.
        for (_, orphans) in children.drain() {
            for (order, task) in orphans {
                let hours_per_day = task
                    .deadline
                    .map(|d| Self::hours_per_day(task.effort_hours, d, now));
                items.push(Item {
                    tier: self.tiers.classify(hours_per_day),
                    deadline: task.deadline,
                    hours_per_day,
                    head: task,
                    children: Vec::new(),
                    order,
                });
            }
        }

        // 4. Sort
        items.sort_by(|a, b| {
            a.tier
                .cmp(&b.tier)
                .then_with(|| match (a.deadline, b.deadline) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                })
                .then_with(|| {
                    let x = a.hours_per_day.unwrap_or(0.0);
                    let y = b.hours_per_day.unwrap_or(0.0);
                    y.total_cmp(&x)
                })
                .then_with(|| a.order.cmp(&b.order))
        });

        // 5-7. Expand, cap, chunk
        let mut emitted = 0usize;
        for item in items {
            let leaves: Vec<(Task, Option<String>)> = if item.children.is_empty() {
                vec![(item.head, None)]
            } else {
                let cap = self.tiers.max_subunits(item.tier);
                let parent_title = item.head.title.clone();
                let mut kept = Vec::new();
                for (i, child) in item.children.into_iter().enumerate() {
                    if i < cap {
                        kept.push((child, Some(parent_title.clone())));
                    } else {
                        debug!(task_id = %child.id, tier = %item.tier, cap, "subtask deferred past tier cap");
                        result.skipped.push(SkippedTask {
                            id: child.id,
                            title: child.title,
                            reason: SkipReason::OverSubunitCap,
                        });
                    }
                }
                kept
            };

            for (task, parent_title) in leaves {
                if emitted >= self.max_units {
                    result.skipped.push(SkippedTask {
                        id: task.id,
                        title: task.title,
                        reason: SkipReason::OverDailyLimit,
                    });
                    continue;
                }
                let minutes = task.effort_minutes();
                if minutes == 0 {
                    result.skipped.push(SkippedTask {
                        id: task.id,
                        title: task.title,
                        reason: SkipReason::NoEffort,
                    });
                    continue;
                }
                emitted += 1;
                self.push_chunks(
                    &mut result.units,
                    &task,
                    minutes,
                    item.tier,
                    item.deadline,
                    item.hours_per_day,
                    parent_title,
                );
            }
        }

        let over_limit = result
            .skipped
            .iter()
            .filter(|s| s.reason == SkipReason::OverDailyLimit)
            .count();
        if over_limit > 0 {
            warn!(over_limit, max_units = self.max_units, "daily work-unit limit reached");
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    fn push_chunks(
        &self,
        units: &mut Vec<WorkUnit>,
        task: &Task,
        minutes: u32,
        tier: PriorityTier,
        deadline: Option<DateTime<Utc>>,
        hours_per_day: Option<f64>,
        parent_title: Option<String>,
    ) {
        let sizes = chunk_minutes(minutes, self.max_chunk_minutes);
        let count = sizes.len() as u32;
        let phases = self.tiers.phases(tier).to_vec();

        for (i, size) in sizes.into_iter().enumerate() {
            let index = i as u32 + 1;
            let (id, title, chunk) = if count == 1 {
                (task.id.clone(), task.title.clone(), None)
            } else {
                (
                    format!("{}#{index}", task.id),
                    format!("{} (part {index}/{count})", task.title),
                    Some(Chunk { index, count }),
                )
            };
            units.push(WorkUnit {
                id,
                source_id: task.id.clone(),
                title,
                task_title: task.title.clone(),
                effort_minutes: size,
                tier,
                deadline,
                hours_per_day,
                chunk,
                parent_title: parent_title.clone(),
                phases: phases.clone(),
            });
        }
    }
}

/// Split `total` minutes into `ceil(total / max)` chunks whose sizes differ
/// by at most one minute and sum to `total`.
pub fn chunk_minutes(total: u32, max: u32) -> Vec<u32> {
    if total == 0 {
        return Vec::new();
    }
    let max = max.max(1);
    let count = total.div_ceil(max);
    let base = total / count;
    let extra = total % count;
    (0..count).map(|i| base + u32::from(i < extra)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    const TZ: Tz = chrono_tz::Europe::Amsterdam;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 6, 0, 0).unwrap()
    }

    fn due_in(hours: i64) -> String {
        (now() + Duration::hours(hours)).to_rfc3339()
    }

    fn prioritize(tasks: &[RawTask]) -> Prioritization {
        let tiers = TierTable::default();
        TaskPrioritizer::new(&tiers, 90, 24).prioritize(tasks, now(), TZ)
    }

    #[test]
    fn long_task_is_chunked_evenly() {
        let tasks = [RawTask::new("p", "Write paper (6h)").due(due_in(24))];
        let units = prioritize(&tasks).units;

        assert_eq!(units.len(), 4);
        assert!(units.iter().all(|u| u.effort_minutes <= 90));
        assert_eq!(units.iter().map(|u| u.effort_minutes).sum::<u32>(), 360);
        assert_eq!(units[0].title, "Write paper (part 1/4)");
        assert_eq!(units[3].id, "p#4");
        assert!(units.iter().all(|u| u.source_id == "p"));
        assert_eq!(units[0].tier, PriorityTier::T1);
    }

    #[test]
    fn tasks_without_deadline_are_t6() {
        let units = prioritize(&[RawTask::new("c", "Clean desk (30m)")]).units;
        assert_eq!(units[0].tier, PriorityTier::T6);
        assert_eq!(units[0].effort_minutes, 30);
        assert!(units[0].chunk.is_none());
    }

    #[test]
    fn sorted_by_tier_then_deadline() {
        let tasks = [
            RawTask::new("later", "Later (1h)").due(due_in(100)),
            RawTask::new("chore", "Chore (1h)"),
            RawTask::new("urgent", "Urgent (5h)").due(due_in(20)),
            RawTask::new("sooner", "Sooner (1h)").due(due_in(90)),
        ];
        let mut ids: Vec<_> = prioritize(&tasks)
            .units
            .into_iter()
            .map(|u| u.source_id)
            .collect();
        // Urgent is chunked, its parts stay together
        ids.dedup();
        assert_eq!(ids, ["urgent", "sooner", "later", "chore"]);
    }

    #[test]
    fn oversized_effort_is_skipped_not_chunked() {
        let tasks = [
            RawTask::new("huge", "Boil the ocean (99999999h)").due(due_in(20)),
            RawTask::new("ok", "Reply to Sam (30m)"),
        ];
        let result = prioritize(&tasks);
        assert_eq!(result.units.len(), 1);
        assert_eq!(result.units[0].id, "ok");
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].id, "huge");
        assert!(matches!(result.skipped[0].reason, SkipReason::Invalid(_)));
    }

    #[test]
    fn project_children_are_capped_by_tier_and_ordered_by_step() {
        // 6 children x 1h due in 20h: 6h/day is T1, cap 5
        let mut tasks = vec![RawTask::new("proj", "Thesis").due(due_in(20))];
        for (id, title) in [
            ("c3", "3. Results"),
            ("c1", "1. Intro"),
            ("c6", "6. Abstract"),
            ("c2", "2. Method"),
            ("c5", "5. Appendix"),
            ("c4", "4. Discussion"),
        ] {
            tasks.push(RawTask::new(id, title).parent("proj"));
        }

        let result = prioritize(&tasks);
        let ids: Vec<_> = result.units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, ["c1", "c2", "c3", "c4", "c5"]);
        assert!(result.units.iter().all(|u| u.tier == PriorityTier::T1));
        assert_eq!(result.units[0].parent_title.as_deref(), Some("Thesis"));
        assert_eq!(
            result.skipped,
            vec![SkippedTask {
                id: "c6".into(),
                title: "6. Abstract".into(),
                reason: SkipReason::OverSubunitCap,
            }]
        );
    }

    #[test]
    fn project_deadline_is_earliest_child_deadline() {
        let tasks = [
            RawTask::new("proj", "Move house"),
            RawTask::new("a", "Pack books (2h)").parent("proj").due(due_in(10)),
            RawTask::new("b", "Book van (1h)").parent("proj"),
        ];
        let units = prioritize(&tasks).units;
        // 3h over 10h is 7.2h/day
        assert_eq!(units[0].tier, PriorityTier::T1);
        assert_eq!(units[0].deadline, Some(now() + Duration::hours(10)));
    }

    #[test]
    fn orphaned_subtask_stands_alone() {
        let tasks = [RawTask::new("kid", "Lonely step (1h)").parent("missing")];
        let units = prioritize(&tasks).units;
        assert_eq!(units.len(), 1);
        assert!(units[0].parent_title.is_none());
    }

    #[test]
    fn daily_limit_applies_before_chunking() {
        let tiers = TierTable::default();
        let tasks = [
            RawTask::new("a", "Big (3h)").due(due_in(30)),
            RawTask::new("b", "Small (1h)").due(due_in(40)),
        ];
        let result = TaskPrioritizer::new(&tiers, 90, 1).prioritize(&tasks, now(), TZ);
        assert_eq!(result.units.len(), 2); // both chunks of "Big"
        assert_eq!(result.skipped[0].reason, SkipReason::OverDailyLimit);
    }

    #[test]
    fn invalid_and_empty_tasks_are_skipped() {
        let mut zero = RawTask::new("z", "Nothing");
        zero.effort_hours = Some(0.0);
        let tasks = [RawTask::new("", "No id"), zero, RawTask::new("ok", "Fine")];
        let result = prioritize(&tasks);
        assert_eq!(result.units.len(), 1);
        assert_eq!(result.skipped.len(), 2);
        assert!(matches!(result.skipped[0].reason, SkipReason::Invalid(_)));
        assert_eq!(result.skipped[1].reason, SkipReason::NoEffort);
    }

    #[test]
    fn chunk_sizes() {
        assert_eq!(chunk_minutes(360, 90), vec![90, 90, 90, 90]);
        assert_eq!(chunk_minutes(200, 90), vec![67, 67, 66]);
        assert_eq!(chunk_minutes(45, 90), vec![45]);
        assert!(chunk_minutes(0, 90).is_empty());
    }

    proptest! {
        #[test]
        fn chunks_cover_effort_without_exceeding_max(total in 1u32..2000, max in 1u32..240) {
            let chunks = chunk_minutes(total, max);
            prop_assert_eq!(chunks.iter().sum::<u32>(), total);
            prop_assert!(chunks.iter().all(|c| *c <= max && *c > 0));
            prop_assert_eq!(chunks.len() as u32, total.div_ceil(max));
        }

        #[test]
        fn earlier_deadline_is_at_least_as_urgent(
            effort in 0.25f64..12.0,
            a_hours in 1i64..400,
            extra in 0i64..400,
        ) {
            let tiers = TierTable::default();
            let hpd_a = TaskPrioritizer::hours_per_day(effort, now() + Duration::hours(a_hours), now());
            let hpd_b = TaskPrioritizer::hours_per_day(effort, now() + Duration::hours(a_hours + extra), now());
            prop_assert!(tiers.classify(Some(hpd_a)) <= tiers.classify(Some(hpd_b)));
        }
    }
}
