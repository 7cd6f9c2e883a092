//! Rule-based fallback placement.
//!
//! Used when the generative service is unavailable or its answer cannot be
//! parsed:
//! - Fixed events and anchors are blocked out first
//! - Work units go, in priority order, into the first of their tier's
//!   phases with room, else the earliest free slot of the day
//! - Parts of one task keep their order
//! - Habits go into their ideal phase, else any free slot, shrinking to
//!   half their duration when nothing longer is left

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::habit::Habit;
use crate::phase::{PhaseName, ResolvedAnchor};
use crate::pipeline::PlanContext;
use crate::schedule::{EntryKind, FixedEvent, ScheduleEntry};
use crate::task::WorkUnit;
use crate::timeline::{first_fit, BusySpan, TimeGap, TimeGapDetector};

/// Something the fallback could not fit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnplacedItem {
    pub id: String,
    pub title: String,
    pub kind: EntryKind,
    pub minutes: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FallbackPlan {
    /// Placed tasks and habits, in placement order
    pub entries: Vec<ScheduleEntry>,
    pub unplaced: Vec<UnplacedItem>,
}

/// Greedy scheduler over the free time of one day
pub struct FallbackScheduler<'a> {
    ctx: &'a PlanContext,
    /// Gap kept after each placed entry
    buffer: Duration,
}

impl<'a> FallbackScheduler<'a> {
    pub fn new(ctx: &'a PlanContext) -> Self {
        Self {
            ctx,
            buffer: Duration::minutes(i64::from(ctx.buffer_minutes)),
        }
    }

    /// Place `units` and `habits` around the immovable entries.
    pub fn plan(
        &self,
        fixed: &[FixedEvent],
        anchors: &[ResolvedAnchor],
        units: &[WorkUnit],
        habits: &[Habit],
    ) -> FallbackPlan {
        let mut plan = FallbackPlan::default();

        // 1. Block out immovables
        let mut busy: Vec<BusySpan> = fixed
            .iter()
            .map(|e| BusySpan::new(e.start, e.end))
            .chain(anchors.iter().map(|a| BusySpan::new(a.start, a.end)))
            .collect();

        // 2. Work units
        let mut not_before: HashMap<&str, DateTime<Utc>> = HashMap::new();
        for unit in units {
            let earliest = not_before
                .get(unit.source_id.as_str())
                .copied()
                .unwrap_or(self.ctx.window_start)
                .max(self.ctx.window_start);
            let minutes = i64::from(unit.effort_minutes);

            match self.find_slot(&busy, &unit.phases, minutes, earliest) {
                Some(start) => {
                    let end = start + Duration::minutes(minutes);
                    debug!(unit = %unit.id, tier = %unit.tier, %start, "placed work unit");
                    busy.push(BusySpan::new(start, end + self.buffer));
                    not_before.insert(unit.source_id.as_str(), end);
                    plan.entries.push(self.entry(&unit.title, start, end, EntryKind::Task, &unit.id));
                }
                None => {
                    warn!(unit = %unit.id, title = %unit.title, minutes, "no room for work unit");
                    plan.unplaced.push(UnplacedItem {
                        id: unit.id.clone(),
                        title: unit.title.clone(),
                        kind: EntryKind::Task,
                        minutes: unit.effort_minutes,
                    });
                }
            }
        }

        // 3. Habits
        for habit in habits {
            let full = i64::from(habit.duration_minutes);
            let least = (full + 1) / 2;
            let preferred: Vec<PhaseName> = habit.ideal_phase.into_iter().collect();
            let earliest = self.ctx.window_start;

            let slot = self
                .find_slot(&busy, &preferred, full, earliest)
                .map(|start| (start, full))
                .or_else(|| self.widest_slot(&busy, &preferred, least.max(1), earliest));

            match slot {
                Some((start, minutes)) => {
                    let end = start + Duration::minutes(minutes);
                    if minutes < full {
                        debug!(habit = %habit.id, minutes, full, "habit shortened to fit");
                    }
                    busy.push(BusySpan::new(start, end + self.buffer));
                    plan.entries.push(self.entry(&habit.title, start, end, EntryKind::Habit, &habit.id));
                }
                None => {
                    warn!(habit = %habit.id, title = %habit.title, "no room for habit");
                    plan.unplaced.push(UnplacedItem {
                        id: habit.id.clone(),
                        title: habit.title.clone(),
                        kind: EntryKind::Habit,
                        minutes: habit.duration_minutes,
                    });
                }
            }
        }

        info!(
            placed = plan.entries.len(),
            unplaced = plan.unplaced.len(),
            "fallback schedule built"
        );
        plan
    }

    fn entry(
        &self,
        title: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        kind: EntryKind,
        source_id: &str,
    ) -> ScheduleEntry {
        ScheduleEntry {
            title: title.to_string(),
            start,
            end,
            kind,
            source_id: Some(source_id.to_string()),
            phase: self.ctx.phases.phase_at(start).map(|p| p.name),
        }
    }

    /// Search regions: each preferred phase (clipped to the window and
    /// `earliest`) in order, then the whole remaining window.
    fn regions(&self, preferred: &[PhaseName], earliest: DateTime<Utc>) -> Vec<TimeGap> {
        let window = TimeGap::new(earliest, self.ctx.window_end);
        preferred
            .iter()
            .filter_map(|name| self.ctx.phases.phase(*name))
            .filter_map(|phase| TimeGap::new(phase.start, phase.end))
            .chain(window)
            .filter_map(|region| region.clip(earliest, self.ctx.window_end))
            .collect()
    }

    fn find_slot(
        &self,
        busy: &[BusySpan],
        preferred: &[PhaseName],
        minutes: i64,
        earliest: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.regions(preferred, earliest)
            .iter()
            .find_map(|region| first_fit(region, minutes, busy))
    }

    /// The longest free stretch of at least `least` minutes in the first
    /// region that has one.
    fn widest_slot(
        &self,
        busy: &[BusySpan],
        preferred: &[PhaseName],
        least: i64,
        earliest: DateTime<Utc>,
    ) -> Option<(DateTime<Utc>, i64)> {
        let detector = TimeGapDetector::new().with_min_gap(least);
        self.regions(preferred, earliest).iter().find_map(|region| {
            detector
                .find_gaps(busy, region.start_time, region.end_time)
                .into_iter()
                .max_by_key(|gap| (gap.duration_minutes(), std::cmp::Reverse(gap.start_time)))
                .map(|gap| (gap.start_time, gap.duration_minutes()))
        })
    }
}
