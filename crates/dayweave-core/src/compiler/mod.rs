//! Constraint Compiler.
//!
//! Merges the phase table, anchors, fixed events, work units and habits
//! into one payload for the generative scheduling service, and renders the
//! same payload as a prompt. Nothing is placed here.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::format_clock;
use crate::error::CompileError;
use crate::habit::Habit;
use crate::phase::{PhaseName, ResolvedAnchor};
use crate::pipeline::PlanContext;
use crate::schedule::{overlaps, EntryKind, FixedEvent};
use crate::task::{PriorityTier, WorkUnit};

/// Clock format every output entry must use.
pub const TIME_FORMAT: &str = "HH:MM";

/// Line shape accepted as an alternative to structured records.
pub const LINE_FORMAT: &str = "HH:MM - HH:MM: <title> [<kind>]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub name: PhaseName,
    pub start: String,
    pub end: String,
    pub qualities: String,
    pub ideal_tasks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedSpec {
    pub title: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorSpec {
    pub name: String,
    pub start: String,
    pub end: String,
    pub phase: PhaseName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub id: String,
    pub title: String,
    pub tier: PriorityTier,
    pub minutes: u32,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub hours_per_day: Option<f64>,
    /// `i/n` for chunked tasks
    #[serde(default)]
    pub chunk: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
    pub preferred_phases: Vec<PhaseName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitSpec {
    pub id: String,
    pub title: String,
    pub minutes: u32,
    pub min_minutes: u32,
    pub max_minutes: u32,
    #[serde(default)]
    pub ideal_phase: Option<PhaseName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingRules {
    pub max_chunk_minutes: u32,
    /// Parts of one task are scheduled in part order
    pub keep_part_order: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputContract {
    pub kinds: Vec<EntryKind>,
    pub record_fields: Vec<String>,
    pub time_format: String,
    pub line_format: String,
}

/// The structured request handed to the generative service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintPayload {
    pub date: String,
    pub timezone: String,
    pub now: String,
    pub window: TimeWindow,
    pub phases: Vec<PhaseSpec>,
    pub fixed_events: Vec<FixedSpec>,
    pub anchors: Vec<AnchorSpec>,
    pub work_units: Vec<UnitSpec>,
    pub habits: Vec<HabitSpec>,
    pub chunking: ChunkingRules,
    pub rules: Vec<String>,
    pub output: OutputContract,
}

/// Anchors that survive next to the fixed events. An anchor clashing with
/// a calendar commitment is left out of the run.
pub fn effective_anchors(anchors: &[ResolvedAnchor], fixed: &[FixedEvent]) -> Vec<ResolvedAnchor> {
    anchors
        .iter()
        .filter(|anchor| {
            let clash = fixed
                .iter()
                .find(|f| overlaps(anchor.start, anchor.end, f.start, f.end));
            if let Some(event) = clash {
                warn!(anchor = %anchor.name, event = %event.title, "anchor overlaps a fixed event, skipped");
            }
            clash.is_none()
        })
        .cloned()
        .collect()
}

/// Local `HH:MM`, suffixed `+1`/`-1` when the instant falls on another
/// local date than the plan.
fn label(ctx: &PlanContext, instant: DateTime<Utc>) -> String {
    label_in(ctx.timezone, ctx.date, instant)
}

fn label_in(tz: Tz, date: chrono::NaiveDate, instant: DateTime<Utc>) -> String {
    let clock = format_clock(tz, instant);
    let local_date = instant.with_timezone(&tz).date_naive();
    match (local_date - date).num_days() {
        0 => clock,
        days if days > 0 => format!("{clock}+{days}"),
        days => format!("{clock}{days}"),
    }
}

fn global_rules() -> Vec<String> {
    vec![
        "Fixed events and anchors are immovable: never move, shorten or drop them, and never overlap them.".into(),
        "No two entries may overlap.".into(),
        "Place each work unit in one of its preferred phases when it fits; urgent tiers first.".into(),
        "Habit durations may flex between min_minutes and max_minutes; prefer the ideal phase.".into(),
        "Place parts of a chunked task in part order.".into(),
        format!("Every entry carries start and end as {TIME_FORMAT} (24h) and a kind tag."),
        "Stay inside the planning window.".into(),
    ]
}

pub struct ConstraintCompiler<'a> {
    ctx: &'a PlanContext,
}

impl<'a> ConstraintCompiler<'a> {
    pub fn new(ctx: &'a PlanContext) -> Self {
        Self { ctx }
    }

    /// Assemble the payload.
    ///
    /// # Errors
    /// Fails if an immovable item is inverted or two anchors overlap.
    pub fn compile(
        &self,
        fixed: &[FixedEvent],
        anchors: &[ResolvedAnchor],
        units: &[WorkUnit],
        habits: &[Habit],
    ) -> Result<ConstraintPayload, CompileError> {
        let ctx = self.ctx;

        for anchor in anchors {
            if anchor.end <= anchor.start {
                return Err(CompileError::InvalidAnchor {
                    name: anchor.name.clone(),
                    message: "end must be after start".into(),
                });
            }
        }
        for pair in anchors.windows(2) {
            if overlaps(pair[0].start, pair[0].end, pair[1].start, pair[1].end) {
                return Err(CompileError::OverlappingAnchors {
                    first: pair[0].name.clone(),
                    second: pair[1].name.clone(),
                });
            }
        }

        let phases = ctx
            .phases
            .phases()
            .iter()
            .map(|p| PhaseSpec {
                name: p.name,
                start: label(ctx, p.start),
                end: label(ctx, p.end),
                qualities: p.qualities.clone(),
                ideal_tasks: p.ideal_tasks.clone(),
            })
            .collect();

        let mut fixed: Vec<&FixedEvent> = fixed.iter().collect();
        fixed.sort_by_key(|e| e.start);
        let fixed_events = fixed
            .into_iter()
            .map(|e| FixedSpec {
                title: e.title.clone(),
                start: label(ctx, e.start),
                end: label(ctx, e.end),
            })
            .collect();

        let anchors = anchors
            .iter()
            .map(|a| AnchorSpec {
                name: a.name.clone(),
                start: label(ctx, a.start),
                end: label(ctx, a.end),
                phase: a.phase,
            })
            .collect();

        let work_units = units
            .iter()
            .map(|u| UnitSpec {
                id: u.id.clone(),
                title: u.title.clone(),
                tier: u.tier,
                minutes: u.effort_minutes,
                deadline: u.deadline.map(|d| {
                    d.with_timezone(&ctx.timezone)
                        .format("%Y-%m-%d %H:%M")
                        .to_string()
                }),
                hours_per_day: u.hours_per_day.map(|h| (h * 100.0).round() / 100.0),
                chunk: u.chunk.map(|c| format!("{}/{}", c.index, c.count)),
                parent: u.parent_title.clone(),
                preferred_phases: u.phases.clone(),
            })
            .collect();

        let habits = habits
            .iter()
            .map(|h| HabitSpec {
                id: h.id.clone(),
                title: h.title.clone(),
                minutes: h.duration_minutes,
                min_minutes: h.duration_minutes.div_ceil(2).max(1),
                max_minutes: h.duration_minutes.saturating_mul(3) / 2,
                ideal_phase: h.ideal_phase,
            })
            .collect();

        let payload = ConstraintPayload {
            date: ctx.date.to_string(),
            timezone: ctx.timezone.name().to_string(),
            now: label(ctx, ctx.now.max(ctx.window_start)),
            window: TimeWindow {
                start: label(ctx, ctx.window_start),
                end: label(ctx, ctx.window_end),
            },
            phases,
            fixed_events,
            anchors,
            work_units,
            habits,
            chunking: ChunkingRules {
                max_chunk_minutes: ctx.max_chunk_minutes,
                keep_part_order: true,
            },
            rules: global_rules(),
            output: OutputContract {
                kinds: vec![EntryKind::Fixed, EntryKind::Anchor, EntryKind::Task, EntryKind::Habit],
                record_fields: ["start_time", "end_time", "title", "kind", "id", "phase"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                time_format: TIME_FORMAT.to_string(),
                line_format: LINE_FORMAT.to_string(),
            },
        };

        debug!(
            fixed = payload.fixed_events.len(),
            anchors = payload.anchors.len(),
            units = payload.work_units.len(),
            habits = payload.habits.len(),
            "constraint payload compiled"
        );
        Ok(payload)
    }
}

/// Human-readable rendering of the payload, followed by the payload itself
/// as JSON.
pub fn render_prompt(payload: &ConstraintPayload) -> String {
    let mut out = String::new();
    let line = |out: &mut String, text: String| {
        out.push_str(&text);
        out.push('\n');
    };

    line(
        &mut out,
        format!(
            "Plan {} ({}) between {} and {}. It is now {}.",
            payload.date, payload.timezone, payload.window.start, payload.window.end, payload.now
        ),
    );

    out.push_str("\n## Phases\n");
    for p in &payload.phases {
        let ideal = if p.ideal_tasks.is_empty() {
            String::new()
        } else {
            format!(" Ideal for: {}.", p.ideal_tasks.join(", "))
        };
        line(&mut out, format!("- {} {}-{}: {}.{ideal}", p.name, p.start, p.end, p.qualities));
    }

    out.push_str("\n## Anchors (immovable)\n");
    if payload.anchors.is_empty() {
        line(&mut out, "- none".into());
    }
    for a in &payload.anchors {
        line(&mut out, format!("- {}-{} {} ({})", a.start, a.end, a.name, a.phase));
    }

    out.push_str("\n## Fixed events (immovable)\n");
    if payload.fixed_events.is_empty() {
        line(&mut out, "- none".into());
    }
    for e in &payload.fixed_events {
        line(&mut out, format!("- {}-{} {}", e.start, e.end, e.title));
    }

    out.push_str("\n## Work units\n");
    if payload.work_units.is_empty() {
        line(&mut out, "- none".into());
    }
    let mut current_tier = None;
    for u in &payload.work_units {
        if current_tier != Some(u.tier) {
            line(&mut out, format!("{}:", u.tier));
            current_tier = Some(u.tier);
        }
        let mut details = vec![format!("{} min", u.minutes)];
        if let Some(deadline) = &u.deadline {
            details.push(format!("due {deadline}"));
        }
        if let Some(hpd) = u.hours_per_day {
            details.push(format!("{hpd:.2} h/day needed"));
        }
        if let Some(chunk) = &u.chunk {
            details.push(format!("part {chunk}"));
        }
        if let Some(parent) = &u.parent {
            details.push(format!("of {parent}"));
        }
        if !u.preferred_phases.is_empty() {
            let names: Vec<&str> = u.preferred_phases.iter().map(PhaseName::as_str).collect();
            details.push(format!("prefer {}", names.join("/")));
        }
        line(&mut out, format!("- [{}] {}: {}", u.id, u.title, details.join(", ")));
    }

    out.push_str("\n## Habits (flexible duration)\n");
    if payload.habits.is_empty() {
        line(&mut out, "- none".into());
    }
    for h in &payload.habits {
        let phase = h
            .ideal_phase
            .map(|p| format!(", ideally in {p}"))
            .unwrap_or_default();
        line(
            &mut out,
            format!(
                "- [{}] {}: {} min ({}-{}){phase}",
                h.id, h.title, h.minutes, h.min_minutes, h.max_minutes
            ),
        );
    }

    out.push_str("\n## Rules\n");
    for (i, rule) in payload.rules.iter().enumerate() {
        line(&mut out, format!("{}. {rule}", i + 1));
    }
    line(
        &mut out,
        format!(
            "{}. Split nothing further: units are already at most {} minutes.",
            payload.rules.len() + 1,
            payload.chunking.max_chunk_minutes
        ),
    );

    out.push_str("\n## Output\n");
    line(
        &mut out,
        format!(
            "Return JSON {{\"schedule_entries\": [...]}} with fields {} and kind one of {}. \
             Lines of the form `{}` are accepted too.",
            payload.output.record_fields.join(", "),
            payload
                .output
                .kinds
                .iter()
                .map(EntryKind::as_str)
                .collect::<Vec<_>>()
                .join("/"),
            payload.output.line_format
        ),
    );

    out.push_str("\n## Constraints (JSON)\n");
    match serde_json::to_string_pretty(payload) {
        Ok(json) => line(&mut out, json),
        Err(err) => warn!(error = %err, "payload could not be serialised for the prompt"),
    }
    out
}
