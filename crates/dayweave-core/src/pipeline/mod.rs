//! Pipeline Coordinator.
//!
//! One planning run walks
//! `Collecting -> Compiling -> Generating -> Parsing -> Resolving -> Complete`.
//! A failed or timed-out generation, or an unparsable answer, ends the run in
//! `Fallback` instead, with a locally placed schedule. Calendar write-back
//! is a separate step so a caller can inspect (or discard) the plan first.

pub mod context;

pub use context::PlanContext;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compiler::{effective_anchors, render_prompt, ConstraintCompiler, ConstraintPayload};
use crate::error::{
    CoreError, DataFetchError, DataSource, GenerationError, Result, WriteBackError,
};
use crate::habit::{select_habits, Habit};
use crate::integrations::{CalendarProvider, HabitSource, ScheduleGenerator, TaskProvider};
use crate::parser::ScheduleParser;
use crate::resolver::{ConflictResolver, ConflictWarning, DropReason, Resolution};
use crate::scheduler::FallbackScheduler;
use crate::schedule::{EntryKind, FixedEvent, GenerationId, Schedule, ScheduleEntry, ScheduleOrigin};
use crate::storage::PlannerConfig;
use crate::task::{TaskPrioritizer, WorkUnit};

/// Stage of a planning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Collecting,
    Compiling,
    Generating,
    Parsing,
    Resolving,
    Complete,
    Fallback,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Collecting => "collecting",
            PipelineStage::Compiling => "compiling",
            PipelineStage::Generating => "generating",
            PipelineStage::Parsing => "parsing",
            PipelineStage::Resolving => "resolving",
            PipelineStage::Complete => "complete",
            PipelineStage::Fallback => "fallback",
        }
    }

    pub fn can_transition_to(&self, next: PipelineStage) -> bool {
        use PipelineStage::*;
        matches!(
            (self, next),
            (Collecting, Compiling)
                | (Compiling, Generating)
                | (Generating, Parsing)
                | (Parsing, Resolving)
                | (Resolving, Complete)
                | (Generating, Fallback)
                | (Parsing, Fallback)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Complete | PipelineStage::Fallback)
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current stage plus every stage visited.
#[derive(Debug, Clone)]
struct StageTracker {
    current: PipelineStage,
    trace: Vec<PipelineStage>,
}

impl StageTracker {
    fn new() -> Self {
        Self {
            current: PipelineStage::Collecting,
            trace: vec![PipelineStage::Collecting],
        }
    }

    fn advance(&mut self, next: PipelineStage) -> Result<()> {
        if !self.current.can_transition_to(next) {
            return Err(CoreError::Custom(format!(
                "invalid pipeline transition {} -> {next}",
                self.current
            )));
        }
        debug!(from = %self.current, to = %next, "pipeline stage");
        self.current = next;
        self.trace.push(next);
        Ok(())
    }
}

/// Something the caller should know about a run that still produced a
/// schedule.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanWarning {
    /// A collaborator failed and was treated as empty
    SourceUnavailable { source: String, message: String },
    /// A calendar event with an unusable time range
    InvalidEvent { title: String },
    AnchorSkipped { name: String },
    TaskSkipped { id: String, title: String, reason: String },
    /// The generator was bypassed; `code` is the machine-readable reason
    FallbackUsed { code: String, reason: String },
    EntryRejected { raw: String, reason: String },
    EntryDropped { title: String, reason: DropReason },
    Unplaced { id: String, title: String, kind: EntryKind },
    Conflict { warning: ConflictWarning },
    /// Nothing but immovables on the day
    EmptyDay,
}

/// Result of [`Pipeline::plan`].
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub schedule: Schedule,
    /// `Complete` or `Fallback`
    pub stage: PipelineStage,
    pub trace: Vec<PipelineStage>,
    pub warnings: Vec<PlanWarning>,
    pub payload: ConstraintPayload,
    pub prompt: String,
    pub context: PlanContext,
    pub units: Vec<WorkUnit>,
}

impl PlanOutcome {
    pub fn used_fallback(&self) -> bool {
        self.stage == PipelineStage::Fallback
    }
}

/// Counts from a successful write-back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    /// Entries from earlier runs for the same generator and date
    pub deleted: usize,
    pub created: usize,
    pub ids: Vec<String>,
}

/// Inputs gathered in the collecting stage.
struct Collected {
    fixed: Vec<FixedEvent>,
    tasks: Vec<crate::task::RawTask>,
    habits: Vec<crate::habit::RawHabit>,
}

/// Compiled inputs shared by the generated and fallback paths.
struct Compiled {
    ctx: PlanContext,
    fixed: Vec<FixedEvent>,
    anchors: Vec<crate::phase::ResolvedAnchor>,
    units: Vec<WorkUnit>,
    habits: Vec<Habit>,
    payload: ConstraintPayload,
    prompt: String,
}

pub struct Pipeline<'a> {
    config: &'a PlannerConfig,
    calendar: &'a dyn CalendarProvider,
    tasks: &'a dyn TaskProvider,
    habits: &'a dyn HabitSource,
    generator: Option<&'a dyn ScheduleGenerator>,
    cancel: CancellationToken,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a PlannerConfig,
        calendar: &'a dyn CalendarProvider,
        tasks: &'a dyn TaskProvider,
        habits: &'a dyn HabitSource,
    ) -> Self {
        Self {
            config,
            calendar,
            tasks,
            habits,
            generator: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_generator(mut self, generator: &'a dyn ScheduleGenerator) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Cancelling the token stops the run at the next stage boundary.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn check_cancelled(&self, stage: PipelineStage) -> Result<()> {
        if self.cancel.is_cancelled() {
            warn!(%stage, "planning run cancelled");
            return Err(CoreError::Cancelled {
                stage: stage.to_string(),
            });
        }
        Ok(())
    }

    /// Plan `date` as seen at `now`.
    ///
    /// # Errors
    /// Configuration and compile errors are fatal, as is cancellation.
    /// Provider and generator failures are not: they surface as warnings,
    /// the latter with a fallback schedule.
    pub async fn plan(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<PlanOutcome> {
        let mut stages = StageTracker::new();
        let mut warnings = Vec::new();

        // Collecting
        self.check_cancelled(PipelineStage::Collecting)?;
        let collected = self.collect(date, &mut warnings).await;

        // Compiling
        self.check_cancelled(PipelineStage::Compiling)?;
        stages.advance(PipelineStage::Compiling)?;
        let compiled = self.compile(collected, date, now, &mut warnings)?;

        // Generating
        self.check_cancelled(PipelineStage::Generating)?;
        stages.advance(PipelineStage::Generating)?;
        let response = self.generate(&compiled).await?;

        let (resolution, origin) = match response {
            Ok(response) => {
                stages.advance(PipelineStage::Parsing)?;
                match ScheduleParser::new(&compiled.ctx).parse(&response) {
                    Ok(parsed) => {
                        for rejected in &parsed.rejected {
                            warnings.push(PlanWarning::EntryRejected {
                                raw: rejected.raw.clone(),
                                reason: rejected.reason.to_string(),
                            });
                        }
                        self.check_cancelled(PipelineStage::Resolving)?;
                        stages.advance(PipelineStage::Resolving)?;
                        let resolution = self.resolve(&compiled, parsed.entries);
                        stages.advance(PipelineStage::Complete)?;
                        (resolution, ScheduleOrigin::Generated)
                    }
                    Err(failure) => {
                        stages.advance(PipelineStage::Fallback)?;
                        let err = CoreError::from(failure);
                        (self.fallback(&compiled, &err, &mut warnings), ScheduleOrigin::Fallback)
                    }
                }
            }
            Err(failure) => {
                stages.advance(PipelineStage::Fallback)?;
                let err = CoreError::from(failure);
                (self.fallback(&compiled, &err, &mut warnings), ScheduleOrigin::Fallback)
            }
        };

        for dropped in &resolution.dropped {
            if dropped.reason != DropReason::EchoesImmovable {
                warnings.push(PlanWarning::EntryDropped {
                    title: dropped.entry.title.clone(),
                    reason: dropped.reason.clone(),
                });
            }
        }
        warnings.extend(
            resolution
                .warnings
                .iter()
                .cloned()
                .map(|warning| PlanWarning::Conflict { warning }),
        );
        if resolution.generated().next().is_none() {
            warn!(%date, "no tasks or habits on the schedule");
            warnings.push(PlanWarning::EmptyDay);
        }

        let Compiled {
            ctx,
            units,
            payload,
            prompt,
            ..
        } = compiled;
        let schedule = Schedule {
            date,
            generation: ctx.generation.clone(),
            origin,
            entries: resolution.entries,
        };
        info!(
            %date,
            stage = %stages.current,
            entries = schedule.entries.len(),
            warnings = warnings.len(),
            "planning run finished"
        );

        Ok(PlanOutcome {
            schedule,
            stage: stages.current,
            trace: stages.trace,
            warnings,
            payload,
            prompt,
            context: ctx,
            units,
        })
    }

    /// Query the three collaborators concurrently. Failures leave the
    /// source empty.
    async fn collect(&self, date: NaiveDate, warnings: &mut Vec<PlanWarning>) -> Collected {
        let (events, tasks, habits) = tokio::join!(
            self.calendar.list_events(date),
            self.tasks.list_open_tasks(),
            self.habits.list_habits(),
        );

        let mut unavailable = |kind: DataSource, message: String| {
            let err = DataFetchError::new(kind, message);
            warn!(source = %kind, error = %err, "data source treated as empty");
            warnings.push(PlanWarning::SourceUnavailable {
                source: kind.to_string(),
                message: err.message,
            });
        };

        let events = events.unwrap_or_else(|e| {
            unavailable(DataSource::Calendar, e.0);
            Vec::new()
        });
        let tasks = tasks.unwrap_or_else(|e| {
            unavailable(DataSource::Tasks, e.0);
            Vec::new()
        });
        let habits = habits.unwrap_or_else(|e| {
            unavailable(DataSource::Habits, e.0);
            Vec::new()
        });

        let generator = &self.config.planner.generator_id;
        let mut fixed = Vec::with_capacity(events.len());
        for event in events {
            if event.generated_by(generator) {
                debug!(title = %event.title, "skipping entry from an earlier run");
            } else if event.end <= event.start {
                warn!(title = %event.title, start = %event.start, end = %event.end, "calendar event with empty range ignored");
                warnings.push(PlanWarning::InvalidEvent { title: event.title });
            } else {
                fixed.push(event);
            }
        }

        info!(
            fixed = fixed.len(),
            tasks = tasks.len(),
            habits = habits.len(),
            "inputs collected"
        );
        Collected {
            fixed,
            tasks,
            habits,
        }
    }

    fn compile(
        &self,
        collected: Collected,
        date: NaiveDate,
        now: DateTime<Utc>,
        warnings: &mut Vec<PlanWarning>,
    ) -> Result<Compiled> {
        let ctx = PlanContext::build(self.config, date, now)?;

        let anchors = effective_anchors(ctx.phases.anchors(), &collected.fixed);
        for anchor in ctx.phases.anchors() {
            if !anchors.iter().any(|a| a.name == anchor.name) {
                warnings.push(PlanWarning::AnchorSkipped {
                    name: anchor.name.clone(),
                });
            }
        }

        let prioritization = TaskPrioritizer::new(&ctx.tiers, ctx.max_chunk_minutes, ctx.max_work_units)
            .prioritize(&collected.tasks, now, ctx.timezone);
        warnings.extend(prioritization.skipped.iter().map(|s| PlanWarning::TaskSkipped {
            id: s.id.clone(),
            title: s.title.clone(),
            reason: s.reason.to_string(),
        }));

        let habits = select_habits(&collected.habits, date);
        let payload = ConstraintCompiler::new(&ctx).compile(
            &collected.fixed,
            &anchors,
            &prioritization.units,
            &habits,
        )?;
        let prompt = render_prompt(&payload);

        Ok(Compiled {
            ctx,
            fixed: collected.fixed,
            anchors,
            units: prioritization.units,
            habits,
            payload,
            prompt,
        })
    }

    /// The generator's answer, or why there is none. Only cancellation is an
    /// outer error.
    async fn generate(
        &self,
        compiled: &Compiled,
    ) -> Result<std::result::Result<crate::parser::GeneratorResponse, GenerationError>> {
        let Some(generator) = self.generator else {
            return Ok(Err(GenerationError::Unavailable));
        };
        let timeout = compiled.ctx.generation_timeout;
        debug!(generator = generator.name(), timeout_secs = timeout.as_secs(), "calling schedule generator");

        tokio::select! {
            _ = self.cancel.cancelled() => Err(CoreError::Cancelled {
                stage: PipelineStage::Generating.to_string(),
            }),
            result = tokio::time::timeout(timeout, generator.generate(&compiled.payload, &compiled.prompt)) => {
                Ok(result.unwrap_or(Err(GenerationError::Timeout {
                    timeout_secs: timeout.as_secs(),
                })))
            }
        }
    }

    fn resolve(&self, compiled: &Compiled, candidates: Vec<ScheduleEntry>) -> Resolution {
        ConflictResolver::new(&compiled.ctx.phases, compiled.ctx.policy)
            .with_window(compiled.ctx.window_start, compiled.ctx.window_end)
            .resolve(candidates, &compiled.fixed, &compiled.anchors, &compiled.units)
    }

    fn fallback(
        &self,
        compiled: &Compiled,
        reason: &CoreError,
        warnings: &mut Vec<PlanWarning>,
    ) -> Resolution {
        warn!(code = reason.code(), reason = %reason, "falling back to local placement");
        warnings.push(PlanWarning::FallbackUsed {
            code: reason.code().to_string(),
            reason: reason.to_string(),
        });

        let plan = FallbackScheduler::new(&compiled.ctx).plan(
            &compiled.fixed,
            &compiled.anchors,
            &compiled.units,
            &compiled.habits,
        );
        warnings.extend(plan.unplaced.iter().map(|u| PlanWarning::Unplaced {
            id: u.id.clone(),
            title: u.title.clone(),
            kind: u.kind,
        }));
        self.resolve(compiled, plan.entries)
    }

    /// Replace this generator's entries for the schedule's date.
    ///
    /// Entries from earlier runs are deleted first. If insertion fails part
    /// way, whatever this run inserted is deleted again.
    ///
    /// # Errors
    /// [`WriteBackError`] with insert and rollback counts.
    pub async fn write_back(&self, schedule: &Schedule) -> Result<WriteReport> {
        self.check_cancelled(PipelineStage::Complete)?;
        let generation = &schedule.generation;

        let deleted = self
            .calendar
            .delete_events(generation)
            .await
            .map_err(|e| WriteBackError {
                inserted: 0,
                rolled_back: 0,
                message: format!("could not remove earlier entries: {e}"),
            })?;

        let entries: Vec<ScheduleEntry> = schedule.generated_entries().cloned().collect();
        match self.calendar.create_events(&entries, generation).await {
            Ok(ids) => {
                info!(%generation, deleted, created = ids.len(), "schedule written to calendar");
                Ok(WriteReport {
                    deleted,
                    created: ids.len(),
                    ids,
                })
            }
            Err(failure) => {
                let inserted = failure.created.len();
                warn!(%generation, inserted, error = %failure, "write-back failed, rolling back");
                let rolled_back = match self.calendar.delete_events(generation).await {
                    Ok(count) => count,
                    Err(err) => {
                        warn!(%generation, error = %err, "rollback failed");
                        0
                    }
                };
                Err(WriteBackError {
                    inserted,
                    rolled_back,
                    message: failure.message,
                }
                .into())
            }
        }
    }

    /// Delete this generator's entries for `date` without planning.
    pub async fn clear(&self, date: NaiveDate) -> Result<usize> {
        let generation = GenerationId::new(self.config.planner.generator_id.clone(), date);
        let removed = self
            .calendar
            .delete_events(&generation)
            .await
            .map_err(|e| DataFetchError::new(DataSource::Calendar, e.0))?;
        info!(%date, removed, "cleared planned entries");
        Ok(removed)
    }
}
