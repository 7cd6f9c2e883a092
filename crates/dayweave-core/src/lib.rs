//! # Dayweave Core Library
//!
//! Builds a day plan from a calendar, a task list and a habit sheet. The
//! day is split into five energy phases with fixed anchors; tasks are
//! tiered by urgency and chunked into work units; the result is compiled
//! into constraints for a generative scheduler whose answer is parsed,
//! validated and reconciled against the immovable entries. When the
//! generator is unavailable a greedy local placement takes over.
//!
//! ## Architecture
//!
//! - **Phase model**: phase boundaries and anchors resolved for one date
//! - **Task prioritizer**: tiers, per-project caps and chunking
//! - **Habit selector**: active habits due on the date
//! - **Constraint compiler**: the payload and prompt handed to the generator
//! - **Schedule parser**: structured or text answers into validated entries
//! - **Conflict resolver**: immovables win, lower-priority overlaps drop or shift
//! - **Pipeline**: the stage machine that ties it together, with calendar
//!   write-back and rollback
//!
//! ## Key Components
//!
//! - [`Pipeline`]: one planning run
//! - [`PlannerConfig`]: TOML configuration
//! - [`CalendarProvider`], [`TaskProvider`], [`HabitSource`],
//!   [`ScheduleGenerator`]: collaborator seams

pub mod clock;
pub mod compiler;
pub mod error;
pub mod habit;
pub mod integrations;
pub mod parser;
pub mod phase;
pub mod pipeline;
pub mod resolver;
pub mod schedule;
pub mod scheduler;
pub mod storage;
pub mod task;
pub mod timeline;

pub use compiler::{render_prompt, ConstraintCompiler, ConstraintPayload};
pub use error::{
    CompileError, ConfigError, CoreError, DataFetchError, DataSource, GenerationError,
    ParseFailure, ValidationError, WriteBackError,
};
pub use habit::{select_habits, Frequency, Habit, RawHabit};
pub use integrations::{
    CalendarProvider, ChatGenerator, HabitSource, InMemoryCalendar, JsonCalendarFile,
    JsonHabitFile, JsonTaskFile, ProviderError, ScheduleGenerator, TaskProvider,
};
pub use parser::{GeneratorResponse, ParseOutcome, ScheduleParser};
pub use phase::{PhaseName, PhaseTable, ResolvedAnchor, ResolvedPhase};
pub use pipeline::{Pipeline, PipelineStage, PlanContext, PlanOutcome, PlanWarning, WriteReport};
pub use resolver::{ConflictResolver, ConflictWarning, ResolvePolicy, Resolution};
pub use schedule::{EntryKind, FixedEvent, GenerationId, Schedule, ScheduleEntry, ScheduleOrigin};
pub use scheduler::{FallbackPlan, FallbackScheduler};
pub use storage::{PlannerConfig, ScheduleFile};
pub use task::{PriorityTier, RawTask, TaskPrioritizer, TierTable, WorkUnit};
