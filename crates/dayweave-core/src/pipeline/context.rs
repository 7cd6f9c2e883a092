//! Per-run planning context.

use std::time::Duration as StdDuration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::clock::{local_instant, parse_clock};
use crate::error::{CompileError, Result};
use crate::phase::PhaseTable;
use crate::resolver::ResolvePolicy;
use crate::schedule::GenerationId;
use crate::storage::PlannerConfig;
use crate::task::TierTable;

/// Everything a run treats as fixed, built once before compiling and
/// passed by reference to every stage.
#[derive(Debug, Clone)]
pub struct PlanContext {
    pub date: NaiveDate,
    pub timezone: Tz,
    pub now: DateTime<Utc>,
    pub phases: PhaseTable,
    pub tiers: TierTable,
    pub max_chunk_minutes: u32,
    pub max_work_units: usize,
    pub buffer_minutes: u32,
    /// Planning window, already clipped to `now`
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub generation: GenerationId,
    pub generation_timeout: StdDuration,
    pub policy: ResolvePolicy,
}

impl PlanContext {
    /// Resolve phases, anchors and the planning window for `date`.
    ///
    /// # Errors
    /// `ConfigError` for an unusable configuration, `CompileError` when the
    /// phase table or window cannot be pinned to the date.
    pub fn build(config: &PlannerConfig, date: NaiveDate, now: DateTime<Utc>) -> Result<Self> {
        config.validate()?;
        let timezone = config.timezone()?;
        let phases = PhaseTable::resolve(
            config.phases.source()?,
            &config.phases.definitions,
            &config.anchors,
            date,
            timezone,
            config.phases.allow_gaps,
        )?;

        let day_start = window_bound(timezone, date, "planner.day_start", &config.planner.day_start)?;
        let day_end = window_bound(timezone, date, "planner.day_end", &config.planner.day_end)?;
        let window_start = day_start.max(now);
        if window_start >= day_end {
            return Err(CompileError::InvalidWindow {
                start: window_start.to_rfc3339(),
                end: day_end.to_rfc3339(),
            }
            .into());
        }

        Ok(Self {
            date,
            timezone,
            now,
            phases,
            tiers: config.tiers.clone(),
            max_chunk_minutes: config.planner.max_chunk_minutes,
            max_work_units: config.planner.max_work_units,
            buffer_minutes: config.planner.buffer_minutes,
            window_start,
            window_end: day_end,
            generation: GenerationId::new(config.planner.generator_id.clone(), date),
            generation_timeout: StdDuration::from_secs(config.generator.timeout_secs.max(1)),
            policy: config.resolver.policy,
        })
    }
}

fn window_bound(
    tz: Tz,
    date: NaiveDate,
    field: &str,
    value: &str,
) -> std::result::Result<DateTime<Utc>, CompileError> {
    let time = parse_clock(value).ok_or_else(|| CompileError::InvalidClock {
        field: field.to_string(),
        value: value.to_string(),
    })?;
    local_instant(tz, date, time).ok_or_else(|| CompileError::NonexistentLocalTime {
        date: date.to_string(),
        time: value.to_string(),
        timezone: tz.name().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::format_clock;
    use crate::error::CoreError;
    use chrono::TimeZone;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    #[test]
    fn window_starts_at_now_when_later() {
        let config = PlannerConfig::default();
        // 08:00 local
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 6, 0, 0).unwrap();
        let ctx = PlanContext::build(&config, date(), now).unwrap();
        assert_eq!(ctx.window_start, now);
        assert_eq!(format_clock(ctx.timezone, ctx.window_end), "21:45");
        assert_eq!(ctx.generation.generator, "dayweave");
        assert_eq!(ctx.phases.phases().len(), 5);
        assert_eq!(ctx.phases.anchors().len(), 3);
    }

    #[test]
    fn window_uses_day_start_before_it() {
        let config = PlannerConfig::default();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let ctx = PlanContext::build(&config, date(), now).unwrap();
        assert_eq!(format_clock(ctx.timezone, ctx.window_start), "05:30");
    }

    #[test]
    fn past_day_is_a_compile_error() {
        let config = PlannerConfig::default();
        let now = Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap();
        let err = PlanContext::build(&config, date(), now).unwrap_err();
        assert!(matches!(err, CoreError::Compile(CompileError::InvalidWindow { .. })));
        assert_eq!(err.code(), "compile_error");
    }

    #[test]
    fn inverted_phase_aborts_the_build() {
        let mut config = PlannerConfig::default();
        config.phases.definitions[1].end = config.phases.definitions[1].start.clone();
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 4, 0, 0).unwrap();
        let err = PlanContext::build(&config, date(), now).unwrap_err();
        assert!(matches!(err, CoreError::Compile(CompileError::InvertedPhase { .. })));
    }
}
