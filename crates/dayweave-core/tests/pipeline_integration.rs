//! Planning runs end to end against in-memory collaborators.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use dayweave_core::integrations::{CalendarProvider, HabitSource, ProviderError, TaskProvider};
use dayweave_core::{
    ConstraintPayload, CoreError, EntryKind, FixedEvent, GenerationError, GeneratorResponse,
    InMemoryCalendar, Pipeline, PipelineStage, PlanWarning, PlannerConfig, RawHabit, RawTask,
    ScheduleGenerator, ScheduleOrigin,
};
use tokio_util::sync::CancellationToken;

const TZ: Tz = chrono_tz::Europe::Amsterdam;

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
}

fn local(hour: u32, min: u32) -> DateTime<Utc> {
    TZ.with_ymd_and_hms(2025, 6, 2, hour, min, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn meeting() -> FixedEvent {
    let mut event = FixedEvent::new("Meeting", local(10, 0), local(11, 0));
    event.id = Some("cal-1".into());
    event
}

struct Tasks(Vec<RawTask>);

#[async_trait]
impl TaskProvider for Tasks {
    async fn list_open_tasks(&self) -> Result<Vec<RawTask>, ProviderError> {
        Ok(self.0.clone())
    }
}

struct BrokenTasks;

#[async_trait]
impl TaskProvider for BrokenTasks {
    async fn list_open_tasks(&self) -> Result<Vec<RawTask>, ProviderError> {
        Err(ProviderError::new("token expired"))
    }
}

struct NoHabits;

#[async_trait]
impl HabitSource for NoHabits {
    async fn list_habits(&self) -> Result<Vec<RawHabit>, ProviderError> {
        Ok(Vec::new())
    }
}

/// Answers every request with the same text.
struct Scripted(&'static str);

#[async_trait]
impl ScheduleGenerator for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        _payload: &ConstraintPayload,
        _prompt: &str,
    ) -> Result<GeneratorResponse, GenerationError> {
        Ok(GeneratorResponse::Text(self.0.to_string()))
    }
}

/// Never answers within the configured bound.
struct Stalled;

#[async_trait]
impl ScheduleGenerator for Stalled {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn generate(
        &self,
        _payload: &ConstraintPayload,
        _prompt: &str,
    ) -> Result<GeneratorResponse, GenerationError> {
        tokio::time::sleep(StdDuration::from_secs(30)).await;
        Ok(GeneratorResponse::Text(String::new()))
    }
}

fn fallback_code(warnings: &[PlanWarning]) -> Option<&str> {
    warnings.iter().find_map(|w| match w {
        PlanWarning::FallbackUsed { code, .. } => Some(code.as_str()),
        _ => None,
    })
}

#[tokio::test]
async fn generated_plan_keeps_the_meeting_and_all_report_minutes() {
    let config = PlannerConfig::default();
    let calendar = InMemoryCalendar::with_events(TZ, vec![meeting()]);
    let tasks = Tasks(vec![RawTask::new("r", "Report (2h)").due("2025-06-02")]);
    let generator = Scripted(
        "09:00 - 10:00: Report [task]\n\
         10:30 - 11:30: Report [task]\n\
         11:30 - 12:30: Report [task]",
    );

    let outcome = Pipeline::new(&config, &calendar, &tasks, &NoHabits)
        .with_generator(&generator)
        .plan(date(), local(7, 0))
        .await
        .unwrap();

    assert_eq!(outcome.stage, PipelineStage::Complete);
    assert_eq!(outcome.schedule.origin, ScheduleOrigin::Generated);

    let fixed: Vec<_> = outcome.schedule.entries_of(EntryKind::Fixed).collect();
    assert_eq!(fixed.len(), 1);
    assert_eq!((fixed[0].start, fixed[0].end), (local(10, 0), local(11, 0)));
    assert_eq!(fixed[0].title, "Meeting");

    // The 10:30 block collides with the meeting and is dropped
    let report: Vec<_> = outcome.schedule.entries_of(EntryKind::Task).collect();
    assert!(report.iter().all(|e| !e.overlaps_range(local(10, 0), local(11, 0))));
    assert_eq!(report.iter().map(|e| e.duration_minutes()).sum::<i64>(), 120);
    assert!(outcome
        .warnings
        .iter()
        .any(|w| matches!(w, PlanWarning::EntryDropped { title, .. } if title == "Report")));
}

#[tokio::test]
async fn fallback_chunks_a_long_paper_without_overlaps() {
    let config = PlannerConfig::default();
    let calendar = InMemoryCalendar::with_events(TZ, vec![meeting()]);
    let due = (local(7, 0) + Duration::days(1)).to_rfc3339();
    let tasks = Tasks(vec![RawTask::new("p", "Write paper (6h)").due(due)]);

    let outcome = Pipeline::new(&config, &calendar, &tasks, &NoHabits)
        .plan(date(), local(7, 0))
        .await
        .unwrap();

    assert_eq!(outcome.stage, PipelineStage::Fallback);
    assert_eq!(fallback_code(&outcome.warnings), Some("generation_error"));

    let chunks: Vec<_> = outcome.schedule.entries_of(EntryKind::Task).collect();
    assert_eq!(chunks.len(), 4);
    assert!(chunks.iter().all(|e| e.duration_minutes() <= 90));
    assert_eq!(chunks.iter().map(|e| e.duration_minutes()).sum::<i64>(), 360);

    let entries = &outcome.schedule.entries;
    for (i, a) in entries.iter().enumerate() {
        for b in &entries[i + 1..] {
            assert!(!a.overlaps(b), "{} overlaps {}", a.title, b.title);
        }
    }
}

#[tokio::test]
async fn malformed_lines_are_ignored() {
    let config = PlannerConfig::default();
    let calendar = InMemoryCalendar::new(TZ);
    let tasks = Tasks(Vec::new());
    let generator = Scripted("9:00-10:00: Deep Work [task]\ngarbage");

    let outcome = Pipeline::new(&config, &calendar, &tasks, &NoHabits)
        .with_generator(&generator)
        .plan(date(), local(7, 0))
        .await
        .unwrap();

    assert_eq!(outcome.stage, PipelineStage::Complete);
    let tasks: Vec<_> = outcome.schedule.entries_of(EntryKind::Task).collect();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Deep Work");
    assert_eq!((tasks[0].start, tasks[0].end), (local(9, 0), local(10, 0)));
}

#[tokio::test]
async fn entries_off_the_planned_day_are_not_written() {
    let config = PlannerConfig::default();
    let calendar = InMemoryCalendar::new(TZ);
    let tasks = Tasks(Vec::new());
    let generator = Scripted(
        r#"{"entries": [
            {"start_time": "2031-01-01T09:00:00Z", "end_time": "2031-01-01T10:00:00Z", "title": "Other year", "kind": "task"},
            {"start_time": "23:00", "end_time": "23:55", "title": "After day end", "kind": "task"},
            {"start_time": "06:00", "end_time": "06:30", "title": "Already past", "kind": "habit"},
            {"start_time": "09:00", "end_time": "10:00", "title": "Deep Work", "kind": "task"}
        ]}"#,
    );

    let pipeline = Pipeline::new(&config, &calendar, &tasks, &NoHabits).with_generator(&generator);
    let outcome = pipeline.plan(date(), local(7, 0)).await.unwrap();

    assert_eq!(outcome.stage, PipelineStage::Complete);
    let titles: Vec<_> = outcome
        .schedule
        .entries
        .iter()
        .filter(|e| matches!(e.kind, EntryKind::Task | EntryKind::Habit))
        .map(|e| e.title.as_str())
        .collect();
    assert_eq!(titles, ["Deep Work"]);
    let rejected = outcome
        .warnings
        .iter()
        .filter(|w| matches!(w, PlanWarning::EntryRejected { reason, .. } if reason.contains("planning window")))
        .count();
    assert_eq!(rejected, 3);

    pipeline.write_back(&outcome.schedule).await.unwrap();
    let stored = calendar.events().await;
    assert!(stored.iter().any(|e| e.title == "Deep Work"));
    assert!(!stored
        .iter()
        .any(|e| ["Other year", "After day end", "Already past"].contains(&e.title.as_str())));
}

#[tokio::test]
async fn generator_timeout_falls_back_with_immovables_intact() {
    let mut config = PlannerConfig::default();
    config.generator.timeout_secs = 1;
    let calendar = InMemoryCalendar::with_events(TZ, vec![meeting()]);
    let tasks = Tasks(vec![RawTask::new("r", "Report (2h)").due("2025-06-02")]);

    let outcome = Pipeline::new(&config, &calendar, &tasks, &NoHabits)
        .with_generator(&Stalled)
        .plan(date(), local(5, 0))
        .await
        .unwrap();

    assert_eq!(outcome.stage, PipelineStage::Fallback);
    assert_eq!(
        outcome.trace,
        [
            PipelineStage::Collecting,
            PipelineStage::Compiling,
            PipelineStage::Generating,
            PipelineStage::Fallback
        ]
    );
    assert_eq!(fallback_code(&outcome.warnings), Some("generation_timeout"));
    assert_eq!(outcome.schedule.origin, ScheduleOrigin::Fallback);

    let fixed: Vec<_> = outcome.schedule.entries_of(EntryKind::Fixed).collect();
    assert_eq!(fixed.len(), 1);
    assert_eq!((fixed[0].start, fixed[0].end), (local(10, 0), local(11, 0)));

    let anchors: Vec<_> = outcome
        .schedule
        .entries_of(EntryKind::Anchor)
        .map(|e| (e.title.as_str(), e.start))
        .collect();
    assert_eq!(
        anchors,
        [
            ("Morning reflection", local(5, 30)),
            ("Midday pause", local(13, 0)),
            ("Evening review", local(21, 0))
        ]
    );
    let report: i64 = outcome
        .schedule
        .entries_of(EntryKind::Task)
        .map(|e| e.duration_minutes())
        .sum();
    assert_eq!(report, 120);
}

#[tokio::test]
async fn unparsable_answer_falls_back() {
    let config = PlannerConfig::default();
    let calendar = InMemoryCalendar::new(TZ);
    let tasks = Tasks(vec![RawTask::new("r", "Report (1h)")]);
    let generator = Scripted("I could not come up with a plan today.");

    let outcome = Pipeline::new(&config, &calendar, &tasks, &NoHabits)
        .with_generator(&generator)
        .plan(date(), local(7, 0))
        .await
        .unwrap();

    assert_eq!(outcome.stage, PipelineStage::Fallback);
    assert_eq!(outcome.trace.last(), Some(&PipelineStage::Fallback));
    assert!(outcome.trace.contains(&PipelineStage::Parsing));
    assert_eq!(fallback_code(&outcome.warnings), Some("parse_failure"));
    assert_eq!(outcome.schedule.minutes_for("r"), 60);
}

#[tokio::test]
async fn regeneration_replaces_the_previous_run() {
    let config = PlannerConfig::default();
    let calendar = InMemoryCalendar::with_events(TZ, vec![meeting()]);
    let tasks = Tasks(vec![RawTask::new("r", "Report (2h)").due("2025-06-02")]);
    let pipeline = Pipeline::new(&config, &calendar, &tasks, &NoHabits);

    let first = pipeline.plan(date(), local(7, 0)).await.unwrap();
    let written = pipeline.write_back(&first.schedule).await.unwrap();
    assert_eq!(written.deleted, 0);
    assert!(written.created > 0);

    let second = pipeline.plan(date(), local(7, 0)).await.unwrap();
    assert_ne!(first.schedule.generation.run, second.schedule.generation.run);
    // Entries from the first run are not treated as fixed commitments
    assert_eq!(second.schedule.entries_of(EntryKind::Fixed).count(), 1);
    assert_eq!(first.schedule.entries, second.schedule.entries);

    let rewritten = pipeline.write_back(&second.schedule).await.unwrap();
    assert_eq!(rewritten.deleted, written.created);

    let stored = calendar.events().await;
    let owned = stored.iter().filter(|e| e.generated_by("dayweave")).count();
    assert_eq!(owned, rewritten.created);
    assert!(stored.iter().any(|e| e.title == "Meeting" && e.generation.is_none()));
}

#[tokio::test]
async fn failed_write_back_rolls_back_partial_inserts() {
    let config = PlannerConfig::default();
    let calendar = InMemoryCalendar::with_events(TZ, vec![meeting()]).fail_after(2);
    let tasks = Tasks(vec![RawTask::new("r", "Report (2h)").due("2025-06-02")]);
    let pipeline = Pipeline::new(&config, &calendar, &tasks, &NoHabits);

    let outcome = pipeline.plan(date(), local(7, 0)).await.unwrap();
    assert!(outcome.schedule.generated_entries().count() > 2);

    let err = pipeline.write_back(&outcome.schedule).await.unwrap_err();
    assert_eq!(err.code(), "write_back_failed");
    match err {
        CoreError::WriteBack(e) => {
            assert_eq!(e.inserted, 2);
            assert_eq!(e.rolled_back, 2);
        }
        other => panic!("unexpected error: {other}"),
    }

    let stored = calendar.events().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].title, "Meeting");
}

#[tokio::test]
async fn failing_task_source_is_treated_as_empty() {
    let config = PlannerConfig::default();
    let calendar = InMemoryCalendar::with_events(TZ, vec![meeting()]);

    let outcome = Pipeline::new(&config, &calendar, &BrokenTasks, &NoHabits)
        .plan(date(), local(7, 0))
        .await
        .unwrap();

    assert!(outcome.warnings.iter().any(|w| matches!(
        w,
        PlanWarning::SourceUnavailable { source, message } if source == "tasks" && message == "token expired"
    )));
    assert!(outcome.warnings.contains(&PlanWarning::EmptyDay));
    assert_eq!(outcome.schedule.entries_of(EntryKind::Fixed).count(), 1);
}

#[tokio::test]
async fn cancelled_run_stops_before_collecting() {
    let config = PlannerConfig::default();
    let calendar = InMemoryCalendar::new(TZ);
    let tasks = Tasks(Vec::new());
    let token = CancellationToken::new();
    token.cancel();

    let err = Pipeline::new(&config, &calendar, &tasks, &NoHabits)
        .with_cancellation(token)
        .plan(date(), local(7, 0))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "cancelled");
    assert!(matches!(err, CoreError::Cancelled { stage } if stage == "collecting"));
}

#[tokio::test]
async fn clear_removes_only_planned_entries() {
    let config = PlannerConfig::default();
    let calendar = InMemoryCalendar::with_events(TZ, vec![meeting()]);
    let tasks = Tasks(vec![RawTask::new("r", "Report (1h)")]);
    let pipeline = Pipeline::new(&config, &calendar, &tasks, &NoHabits);

    let outcome = pipeline.plan(date(), local(7, 0)).await.unwrap();
    let written = pipeline.write_back(&outcome.schedule).await.unwrap();

    let removed = pipeline.clear(date()).await.unwrap();
    assert_eq!(removed, written.created);
    assert_eq!(calendar.list_events(date()).await.unwrap().len(), 1);
}
