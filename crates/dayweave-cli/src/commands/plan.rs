use std::path::PathBuf;

use chrono::{NaiveDate, Utc};
use clap::Args;
use dayweave_core::error::Result;
use dayweave_core::storage::{data_dir, ScheduleDocument};
use dayweave_core::{
    ChatGenerator, JsonCalendarFile, JsonHabitFile, JsonTaskFile, Pipeline, PlanOutcome,
    PlanWarning, PlannerConfig, ScheduleFile,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::target_date;

#[derive(Args)]
pub struct InputArgs {
    /// Day to plan (YYYY-MM-DD), default today
    #[arg(long)]
    pub date: Option<NaiveDate>,
    /// Directory holding tasks.json, habits.json and calendar.json
    #[arg(long)]
    pub inputs: Option<PathBuf>,
}

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Write planned entries back to the calendar
    #[arg(long)]
    pub write: bool,
    /// Skip the generator and place everything locally
    #[arg(long)]
    pub offline: bool,
    /// Print the schedule as JSON
    #[arg(long)]
    pub json: bool,
    /// Directory for the saved schedule (default: <data dir>/schedules)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

/// File-backed collaborators in one directory.
struct Inputs {
    calendar: JsonCalendarFile,
    tasks: JsonTaskFile,
    habits: JsonHabitFile,
}

impl Inputs {
    fn open(config: &PlannerConfig, dir: Option<PathBuf>) -> Result<Self> {
        let dir = match dir {
            Some(dir) => dir,
            None => data_dir()?.join("inputs"),
        };
        Ok(Self {
            calendar: JsonCalendarFile::new(dir.join("calendar.json"), config.timezone()?),
            tasks: JsonTaskFile::new(dir.join("tasks.json")),
            habits: JsonHabitFile::new(dir.join("habits.json")),
        })
    }

    fn pipeline<'a>(&'a self, config: &'a PlannerConfig) -> Pipeline<'a> {
        Pipeline::new(config, &self.calendar, &self.tasks, &self.habits)
    }
}

/// Token cancelled on Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    token
}

pub async fn run(args: PlanArgs) -> Result<()> {
    let config = PlannerConfig::load()?;
    let date = target_date(&config, args.input.date)?;
    let inputs = Inputs::open(&config, args.input.inputs)?;

    let generator = if args.offline || !config.generator.enabled {
        None
    } else {
        match ChatGenerator::from_config(&config.generator) {
            Ok(generator) => Some(generator),
            Err(e) => {
                warn!(error = %e, "schedule generator not available");
                None
            }
        }
    };

    let mut pipeline = inputs.pipeline(&config).with_cancellation(interrupt_token());
    if let Some(generator) = &generator {
        pipeline = pipeline.with_generator(generator);
    }

    let outcome = pipeline.plan(date, Utc::now()).await?;
    let files = match args.out {
        Some(dir) => ScheduleFile::new(dir),
        None => ScheduleFile::in_data_dir()?,
    };
    let path = files.save(&outcome.schedule, outcome.context.timezone, Some(&outcome.prompt))?;

    let report = if args.write {
        Some(pipeline.write_back(&outcome.schedule).await?)
    } else {
        None
    };

    if args.json {
        let doc = ScheduleDocument::from_schedule(&outcome.schedule, outcome.context.timezone);
        let json = serde_json::json!({
            "schedule": doc,
            "stage": outcome.stage,
            "warnings": outcome.warnings,
            "write_back": report,
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    print_schedule(&outcome);
    for warning in &outcome.warnings {
        eprintln!("warning: {}", describe(warning));
    }
    println!("saved: {}", path.display());
    if let Some(report) = report {
        println!(
            "calendar: {} earlier entries removed, {} created",
            report.deleted, report.created
        );
    }
    Ok(())
}

pub async fn prompt(args: InputArgs) -> Result<()> {
    let config = PlannerConfig::load()?;
    let date = target_date(&config, args.date)?;
    let inputs = Inputs::open(&config, args.inputs)?;
    let outcome = inputs.pipeline(&config).plan(date, Utc::now()).await?;
    println!("{}", outcome.prompt);
    Ok(())
}

pub async fn clear(args: InputArgs) -> Result<()> {
    let config = PlannerConfig::load()?;
    let date = target_date(&config, args.date)?;
    let inputs = Inputs::open(&config, args.inputs)?;
    let removed = inputs.pipeline(&config).clear(date).await?;
    println!("removed {removed} planned entries for {date}");
    Ok(())
}

fn print_schedule(outcome: &PlanOutcome) {
    let doc = ScheduleDocument::from_schedule(&outcome.schedule, outcome.context.timezone);
    println!("{} ({}, {})", doc.date, doc.timezone, outcome.stage);
    for entry in &doc.entries {
        let phase = entry.phase.map(|p| p.as_str()).unwrap_or("-");
        println!(
            "  {} - {}  {:<6} {:<6} {}",
            entry.start, entry.end, entry.kind, phase, entry.title
        );
    }
}

fn describe(warning: &PlanWarning) -> String {
    match warning {
        PlanWarning::SourceUnavailable { source, message } => {
            format!("{source} unavailable, treated as empty: {message}")
        }
        PlanWarning::InvalidEvent { title } => format!("ignored calendar event '{title}'"),
        PlanWarning::AnchorSkipped { name } => format!("anchor '{name}' blocked by a calendar event"),
        PlanWarning::TaskSkipped { title, reason, .. } => format!("task '{title}' skipped: {reason}"),
        PlanWarning::FallbackUsed { reason, .. } => format!("local placement used: {reason}"),
        PlanWarning::EntryRejected { raw, reason } => format!("rejected '{raw}': {reason}"),
        PlanWarning::EntryDropped { title, reason } => format!(
            "dropped '{title}': {}",
            serde_json::to_string(reason).unwrap_or_default()
        ),
        PlanWarning::Unplaced { title, kind, .. } => format!("no room for {kind} '{title}'"),
        PlanWarning::Conflict { warning } => warning.to_string(),
        PlanWarning::EmptyDay => "nothing but fixed events and anchors today".into(),
    }
}
