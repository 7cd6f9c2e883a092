use chrono::NaiveDate;
use clap::Args;
use dayweave_core::clock::{format_clock, start_of_day};
use dayweave_core::error::Result;
use dayweave_core::{PlanContext, PlannerConfig};

use super::target_date;

#[derive(Args)]
pub struct PhasesArgs {
    /// Day (YYYY-MM-DD), default today
    #[arg(long)]
    pub date: Option<NaiveDate>,
    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: PhasesArgs) -> Result<()> {
    let config = PlannerConfig::load()?;
    let date = target_date(&config, args.date)?;
    let tz = config.timezone()?;
    let ctx = PlanContext::build(&config, date, start_of_day(tz, date))?;

    if args.json {
        let phases: Vec<_> = ctx
            .phases
            .phases()
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "start": format_clock(tz, p.start),
                    "end": format_clock(tz, p.end),
                    "qualities": p.qualities,
                })
            })
            .collect();
        let anchors: Vec<_> = ctx
            .phases
            .anchors()
            .iter()
            .map(|a| {
                serde_json::json!({
                    "name": a.name,
                    "start": format_clock(tz, a.start),
                    "end": format_clock(tz, a.end),
                    "phase": a.phase,
                })
            })
            .collect();
        let json = serde_json::json!({ "date": date, "phases": phases, "anchors": anchors });
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    println!("Phases for {date} ({}):", tz.name());
    for phase in ctx.phases.phases() {
        println!(
            "  {:<6} {} - {}  {}",
            phase.name.as_str(),
            format_clock(tz, phase.start),
            format_clock(tz, phase.end),
            phase.qualities
        );
    }
    println!("Anchors:");
    for anchor in ctx.phases.anchors() {
        println!(
            "  {} - {}  {} ({})",
            format_clock(tz, anchor.start),
            format_clock(tz, anchor.end),
            anchor.name,
            anchor.phase.as_str()
        );
    }
    Ok(())
}
