mod config;
pub mod schedule_file;

pub use config::{
    GeneratorConfig, PhaseSourceKind, PhasesConfig, PlannerConfig, PlannerSection, ResolverConfig,
};
pub use schedule_file::{ScheduleDocument, ScheduleFile, ScheduleRecord};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Where config, saved plans and default input files live.
///
/// Planning data sits under `~/.config/dayweave`. With `DAYWEAVE_ENV=dev`
/// a separate `dayweave-dev` tree is used instead, so trial runs never
/// touch real plans. The directory is created on first use.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let name = match std::env::var("DAYWEAVE_ENV").as_deref() {
        Ok("dev") => "dayweave-dev",
        _ => "dayweave",
    };
    let dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join(name);

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
