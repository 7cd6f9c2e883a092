//! Audit copy of each planned day, independent of calendar write-back.
//!
//! `<dir>/<date>.json` holds the entries; `<dir>/<date>.prompt.txt` the
//! prompt that was sent to the generator, when there was one.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::data_dir;
use crate::clock::format_clock;
use crate::error::{ConfigError, CoreError, Result};
use crate::phase::PhaseName;
use crate::schedule::{EntryKind, Schedule, ScheduleOrigin};

/// One entry as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    /// Local `HH:MM`
    pub start: String,
    /// Local `HH:MM`
    pub end: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub title: String,
    pub kind: EntryKind,
    #[serde(default)]
    pub phase: Option<PhaseName>,
    #[serde(default)]
    pub source_id: Option<String>,
}

/// The file's top-level document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDocument {
    pub date: NaiveDate,
    pub timezone: String,
    pub generation: String,
    pub origin: ScheduleOrigin,
    pub entries: Vec<ScheduleRecord>,
}

impl ScheduleDocument {
    pub fn from_schedule(schedule: &Schedule, tz: Tz) -> Self {
        Self {
            date: schedule.date,
            timezone: tz.name().to_string(),
            generation: schedule.generation.tag(),
            origin: schedule.origin,
            entries: schedule
                .entries
                .iter()
                .map(|e| ScheduleRecord {
                    start: format_clock(tz, e.start),
                    end: format_clock(tz, e.end),
                    start_time: e.start,
                    end_time: e.end,
                    title: e.title.clone(),
                    kind: e.kind,
                    phase: e.phase,
                    source_id: e.source_id.clone(),
                })
                .collect(),
        }
    }
}

/// Directory of schedule audit files.
pub struct ScheduleFile {
    dir: PathBuf,
}

impl ScheduleFile {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<data_dir>/schedules`
    pub fn in_data_dir() -> Result<Self, ConfigError> {
        Ok(Self::new(data_dir()?.join("schedules")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn schedule_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{date}.json"))
    }

    pub fn prompt_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{date}.prompt.txt"))
    }

    /// Write the schedule (and prompt) for its date, replacing any earlier
    /// file for that date.
    pub fn save(&self, schedule: &Schedule, tz: Tz, prompt: Option<&str>) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.schedule_path(schedule.date);
        let doc = ScheduleDocument::from_schedule(schedule, tz);
        std::fs::write(&path, serde_json::to_string_pretty(&doc)?)?;
        if let Some(prompt) = prompt {
            std::fs::write(self.prompt_path(schedule.date), prompt)?;
        }
        info!(path = %path.display(), entries = doc.entries.len(), "schedule saved");
        Ok(path)
    }

    pub fn load(&self, date: NaiveDate) -> Result<ScheduleDocument> {
        let path = self.schedule_path(date);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            CoreError::Custom(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}
