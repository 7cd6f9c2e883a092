//! Providers backed by JSON files in an inputs directory.
//!
//! - `tasks.json`: array of task records
//! - `habits.json`: either `{ "header": [...], "rows": [[...]] }` as exported
//!   from a sheet, or an array of objects keyed by column name
//! - `calendar.json`: array of events; planned entries are appended here

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::traits::{CalendarProvider, HabitSource, ProviderError, TaskProvider, WriteFailure};
use crate::clock::start_of_day;
use crate::habit::RawHabit;
use crate::schedule::{FixedEvent, GenerationId, ScheduleEntry};
use crate::task::RawTask;

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ProviderError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ProviderError::new(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| ProviderError::new(format!("{}: {e}", path.display())))
}

pub struct JsonTaskFile {
    path: PathBuf,
}

impl JsonTaskFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TaskProvider for JsonTaskFile {
    async fn list_open_tasks(&self) -> Result<Vec<RawTask>, ProviderError> {
        let tasks: Vec<RawTask> = read_json(&self.path).await?;
        debug!(path = %self.path.display(), count = tasks.len(), "tasks loaded");
        Ok(tasks)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HabitSheet {
    Table {
        header: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Records(Vec<Map<String, Value>>),
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub struct JsonHabitFile {
    path: PathBuf,
}

impl JsonHabitFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl HabitSource for JsonHabitFile {
    async fn list_habits(&self) -> Result<Vec<RawHabit>, ProviderError> {
        let sheet: HabitSheet = read_json(&self.path).await?;
        let habits = match sheet {
            HabitSheet::Table { header, rows } => RawHabit::from_rows(&header, &rows),
            HabitSheet::Records(records) => {
                // Same column normalisation as a sheet export
                let header: Vec<String> = records
                    .iter()
                    .flat_map(|r| r.keys().cloned())
                    .fold(Vec::new(), |mut acc, key| {
                        if !acc.contains(&key) {
                            acc.push(key);
                        }
                        acc
                    });
                let rows: Vec<Vec<String>> = records
                    .iter()
                    .map(|r| {
                        header
                            .iter()
                            .map(|k| r.get(k).map(cell_text).unwrap_or_default())
                            .collect()
                    })
                    .collect();
                RawHabit::from_rows(&header, &rows)
            }
        };
        debug!(path = %self.path.display(), count = habits.len(), "habits loaded");
        Ok(habits)
    }
}

/// Calendar stored as a JSON array of events.
pub struct JsonCalendarFile {
    path: PathBuf,
    tz: Tz,
    lock: Mutex<()>,
}

impl JsonCalendarFile {
    pub fn new(path: impl Into<PathBuf>, tz: Tz) -> Self {
        Self {
            path: path.into(),
            tz,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<FixedEvent>, ProviderError> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        read_json(&self.path).await
    }

    async fn store(&self, events: &[FixedEvent]) -> Result<(), ProviderError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(events)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl CalendarProvider for JsonCalendarFile {
    async fn list_events(&self, date: NaiveDate) -> Result<Vec<FixedEvent>, ProviderError> {
        let _guard = self.lock.lock().await;
        let day_start = start_of_day(self.tz, date);
        let day_end = start_of_day(self.tz, date + Duration::days(1));
        let mut events: Vec<FixedEvent> = self
            .load()
            .await?
            .into_iter()
            .filter(|e| e.start < day_end && day_start < e.end)
            .collect();
        events.sort_by_key(|e| e.start);
        Ok(events)
    }

    async fn create_events(
        &self,
        entries: &[ScheduleEntry],
        generation: &GenerationId,
    ) -> Result<Vec<String>, WriteFailure> {
        let _guard = self.lock.lock().await;
        let fail = |created: Vec<String>, err: ProviderError| WriteFailure {
            created,
            message: err.to_string(),
        };

        let mut events = self.load().await.map_err(|e| fail(Vec::new(), e))?;
        let created: Vec<String> = entries
            .iter()
            .map(|entry| {
                let id = Uuid::new_v4().to_string();
                events.push(FixedEvent {
                    id: Some(id.clone()),
                    title: entry.title.clone(),
                    start: entry.start,
                    end: entry.end,
                    generation: Some(generation.tag()),
                });
                id
            })
            .collect();
        // One write for the whole batch: either all land or none do
        self.store(&events).await.map_err(|e| fail(Vec::new(), e))?;
        Ok(created)
    }

    async fn delete_events(&self, generation: &GenerationId) -> Result<usize, ProviderError> {
        let _guard = self.lock.lock().await;
        let mut events = self.load().await?;
        let before = events.len();
        events.retain(|e| !e.generation.as_deref().is_some_and(|tag| generation.covers(tag)));
        let removed = before - events.len();
        if removed > 0 {
            self.store(&events).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::EntryKind;
    use chrono::{TimeZone, Utc};

    const TZ: Tz = chrono_tz::Europe::Amsterdam;

    #[tokio::test]
    async fn habit_sheet_and_records_both_load() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("table.json");
        std::fs::write(
            &table,
            r#"{"header": ["Title", "Duration Min", "Frequency", "Active"],
                "rows": [["Stretch", "15", "Daily", "Yes"], ["", "", "", ""]]}"#,
        )
        .unwrap();
        let records = dir.path().join("records.json");
        std::fs::write(
            &records,
            r#"[{"title": "Read", "duration": 20, "frequency": "weekly", "days": "Mon", "active": true}]"#,
        )
        .unwrap();

        let from_table = JsonHabitFile::new(&table).list_habits().await.unwrap();
        assert_eq!(from_table.len(), 1);
        assert_eq!(from_table[0].duration_min, "15");

        let from_records = JsonHabitFile::new(&records).list_habits().await.unwrap();
        assert_eq!(from_records[0].duration_min, "20");
        assert_eq!(from_records[0].due_day, "Mon");
        assert_eq!(from_records[0].active, "true");
    }

    #[tokio::test]
    async fn missing_task_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = JsonTaskFile::new(dir.path().join("tasks.json"));
        assert!(tasks.list_open_tasks().await.is_err());
    }

    #[tokio::test]
    async fn calendar_file_create_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let calendar = JsonCalendarFile::new(dir.path().join("calendar.json"), TZ);
        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        assert!(calendar.list_events(date).await.unwrap().is_empty());

        let start = Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap();
        let entry = ScheduleEntry::new("Write", start, start + Duration::hours(1), EntryKind::Task);
        let generation = GenerationId::new("dayweave", date);
        let ids = calendar.create_events(&[entry], &generation).await.unwrap();
        assert_eq!(ids.len(), 1);

        let listed = calendar.list_events(date).await.unwrap();
        assert!(listed[0].generated_by("dayweave"));

        let rerun = GenerationId::new("dayweave", date);
        assert_eq!(calendar.delete_events(&rerun).await.unwrap(), 1);
        assert!(calendar.list_events(date).await.unwrap().is_empty());
    }
}
