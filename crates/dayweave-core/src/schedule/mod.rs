//! Schedule types: fixed calendar events, schedule entries and the
//! generation id that tags one planning run's output.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::phase::PhaseName;

/// Half-open interval overlap: `[s1, e1)` and `[s2, e2)` conflict iff
/// `s1 < e2 && s2 < e1`.
pub fn overlaps(
    s1: DateTime<Utc>,
    e1: DateTime<Utc>,
    s2: DateTime<Utc>,
    e2: DateTime<Utc>,
) -> bool {
    s1 < e2 && s2 < e1
}

/// A calendar commitment. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedEvent {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Generation tag carried in the event's metadata, when a planning
    /// run created it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
}

impl FixedEvent {
    pub fn new(title: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            id: None,
            title: title.into(),
            start,
            end,
            generation: None,
        }
    }

    /// Whether a planning run by `generator` produced this event.
    pub fn generated_by(&self, generator: &str) -> bool {
        self.generation
            .as_deref()
            .and_then(|tag| GenerationId::parse_tag(tag))
            .is_some_and(|(g, _)| g == generator)
    }

    pub fn to_entry(&self) -> ScheduleEntry {
        ScheduleEntry {
            title: self.title.clone(),
            start: self.start,
            end: self.end,
            kind: EntryKind::Fixed,
            source_id: self.id.clone(),
            phase: None,
        }
    }
}

/// What an entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Fixed,
    Anchor,
    Task,
    Habit,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Fixed => "fixed",
            EntryKind::Anchor => "anchor",
            EntryKind::Task => "task",
            EntryKind::Habit => "habit",
        }
    }

    /// Fixed events and anchors are never moved or removed.
    pub fn is_immovable(&self) -> bool {
        matches!(self, EntryKind::Fixed | EntryKind::Anchor)
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Ok(EntryKind::Fixed),
            "anchor" => Ok(EntryKind::Anchor),
            "task" => Ok(EntryKind::Task),
            "habit" => Ok(EntryKind::Habit),
            _ => Err(ValidationError::UnknownKind(s.to_string())),
        }
    }
}

/// One block of the day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub kind: EntryKind,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub phase: Option<PhaseName>,
}

impl ScheduleEntry {
    pub fn new(
        title: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        kind: EntryKind,
    ) -> Self {
        Self {
            title: title.into(),
            start,
            end,
            kind,
            source_id: None,
            phase: None,
        }
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &ScheduleEntry) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    pub fn overlaps_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        overlaps(self.start, self.end, start, end)
    }
}

/// Identifies the entries one planning run created, so the next run for
/// the same generator and date can delete exactly those.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerationId {
    pub generator: String,
    pub date: NaiveDate,
    pub run: Uuid,
}

impl GenerationId {
    pub fn new(generator: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            generator: generator.into(),
            date,
            run: Uuid::new_v4(),
        }
    }

    /// Metadata value stored on created calendar events:
    /// `<generator>/<date>/<run>`.
    pub fn tag(&self) -> String {
        format!("{}/{}/{}", self.generator, self.date, self.run)
    }

    /// Split a tag into generator and date. The run component is ignored;
    /// deletion always targets the whole generator and date scope.
    pub fn parse_tag(tag: &str) -> Option<(&str, NaiveDate)> {
        let mut parts = tag.splitn(3, '/');
        let generator = parts.next().filter(|g| !g.is_empty())?;
        let date = parts.next()?.parse().ok()?;
        Some((generator, date))
    }

    /// Whether `tag` belongs to this generator and date.
    pub fn covers(&self, tag: &str) -> bool {
        Self::parse_tag(tag).is_some_and(|(g, d)| g == self.generator && d == self.date)
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// How a schedule was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleOrigin {
    Generated,
    Fallback,
}

/// One day's ordered entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub date: NaiveDate,
    pub generation: GenerationId,
    pub origin: ScheduleOrigin,
    pub entries: Vec<ScheduleEntry>,
}

impl Schedule {
    /// Entries this run owns (everything except fixed calendar events).
    pub fn generated_entries(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries.iter().filter(|e| e.kind != EntryKind::Fixed)
    }

    pub fn entries_of(&self, kind: EntryKind) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }

    /// Scheduled minutes for one source id.
    pub fn minutes_for(&self, source_id: &str) -> i64 {
        self.entries
            .iter()
            .filter(|e| e.source_id.as_deref() == Some(source_id))
            .map(ScheduleEntry::duration_minutes)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, hour, min, 0).unwrap()
    }

    #[test]
    fn overlap_is_half_open() {
        assert!(overlaps(at(9, 0), at(10, 0), at(9, 30), at(10, 30)));
        assert!(!overlaps(at(9, 0), at(10, 0), at(10, 0), at(11, 0)));
        assert!(overlaps(at(9, 0), at(12, 0), at(10, 0), at(11, 0)));
    }

    #[test]
    fn kinds_parse_case_insensitively() {
        assert_eq!("TASK".parse::<EntryKind>().unwrap(), EntryKind::Task);
        assert_eq!(
            "meeting".parse::<EntryKind>(),
            Err(ValidationError::UnknownKind("meeting".into()))
        );
        assert!(EntryKind::Anchor.is_immovable());
        assert!(!EntryKind::Habit.is_immovable());
    }

    #[test]
    fn generation_tag_scopes_generator_and_date() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let first = GenerationId::new("dayweave", date);
        let second = GenerationId::new("dayweave", date);
        assert_ne!(first.run, second.run);
        assert!(second.covers(&first.tag()));

        let other_day = GenerationId::new("dayweave", date + Duration::days(1));
        assert!(!other_day.covers(&first.tag()));
        assert!(!GenerationId::new("other", date).covers(&first.tag()));
    }

    #[test]
    fn generated_events_are_recognised() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let mut event = FixedEvent::new("Deep work", at(9, 0), at(10, 0));
        assert!(!event.generated_by("dayweave"));
        event.generation = Some(GenerationId::new("dayweave", date).tag());
        assert!(event.generated_by("dayweave"));
        assert!(!event.generated_by("someone-else"));
    }
}
