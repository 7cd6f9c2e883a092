//! Tasks as fetched from the task provider.
//!
//! Raw records carry free text. Effort is read from an annotation in the
//! title (`(2h)`, `(1.5u)`, `(45m)`) or in the notes (`[Effort: 2h]`), and
//! defaults to one hour. The annotation is removed from the title.

pub mod prioritizer;
pub mod tier;

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::clock::local_instant;
use crate::error::ValidationError;

pub use prioritizer::{Prioritization, SkipReason, SkippedTask, TaskPrioritizer, WorkUnit};
pub use tier::{PriorityTier, TierFallback, TierRule, TierTable};

/// Effort assumed when a task carries no annotation.
pub const DEFAULT_EFFORT_HOURS: f64 = 1.0;

/// Largest effort a single task may claim on the plan date.
pub const MAX_EFFORT_HOURS: f64 = 24.0;

/// A task record as the provider returns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
    /// RFC 3339 instant or `YYYY-MM-DD`
    #[serde(default)]
    pub due: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    /// Explicit effort, overriding any annotation
    #[serde(default)]
    pub effort_hours: Option<f64>,
}

impl RawTask {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn due(mut self, due: impl Into<String>) -> Self {
        self.due = Some(due.into());
        self
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// A task with effort and deadline decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub effort_hours: f64,
    pub deadline: Option<DateTime<Utc>>,
    pub parent_id: Option<String>,
    pub position: i64,
}

impl Task {
    /// Decode a raw record, resolving date-only deadlines in `tz`.
    pub fn from_raw(raw: &RawTask, tz: Tz) -> Result<Self, ValidationError> {
        if raw.id.trim().is_empty() {
            return Err(ValidationError::MissingField("id".into()));
        }

        let (title, annotated) = strip_effort(&raw.title);
        if title.is_empty() {
            return Err(ValidationError::MissingField("title".into()));
        }

        let effort_hours = match raw.effort_hours {
            Some(hours) if !hours.is_finite() || hours < 0.0 => {
                return Err(ValidationError::InvalidValue {
                    field: "effort_hours".into(),
                    message: format!("{hours} is not a non-negative number of hours"),
                })
            }
            Some(hours) => hours,
            None => annotated
                .or_else(|| raw.notes.as_deref().and_then(notes_effort))
                .unwrap_or(DEFAULT_EFFORT_HOURS),
        };
        if effort_hours > MAX_EFFORT_HOURS {
            return Err(ValidationError::InvalidValue {
                field: "effort_hours".into(),
                message: format!("{effort_hours} hours does not fit in one day"),
            });
        }

        let deadline = match raw.due.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(due) => Some(parse_deadline(due, tz).ok_or_else(|| ValidationError::InvalidTime {
                field: "due".into(),
                value: due.to_string(),
            })?),
            None => None,
        };

        Ok(Self {
            id: raw.id.clone(),
            title,
            effort_hours,
            deadline,
            parent_id: raw.parent.clone().filter(|p| !p.trim().is_empty()),
            position: raw
                .position
                .as_deref()
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(0),
        })
    }

    pub fn effort_minutes(&self) -> u32 {
        (self.effort_hours * 60.0).round() as u32
    }
}

static RE_TITLE_EFFORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\(\s*(\d+(?:\.\d+)?)\s*([hum])\s*\)").unwrap());

static RE_NOTES_EFFORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[\s*effort:\s*(\d+(?:\.\d+)?)\s*([hum])\s*\]").unwrap());

fn to_hours(amount: &str, unit: &str) -> Option<f64> {
    let value: f64 = amount.parse().ok()?;
    match unit.to_ascii_lowercase().as_str() {
        "m" => Some(value / 60.0),
        _ => Some(value),
    }
}

/// Remove an effort annotation from a title, returning the cleaned title and
/// the annotated hours.
pub fn strip_effort(title: &str) -> (String, Option<f64>) {
    let re = &*RE_TITLE_EFFORT;
    let hours = re
        .captures(title)
        .and_then(|c| to_hours(c.get(1)?.as_str(), c.get(2)?.as_str()));
    let cleaned = re.replace(title, " ");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    (cleaned, hours)
}

fn notes_effort(notes: &str) -> Option<f64> {
    let c = RE_NOTES_EFFORT.captures(notes)?;
    to_hours(c.get(1)?.as_str(), c.get(2)?.as_str())
}

/// RFC 3339 deadlines are taken as given; a bare date means the end of that
/// day in the planning timezone.
pub fn parse_deadline(value: &str, tz: Tz) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59)?;
    local_instant(tz, date, end_of_day).or_else(|| Some(date.and_time(end_of_day).and_utc()))
}

/// Leading `N.` in a subtask title, used to order a project's steps.
pub fn step_number(title: &str) -> Option<u32> {
    let trimmed = title.trim_start();
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || !trimmed[digits.len()..].starts_with('.') {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TZ: Tz = chrono_tz::Europe::Amsterdam;

    #[test]
    fn title_annotation_sets_effort_and_is_stripped() {
        let task = Task::from_raw(&RawTask::new("a", "Write paper (6h)"), TZ).unwrap();
        assert_eq!(task.title, "Write paper");
        assert_eq!(task.effort_hours, 6.0);

        let uur = Task::from_raw(&RawTask::new("b", "Lezen (1.5u) hoofdstuk 3"), TZ).unwrap();
        assert_eq!(uur.title, "Lezen hoofdstuk 3");
        assert_eq!(uur.effort_hours, 1.5);

        let minutes = Task::from_raw(&RawTask::new("c", "Inbox zero (45m)"), TZ).unwrap();
        assert_eq!(minutes.effort_minutes(), 45);
    }

    #[test]
    fn notes_annotation_is_second_choice() {
        let raw = RawTask::new("a", "Refactor parser").notes("scope: lexer\n[Effort: 3h]");
        assert_eq!(Task::from_raw(&raw, TZ).unwrap().effort_hours, 3.0);

        let plain = RawTask::new("b", "Call plumber");
        assert_eq!(Task::from_raw(&plain, TZ).unwrap().effort_hours, DEFAULT_EFFORT_HOURS);
    }

    #[test]
    fn negative_explicit_effort_is_invalid() {
        let mut raw = RawTask::new("a", "Broken");
        raw.effort_hours = Some(-1.0);
        assert!(matches!(
            Task::from_raw(&raw, TZ),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn effort_beyond_one_day_is_invalid() {
        let annotated = RawTask::new("a", "Rewrite everything (99999999h)");
        assert!(matches!(
            Task::from_raw(&annotated, TZ),
            Err(ValidationError::InvalidValue { field, .. }) if field == "effort_hours"
        ));

        let mut explicit = RawTask::new("b", "Marathon");
        explicit.effort_hours = Some(24.5);
        assert!(Task::from_raw(&explicit, TZ).is_err());

        let full_day = RawTask::new("c", "Hackathon (24h)");
        assert_eq!(Task::from_raw(&full_day, TZ).unwrap().effort_minutes(), 1440);
    }

    #[test]
    fn date_only_deadline_ends_that_local_day() {
        let deadline = parse_deadline("2025-06-02", TZ).unwrap();
        // 23:59:59 CEST is 21:59:59 UTC
        assert_eq!(deadline.to_rfc3339(), "2025-06-02T21:59:59+00:00");

        let exact = parse_deadline("2025-06-02T10:00:00Z", TZ).unwrap();
        assert_eq!(exact.to_rfc3339(), "2025-06-02T10:00:00+00:00");
        assert!(parse_deadline("next friday", TZ).is_none());
    }

    #[test]
    fn malformed_deadline_is_a_validation_error() {
        let raw = RawTask::new("a", "Taxes").due("soon");
        assert!(matches!(
            Task::from_raw(&raw, TZ),
            Err(ValidationError::InvalidTime { .. })
        ));
    }

    #[test]
    fn step_numbers() {
        assert_eq!(step_number("3. Draft outline"), Some(3));
        assert_eq!(step_number("  12.Review"), Some(12));
        assert_eq!(step_number("2025 plan"), None);
        assert_eq!(step_number("Outline"), None);
    }
}
