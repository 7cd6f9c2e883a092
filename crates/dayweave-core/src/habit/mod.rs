//! Habits from a tabular store and the Habit Selector.
//!
//! The habit source is a spreadsheet-like table: a header row naming the
//! columns followed by data rows. Cells are strings; short rows are padded.

use std::fmt;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::phase::PhaseName;

/// Longest habit session accepted, one full day.
const MAX_HABIT_MINUTES: f64 = 24.0 * 60.0;

/// One habit row, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawHabit {
    pub id: String,
    pub title: String,
    #[serde(alias = "duration_minutes", alias = "duration")]
    pub duration_min: String,
    pub frequency: String,
    /// Weekday name(s) for weekly habits, e.g. `Monday` or `Mon, Thu`
    #[serde(alias = "days")]
    pub due_day: String,
    #[serde(alias = "phase")]
    pub ideal_phase: String,
    pub active: String,
}

impl RawHabit {
    /// Decode a header row plus data rows into records.
    pub fn from_rows(header: &[String], rows: &[Vec<String>]) -> Vec<RawHabit> {
        let columns: Vec<String> = header
            .iter()
            .map(|h| h.trim().to_lowercase().replace(' ', "_"))
            .collect();

        rows.iter()
            .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
            .filter_map(|row| {
                let record: serde_json::Map<String, serde_json::Value> = columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| {
                        let cell = row.get(i).map(|c| c.trim().to_string()).unwrap_or_default();
                        (col.clone(), serde_json::Value::String(cell))
                    })
                    .collect();
                match serde_json::from_value(serde_json::Value::Object(record)) {
                    Ok(habit) => Some(habit),
                    Err(err) => {
                        warn!(error = %err, "unreadable habit row");
                        None
                    }
                }
            })
            .collect()
    }
}

/// How often a habit recurs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "days", rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly(Vec<Weekday>),
    /// Anything else; such habits never match a date
    Unrecognized(String),
}

impl Frequency {
    pub fn parse(frequency: &str, due_day: &str) -> Frequency {
        match frequency.trim().to_lowercase().as_str() {
            "" | "daily" => Frequency::Daily,
            "weekly" => {
                let days: Option<Vec<Weekday>> = due_day
                    .split(|c: char| c == ',' || c == '/' || c == ';' || c.is_whitespace())
                    .filter(|d| !d.is_empty())
                    .map(|d| d.parse::<Weekday>().ok())
                    .collect();
                match days {
                    Some(days) if !days.is_empty() => Frequency::Weekly(days),
                    _ => Frequency::Unrecognized(format!("weekly on '{due_day}'")),
                }
            }
            other => Frequency::Unrecognized(other.to_string()),
        }
    }

    pub fn matches(&self, date: NaiveDate) -> bool {
        match self {
            Frequency::Daily => true,
            Frequency::Weekly(days) => days.contains(&date.weekday()),
            Frequency::Unrecognized(_) => false,
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Daily => f.write_str("daily"),
            Frequency::Weekly(days) => {
                let names: Vec<String> = days.iter().map(|d| d.to_string()).collect();
                write!(f, "weekly ({})", names.join(", "))
            }
            Frequency::Unrecognized(raw) => write!(f, "unrecognized ({raw})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Habit {
    pub id: String,
    pub title: String,
    pub duration_minutes: u32,
    pub frequency: Frequency,
    pub ideal_phase: Option<PhaseName>,
    pub active: bool,
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "yes" | "y" | "true" | "t" | "1" | "active"
    )
}

impl Habit {
    pub fn from_raw(raw: &RawHabit) -> Result<Self, ValidationError> {
        let title = raw.title.trim();
        if title.is_empty() {
            return Err(ValidationError::MissingField("title".into()));
        }

        // Spreadsheets often hand back "15.0"
        let minutes = raw
            .duration_min
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|m| (0.5..=MAX_HABIT_MINUTES).contains(m))
            .ok_or_else(|| ValidationError::InvalidValue {
                field: "duration_min".into(),
                message: format!(
                    "'{}' is not a number of minutes between 0.5 and {MAX_HABIT_MINUTES}",
                    raw.duration_min
                ),
            })?;

        let id = if raw.id.trim().is_empty() {
            title.to_lowercase().replace(' ', "-")
        } else {
            raw.id.trim().to_string()
        };

        Ok(Self {
            id,
            title: title.to_string(),
            duration_minutes: minutes.round() as u32,
            frequency: Frequency::parse(&raw.frequency, &raw.due_day),
            ideal_phase: raw.ideal_phase.parse().ok(),
            active: is_truthy(&raw.active),
        })
    }

    pub fn is_due(&self, date: NaiveDate) -> bool {
        self.active && self.frequency.matches(date)
    }
}

/// Active habits whose frequency matches `date`, in input order.
pub fn select_habits(raw: &[RawHabit], date: NaiveDate) -> Vec<Habit> {
    raw.iter()
        .filter_map(|record| match Habit::from_raw(record) {
            Ok(habit) => Some(habit),
            Err(err) => {
                warn!(title = %record.title, reason = %err, "skipping invalid habit");
                None
            }
        })
        .filter(|habit| {
            if let Frequency::Unrecognized(value) = &habit.frequency {
                if habit.active {
                    warn!(title = %habit.title, frequency = %value, "unrecognized frequency, habit excluded");
                }
            }
            let due = habit.is_due(date);
            if !due {
                debug!(title = %habit.title, frequency = %habit.frequency, "habit not due");
            }
            due
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn sheet() -> Vec<RawHabit> {
        let header = cells(&["id", "title", "duration_min", "frequency", "due_day", "ideal_phase", "active"]);
        let rows = vec![
            cells(&["h1", "Meditate", "15", "Daily", "", "WOOD", "Yes"]),
            cells(&["h2", "Long run", "60.0", "Weekly", "Monday", "Fire", "TRUE"]),
            cells(&["h3", "Review week", "30", "Weekly", "Fri, Sat", "Metal", "yes"]),
            cells(&["h4", "Retired", "20", "Daily", "", "Water", "No"]),
            cells(&["h5", "Budget", "30", "Monthly", "", "Metal", "Yes"]),
            cells(&["h6", "Stretch", "10"]),
            cells(&["", "", ""]),
        ];
        RawHabit::from_rows(&header, &rows)
    }

    #[test]
    fn rows_map_onto_columns() {
        let habits = sheet();
        assert_eq!(habits.len(), 6);
        assert_eq!(habits[1].duration_min, "60.0");
        // Padded row: missing cells are empty
        assert_eq!(habits[5].frequency, "");
        assert_eq!(habits[5].active, "");
    }

    #[test]
    fn monday_selection() {
        // 2025-06-02 is a Monday
        let monday = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let titles: Vec<_> = select_habits(&sheet(), monday)
            .into_iter()
            .map(|h| h.title)
            .collect();
        assert_eq!(titles, ["Meditate", "Long run"]);
    }

    #[test]
    fn weekly_day_sets() {
        let friday = NaiveDate::from_ymd_opt(2025, 6, 6).unwrap();
        let selected = select_habits(&sheet(), friday);
        assert!(selected.iter().any(|h| h.title == "Review week"));
        assert!(!selected.iter().any(|h| h.title == "Long run"));
        assert_eq!(
            Frequency::parse("weekly", "Fri, Sat"),
            Frequency::Weekly(vec![Weekday::Fri, Weekday::Sat])
        );
    }

    #[test]
    fn malformed_frequency_is_excluded_not_fatal() {
        assert!(matches!(Frequency::parse("Monthly", ""), Frequency::Unrecognized(_)));
        assert!(matches!(Frequency::parse("Weekly", "someday"), Frequency::Unrecognized(_)));
        let any_day = NaiveDate::from_ymd_opt(2025, 6, 3).unwrap();
        assert!(!select_habits(&sheet(), any_day).iter().any(|h| h.title == "Budget"));
    }

    #[test]
    fn duration_must_be_positive() {
        let raw = RawHabit {
            title: "Nap".into(),
            duration_min: "0".into(),
            ..Default::default()
        };
        assert!(Habit::from_raw(&raw).is_err());

        let ok = RawHabit {
            title: "Walk the dog".into(),
            duration_min: "25".into(),
            ideal_phase: "earth".into(),
            active: "1".into(),
            ..Default::default()
        };
        let habit = Habit::from_raw(&ok).unwrap();
        assert_eq!(habit.id, "walk-the-dog");
        assert_eq!(habit.ideal_phase, Some(PhaseName::Earth));
        assert_eq!(habit.frequency, Frequency::Daily);
    }

    #[test]
    fn oversized_duration_is_excluded() {
        let header = cells(&["Title", "Duration_min", "Frequency", "Active"]);
        let rows = vec![
            cells(&["Forever", "1e10", "daily", "yes"]),
            cells(&["Sleep in", "1441", "daily", "yes"]),
            cells(&["Stretch", "15", "daily", "yes"]),
        ];
        let raw = RawHabit::from_rows(&header, &rows);
        assert!(matches!(
            Habit::from_raw(&raw[0]),
            Err(ValidationError::InvalidValue { field, .. }) if field == "duration_min"
        ));

        let monday = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let selected = select_habits(&raw, monday);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].title, "Stretch");
    }
}
