//! Schedule Parser and Validator.
//!
//! The generator answers with structured records or with plain text. Text
//! may hold a JSON document (possibly buried in reasoning prose) or lines of
//! the form `HH:MM - HH:MM: title [kind]`. Every shape decodes into the same
//! raw candidates, which then go through one validation pass.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::clock::{local_instant, parse_clock};
use crate::error::{ParseFailure, ValidationError};
use crate::phase::PhaseName;
use crate::pipeline::PlanContext;
use crate::schedule::{EntryKind, ScheduleEntry};

static RE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:[-*•]\s*)?(\d{1,2}:\d{2}(?:\+\d)?)\s*[-–]\s*(\d{1,2}:\d{2}(?:\+\d)?)\s*:\s*(.+?)\s*\[\s*([A-Za-z_]+)\s*\]\s*$",
    )
    .unwrap()
});

static RE_DAY_OFFSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\s*([+-]\d)$").unwrap());

/// What came back from the generative service.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratorResponse {
    Structured(Value),
    Text(String),
}

/// Which decoder produced the candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    Records,
    Lines,
}

/// A candidate that failed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedEntry {
    /// Position among the decoded candidates
    pub position: usize,
    pub raw: String,
    pub reason: ValidationError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    /// Valid entries in input order
    pub entries: Vec<ScheduleEntry>,
    pub rejected: Vec<RejectedEntry>,
    pub shape: ResponseShape,
}

/// Decoded but unvalidated entry.
#[derive(Debug, Default)]
struct Candidate {
    start: Option<String>,
    end: Option<String>,
    title: Option<String>,
    kind: Option<String>,
    source_id: Option<String>,
    phase: Option<String>,
    /// Id fields that imply a kind when none is given
    implied_kind: Option<EntryKind>,
    raw: String,
}

fn text_field(record: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match record.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// The record list inside a JSON document, if it has one.
fn record_list(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => ["schedule_entries", "entries", "schedule"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            }),
        _ => None,
    }
}

/// The last JSON object in `text` that carries a record list.
fn embedded_records(text: &str) -> Option<Vec<Value>> {
    let starts: Vec<usize> = text.match_indices('{').map(|(i, _)| i).collect();
    starts.into_iter().rev().find_map(|i| {
        let mut stream = serde_json::Deserializer::from_str(&text[i..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value @ Value::Object(_))) => record_list(value),
            _ => None,
        }
    })
}

fn candidate_from_record(record: &Value) -> Candidate {
    let raw = record.to_string();
    let Value::Object(map) = record else {
        return Candidate {
            raw,
            ..Default::default()
        };
    };

    let implied_kind = if text_field(map, &["habit_id"]).is_some() {
        Some(EntryKind::Habit)
    } else if text_field(map, &["task_id"]).is_some() {
        Some(EntryKind::Task)
    } else {
        None
    };

    Candidate {
        start: text_field(map, &["start_time", "start"]),
        end: text_field(map, &["end_time", "end"]),
        title: text_field(map, &["title", "name", "task"]),
        kind: text_field(map, &["kind", "type"]),
        source_id: text_field(map, &["id", "source_id", "task_id", "habit_id"]),
        phase: text_field(map, &["phase"]),
        implied_kind,
        raw,
    }
}

fn candidates_from_lines(text: &str) -> Vec<Candidate> {
    text.lines()
        .filter_map(|line| match RE_LINE.captures(line) {
            Some(caps) => Some(Candidate {
                start: Some(caps[1].to_string()),
                end: Some(caps[2].to_string()),
                title: Some(caps[3].to_string()),
                kind: Some(caps[4].to_string()),
                raw: line.trim().to_string(),
                ..Default::default()
            }),
            None => {
                if !line.trim().is_empty() {
                    debug!(line = %line.trim(), "ignoring non-schedule line");
                }
                None
            }
        })
        .collect()
}

pub struct ScheduleParser<'a> {
    ctx: &'a PlanContext,
}

impl<'a> ScheduleParser<'a> {
    pub fn new(ctx: &'a PlanContext) -> Self {
        Self { ctx }
    }

    /// Decode and validate a generator response.
    ///
    /// # Errors
    /// [`ParseFailure`] when not a single entry survives validation.
    pub fn parse(&self, response: &GeneratorResponse) -> Result<ParseOutcome, ParseFailure> {
        let (candidates, shape) = self.decode(response)?;

        let mut entries = Vec::with_capacity(candidates.len());
        let mut rejected = Vec::new();
        for (position, candidate) in candidates.into_iter().enumerate() {
            match self.validate(&candidate) {
                Ok(entry) => entries.push(entry),
                Err(reason) => {
                    warn!(position, raw = %candidate.raw, reason = %reason, "rejected schedule entry");
                    rejected.push(RejectedEntry {
                        position,
                        raw: candidate.raw,
                        reason,
                    });
                }
            }
        }

        if entries.is_empty() {
            return Err(ParseFailure {
                rejected: rejected.len(),
                reason: match rejected.first() {
                    Some(first) => format!("every entry was invalid, first: {}", first.reason),
                    None => "response contained no schedule entries".into(),
                },
            });
        }

        info!(accepted = entries.len(), rejected = rejected.len(), ?shape, "generator response parsed");
        Ok(ParseOutcome {
            entries,
            rejected,
            shape,
        })
    }

    fn decode(
        &self,
        response: &GeneratorResponse,
    ) -> Result<(Vec<Candidate>, ResponseShape), ParseFailure> {
        let records = match response {
            GeneratorResponse::Structured(value) => {
                Some(record_list(value.clone()).ok_or_else(|| ParseFailure {
                    rejected: 0,
                    reason: "structured response has no schedule record list".into(),
                })?)
            }
            GeneratorResponse::Text(text) => serde_json::from_str::<Value>(text.trim())
                .ok()
                .and_then(record_list)
                .or_else(|| embedded_records(text)),
        };

        match (records, response) {
            (Some(records), _) => Ok((
                records.iter().map(candidate_from_record).collect(),
                ResponseShape::Records,
            )),
            (None, GeneratorResponse::Text(text)) => {
                Ok((candidates_from_lines(text), ResponseShape::Lines))
            }
            (None, GeneratorResponse::Structured(_)) => Err(ParseFailure {
                rejected: 0,
                reason: "structured response has no schedule record list".into(),
            }),
        }
    }

    fn validate(&self, candidate: &Candidate) -> Result<ScheduleEntry, ValidationError> {
        let title = candidate
            .title
            .clone()
            .ok_or_else(|| ValidationError::MissingField("title".into()))?;
        let start_raw = candidate
            .start
            .as_deref()
            .ok_or_else(|| ValidationError::MissingField("start_time".into()))?;
        let end_raw = candidate
            .end
            .as_deref()
            .ok_or_else(|| ValidationError::MissingField("end_time".into()))?;

        let start = self.parse_time("start_time", start_raw)?;
        let end = self.parse_time("end_time", end_raw)?;
        if start >= end {
            return Err(ValidationError::InvalidTimeRange {
                start: start_raw.to_string(),
                end: end_raw.to_string(),
            });
        }
        if start < self.ctx.window_start || end > self.ctx.window_end {
            return Err(ValidationError::OutsideWindow {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
                window_start: self.ctx.window_start.to_rfc3339(),
                window_end: self.ctx.window_end.to_rfc3339(),
            });
        }

        let kind = match (&candidate.kind, candidate.implied_kind) {
            (Some(kind), _) => kind.parse::<EntryKind>()?,
            (None, Some(kind)) => kind,
            (None, None) => return Err(ValidationError::MissingField("kind".into())),
        };

        let phase = candidate
            .phase
            .as_deref()
            .and_then(|p| p.parse::<PhaseName>().ok())
            .or_else(|| self.ctx.phases.phase_at(start).map(|p| p.name));

        Ok(ScheduleEntry {
            title,
            start,
            end,
            kind,
            source_id: candidate.source_id.clone(),
            phase,
        })
    }

    /// `H:MM`, `HH:MM[:SS]` (optionally `+1`/`-1` for the neighbouring day),
    /// RFC 3339, or a naive local date-time.
    fn parse_time(&self, field: &str, value: &str) -> Result<DateTime<Utc>, ValidationError> {
        let invalid = || ValidationError::InvalidTime {
            field: field.to_string(),
            value: value.to_string(),
        };
        let tz = self.ctx.timezone;
        let trimmed = value.trim();

        if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(instant.with_timezone(&Utc));
        }
        for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
                return tz
                    .from_local_datetime(&naive)
                    .earliest()
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or_else(invalid);
            }
        }

        let (clock, offset) = match RE_DAY_OFFSET.captures(trimmed) {
            Some(caps) => {
                let days: i64 = caps[2].parse().map_err(|_| invalid())?;
                (caps.get(1).map_or("", |m| m.as_str()), days)
            }
            None => (trimmed, 0),
        };
        let time = parse_clock(clock)
            .or_else(|| NaiveTime::parse_from_str(clock, "%H:%M:%S").ok())
            .ok_or_else(invalid)?;
        local_instant(tz, self.ctx.date + Duration::days(offset), time).ok_or_else(invalid)
    }
}
