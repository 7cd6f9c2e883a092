//! Day-phase energy model.
//!
//! The day is divided into five elemental phases, each with a quality and a
//! set of ideal activities. Phases come either from a static clock table in
//! the configuration or from the solar day (see [`solar`]). Short ritual
//! anchors are pinned inside phases and are as immovable as calendar events.

pub mod solar;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::clock::{local_instant, minutes_of_day, parse_clock};
use crate::error::CompileError;
use solar::RomanHours;

/// The elemental phases of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseName {
    Wood,
    Fire,
    Earth,
    Metal,
    Water,
}

impl PhaseName {
    pub const ALL: [PhaseName; 5] = [
        PhaseName::Wood,
        PhaseName::Fire,
        PhaseName::Earth,
        PhaseName::Metal,
        PhaseName::Water,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseName::Wood => "Wood",
            PhaseName::Fire => "Fire",
            PhaseName::Earth => "Earth",
            PhaseName::Metal => "Metal",
            PhaseName::Water => "Water",
        }
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseName {
    type Err = String;

    /// Case-insensitive; labels such as "Fire Phase" or "WOOD" are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let word = lowered
            .split_whitespace()
            .find(|w| PhaseName::ALL.iter().any(|p| p.as_str().eq_ignore_ascii_case(w)))
            .ok_or_else(|| format!("unknown phase '{s}'"))?;
        PhaseName::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(word))
            .ok_or_else(|| format!("unknown phase '{s}'"))
    }
}

/// A phase as configured: local clock boundaries plus energy metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDefinition {
    pub name: PhaseName,
    pub start: String, // HH:mm
    pub end: String,   // HH:mm
    #[serde(default)]
    pub qualities: String,
    #[serde(default)]
    pub ideal_tasks: Vec<String>,
}

impl PhaseDefinition {
    pub fn new(name: PhaseName, start: &str, end: &str, qualities: &str, ideal: &[&str]) -> Self {
        Self {
            name,
            start: start.to_string(),
            end: end.to_string(),
            qualities: qualities.to_string(),
            ideal_tasks: ideal.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// The five elemental phases tiling the whole day.
    pub fn default_table() -> Vec<PhaseDefinition> {
        vec![
            PhaseDefinition::new(
                PhaseName::Wood,
                "05:30",
                "09:00",
                "Growth, planning, vitality. Spiritual centering and movement.",
                &["spiritual", "planning", "movement"],
            ),
            PhaseDefinition::new(
                PhaseName::Fire,
                "09:00",
                "13:00",
                "Peak energy, expression. Deep work and execution.",
                &["deep_work", "creative", "pomodoro"],
            ),
            PhaseDefinition::new(
                PhaseName::Earth,
                "13:00",
                "15:00",
                "Stability, nourishment. Lunch and restoration.",
                &["rest", "integration", "light_tasks"],
            ),
            PhaseDefinition::new(
                PhaseName::Metal,
                "15:00",
                "18:00",
                "Precision, organization. Admin and review.",
                &["admin", "planning", "study"],
            ),
            PhaseDefinition::new(
                PhaseName::Water,
                "18:00",
                "05:30",
                "Rest, consolidation. Wind-down and recovery.",
                &["rest", "reflection", "recovery"],
            ),
        ]
    }
}

/// A ritual anchor as configured.
///
/// Exactly one of `start` (local clock) or `roman_hour` (solar hour index,
/// 0-11 day, 12-23 night) places the anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorDefinition {
    pub name: String,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub roman_hour: Option<u8>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub phase: Option<PhaseName>,
}

impl AnchorDefinition {
    pub fn at(name: &str, start: &str, duration_minutes: u32) -> Self {
        Self {
            name: name.to_string(),
            start: Some(start.to_string()),
            roman_hour: None,
            duration_minutes,
            phase: None,
        }
    }

    pub fn default_anchors() -> Vec<AnchorDefinition> {
        vec![
            AnchorDefinition::at("Morning reflection", "05:30", 20),
            AnchorDefinition::at("Midday pause", "13:00", 15),
            AnchorDefinition::at("Evening review", "21:00", 15),
        ]
    }
}

/// Where phase boundaries come from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhaseSource {
    /// Clock times from the definitions table
    Static,
    /// Twelve equal day hours and twelve equal night hours at a location
    Solar { latitude: f64, longitude: f64 },
}

/// A phase pinned to concrete instants for one planning date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPhase {
    pub name: PhaseName,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub qualities: String,
    pub ideal_tasks: Vec<String>,
}

impl ResolvedPhase {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// An anchor pinned to concrete instants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAnchor {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub phase: PhaseName,
}

/// Phases and anchors for one date, ordered by start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTable {
    phases: Vec<ResolvedPhase>,
    anchors: Vec<ResolvedAnchor>,
}

impl PhaseTable {
    /// Resolve phases and anchors for `date` in `tz`.
    pub fn resolve(
        source: PhaseSource,
        definitions: &[PhaseDefinition],
        anchors: &[AnchorDefinition],
        date: NaiveDate,
        tz: Tz,
        allow_gaps: bool,
    ) -> Result<Self, CompileError> {
        let (phases, hours) = match source {
            PhaseSource::Static => (resolve_static(definitions, date, tz, allow_gaps)?, None),
            PhaseSource::Solar {
                latitude,
                longitude,
            } => {
                let today = RomanHours::for_date(date, latitude, longitude)?;
                let yesterday = RomanHours::for_date(date - Duration::days(1), latitude, longitude)?;
                (solar::solar_phases(&yesterday, &today, definitions), Some(today))
            }
        };

        let mut table = Self {
            phases,
            anchors: Vec::new(),
        };
        table.anchors = table.resolve_anchors(anchors, date, tz, hours.as_ref())?;
        Ok(table)
    }

    pub fn phases(&self) -> &[ResolvedPhase] {
        &self.phases
    }

    pub fn anchors(&self) -> &[ResolvedAnchor] {
        &self.anchors
    }

    pub fn phase(&self, name: PhaseName) -> Option<&ResolvedPhase> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// The phase containing `instant`, if any.
    pub fn phase_at(&self, instant: DateTime<Utc>) -> Option<&ResolvedPhase> {
        self.phases.iter().find(|p| p.contains(instant))
    }

    /// The phase that starts where `phase` ends.
    pub fn next_phase(&self, phase: &ResolvedPhase) -> Option<&ResolvedPhase> {
        self.phases.iter().find(|p| p.start == phase.end)
    }

    fn resolve_anchors(
        &self,
        definitions: &[AnchorDefinition],
        date: NaiveDate,
        tz: Tz,
        hours: Option<&RomanHours>,
    ) -> Result<Vec<ResolvedAnchor>, CompileError> {
        let mut resolved = Vec::with_capacity(definitions.len());

        for def in definitions {
            if def.duration_minutes == 0 {
                return Err(CompileError::InvalidAnchor {
                    name: def.name.clone(),
                    message: "duration must be positive".into(),
                });
            }

            let start = match (&def.start, def.roman_hour, hours) {
                (Some(clock), _, _) => {
                    let time = parse_clock(clock).ok_or_else(|| CompileError::InvalidClock {
                        field: format!("anchor '{}'", def.name),
                        value: clock.clone(),
                    })?;
                    local_instant(tz, date, time).ok_or_else(|| {
                        CompileError::NonexistentLocalTime {
                            date: date.to_string(),
                            time: clock.clone(),
                            timezone: tz.name().to_string(),
                        }
                    })?
                }
                (None, Some(hour), Some(grid)) if hour < 24 => grid.hour_start(hour),
                (None, Some(hour), Some(_)) => {
                    return Err(CompileError::InvalidAnchor {
                        name: def.name.clone(),
                        message: format!("roman hour {hour} out of range 0-23"),
                    })
                }
                (None, Some(_), None) => {
                    return Err(CompileError::InvalidAnchor {
                        name: def.name.clone(),
                        message: "roman_hour requires solar phases".into(),
                    })
                }
                (None, None, _) => {
                    return Err(CompileError::InvalidAnchor {
                        name: def.name.clone(),
                        message: "either start or roman_hour is required".into(),
                    })
                }
            };
            let end = start + Duration::minutes(i64::from(def.duration_minutes));

            let phase = match def.phase {
                Some(phase) => phase,
                None => self
                    .phase_at(start)
                    .map(|p| p.name)
                    .ok_or_else(|| CompileError::InvalidAnchor {
                        name: def.name.clone(),
                        message: "falls outside every phase".into(),
                    })?,
            };

            resolved.push(ResolvedAnchor {
                name: def.name.clone(),
                start,
                end,
                phase,
            });
        }

        resolved.sort_by_key(|a| a.start);
        for pair in resolved.windows(2) {
            if pair[0].end > pair[1].start {
                return Err(CompileError::OverlappingAnchors {
                    first: pair[0].name.clone(),
                    second: pair[1].name.clone(),
                });
            }
        }

        Ok(resolved)
    }
}

/// Clock-table phases: validate tiling, then pin to the date.
fn resolve_static(
    definitions: &[PhaseDefinition],
    date: NaiveDate,
    tz: Tz,
    allow_gaps: bool,
) -> Result<Vec<ResolvedPhase>, CompileError> {
    if definitions.is_empty() {
        return Err(CompileError::NoPhases);
    }

    struct Span<'a> {
        def: &'a PhaseDefinition,
        start: i64,
        end: i64,
    }

    let mut spans = Vec::with_capacity(definitions.len());
    for def in definitions {
        let start = parse_clock(&def.start).ok_or_else(|| CompileError::InvalidClock {
            field: format!("phase {} start", def.name),
            value: def.start.clone(),
        })?;
        let end = parse_clock(&def.end).ok_or_else(|| CompileError::InvalidClock {
            field: format!("phase {} end", def.name),
            value: def.end.clone(),
        })?;
        spans.push(Span {
            def,
            start: minutes_of_day(start),
            end: minutes_of_day(end),
        });
    }
    spans.sort_by_key(|s| s.start);

    // Only the last phase of the day may run past midnight.
    let last = spans.len() - 1;
    for (i, span) in spans.iter_mut().enumerate() {
        if span.end == span.start || (span.end < span.start && i != last) {
            return Err(CompileError::InvertedPhase {
                phase: span.def.name.to_string(),
                start: span.def.start.clone(),
                end: span.def.end.clone(),
            });
        }
        if span.end < span.start {
            span.end += 24 * 60;
        }
    }

    let check = |before: &Span, after: &Span, after_start: i64| -> Result<(), CompileError> {
        let overlaps = before.end > after_start;
        let gap = before.end < after_start;
        if overlaps || (gap && !allow_gaps) {
            return Err(CompileError::PhaseNotTiled {
                before: before.def.name.to_string(),
                after: after.def.name.to_string(),
                end: before.def.end.clone(),
                start: after.def.start.clone(),
            });
        }
        Ok(())
    };
    for pair in spans.windows(2) {
        check(&pair[0], &pair[1], pair[1].start)?;
    }
    check(&spans[last], &spans[0], spans[0].start + 24 * 60)?;

    let mut phases = Vec::with_capacity(spans.len());
    for span in &spans {
        let start = pin(tz, date, span.start, &span.def.start)?;
        let end = pin(tz, date, span.end, &span.def.end)?;
        phases.push(ResolvedPhase {
            name: span.def.name,
            start,
            end,
            qualities: span.def.qualities.clone(),
            ideal_tasks: span.def.ideal_tasks.clone(),
        });
    }
    Ok(phases)
}

/// Local minute offset (possibly past midnight) to a UTC instant.
fn pin(tz: Tz, date: NaiveDate, minutes: i64, label: &str) -> Result<DateTime<Utc>, CompileError> {
    let day = date + Duration::days(minutes / (24 * 60));
    let clock = minutes % (24 * 60);
    let time = chrono::NaiveTime::from_num_seconds_from_midnight_opt((clock * 60) as u32, 0)
        .ok_or_else(|| CompileError::InvalidClock {
            field: "phase boundary".into(),
            value: label.to_string(),
        })?;
    local_instant(tz, day, time).ok_or_else(|| CompileError::NonexistentLocalTime {
        date: day.to_string(),
        time: label.to_string(),
        timezone: tz.name().to_string(),
    })
}
