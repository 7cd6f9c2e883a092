//! Solar phase boundaries.
//!
//! Daylight (sunrise to sunset) and night (sunset to next sunrise) are each
//! split into twelve equal "Roman hours". Hours 0-11 are day hours, 12-23
//! night hours. Phases map onto hour ranges:
//!
//! | Phase | Hours |
//! |-------|-------|
//! | Wood  | previous night 21-23, day 0-1 |
//! | Fire  | day 2-5 |
//! | Earth | day 6-7 |
//! | Metal | day 8-11 |
//! | Water | night 12-20 |
//!
//! Sunrise and sunset use the standard solar-position approximation
//! (solar mean anomaly, equation of center, ecliptic longitude), accurate to
//! a minute or two outside the polar circles.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use super::{PhaseDefinition, PhaseName, ResolvedPhase};
use crate::error::CompileError;

const J2000: f64 = 2_451_545.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const EARTH_TILT_DEG: f64 = 23.4397;
/// Apparent sunrise: refraction plus solar disc radius.
const SUNRISE_ALTITUDE_DEG: f64 = -0.833;

/// Sunrise and sunset for one date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarDay {
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
}

impl SolarDay {
    /// Compute sunrise/sunset at a location (longitude east positive).
    ///
    /// Returns `None` during polar day or polar night.
    pub fn compute(date: NaiveDate, latitude: f64, longitude: f64) -> Option<SolarDay> {
        let noon = date.and_hms_opt(12, 0, 0)?.and_utc();
        let julian_noon = noon.timestamp() as f64 / 86_400.0 + UNIX_EPOCH_JD;
        let day_number = (julian_noon - J2000).round();

        let mean_noon = day_number + 0.0009 - longitude / 360.0;
        let anomaly = (357.5291 + 0.985_600_28 * mean_noon).rem_euclid(360.0);
        let m = anomaly.to_radians();
        let center = 1.9148 * m.sin() + 0.0200 * (2.0 * m).sin() + 0.0003 * (3.0 * m).sin();
        let ecliptic = (anomaly + center + 180.0 + 102.9372).rem_euclid(360.0).to_radians();
        let transit = J2000 + mean_noon + 0.0053 * m.sin() - 0.0069 * (2.0 * ecliptic).sin();

        let declination = (ecliptic.sin() * EARTH_TILT_DEG.to_radians().sin()).asin();
        let phi = latitude.to_radians();
        let cos_hour_angle = (SUNRISE_ALTITUDE_DEG.to_radians().sin() - phi.sin() * declination.sin())
            / (phi.cos() * declination.cos());
        if !(-1.0..=1.0).contains(&cos_hour_angle) {
            return None;
        }
        let hour_angle = cos_hour_angle.acos().to_degrees();

        Some(SolarDay {
            sunrise: julian_to_utc(transit - hour_angle / 360.0)?,
            sunset: julian_to_utc(transit + hour_angle / 360.0)?,
        })
    }

    pub fn day_length(&self) -> Duration {
        self.sunset - self.sunrise
    }
}

fn julian_to_utc(julian: f64) -> Option<DateTime<Utc>> {
    let millis = ((julian - UNIX_EPOCH_JD) * 86_400_000.0).round() as i64;
    Utc.timestamp_millis_opt(millis).single()
}

/// Twelve day hours and twelve night hours for one date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RomanHours {
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
    pub next_sunrise: DateTime<Utc>,
}

impl RomanHours {
    pub fn for_date(date: NaiveDate, latitude: f64, longitude: f64) -> Result<Self, CompileError> {
        let no_day = || CompileError::NoSolarDay {
            date: date.to_string(),
            latitude,
        };
        let today = SolarDay::compute(date, latitude, longitude).ok_or_else(no_day)?;
        let tomorrow =
            SolarDay::compute(date + Duration::days(1), latitude, longitude).ok_or_else(no_day)?;
        Ok(Self {
            sunrise: today.sunrise,
            sunset: today.sunset,
            next_sunrise: tomorrow.sunrise,
        })
    }

    fn day_hour(&self) -> Duration {
        (self.sunset - self.sunrise) / 12
    }

    fn night_hour(&self) -> Duration {
        (self.next_sunrise - self.sunset) / 12
    }

    /// Start of Roman hour `hour` (0-11 day, 12-23 night, 24 = next sunrise).
    pub fn hour_start(&self, hour: u8) -> DateTime<Utc> {
        match hour {
            0..=11 => self.sunrise + self.day_hour() * i32::from(hour),
            12..=23 => self.sunset + self.night_hour() * i32::from(hour - 12),
            _ => self.next_sunrise,
        }
    }

    pub fn hour_end(&self, hour: u8) -> DateTime<Utc> {
        self.hour_start(hour.saturating_add(1))
    }
}

/// Solar phases for the date described by `today`, starting with Wood in the
/// last quarter of the previous night.
pub(crate) fn solar_phases(
    yesterday: &RomanHours,
    today: &RomanHours,
    definitions: &[PhaseDefinition],
) -> Vec<ResolvedPhase> {
    let bounds = [
        (PhaseName::Wood, yesterday.hour_start(21), today.hour_start(2)),
        (PhaseName::Fire, today.hour_start(2), today.hour_start(6)),
        (PhaseName::Earth, today.hour_start(6), today.hour_start(8)),
        (PhaseName::Metal, today.hour_start(8), today.hour_start(12)),
        (PhaseName::Water, today.hour_start(12), today.hour_start(21)),
    ];

    bounds
        .into_iter()
        .map(|(name, start, end)| {
            let meta = definitions.iter().find(|d| d.name == name);
            ResolvedPhase {
                name,
                start,
                end,
                qualities: meta.map(|d| d.qualities.clone()).unwrap_or_default(),
                ideal_tasks: meta.map(|d| d.ideal_tasks.clone()).unwrap_or_default(),
            }
        })
        .collect()
}
