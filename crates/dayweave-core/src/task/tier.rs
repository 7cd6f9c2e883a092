//! Urgency tiers.
//!
//! A task's tier comes from the hours per day it needs before its deadline.
//! The thresholds live in an ordered table so they can be reconfigured and
//! tested without touching the prioritizer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::phase::PhaseName;

/// Urgency classification, `T1` most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PriorityTier {
    T1,
    T2,
    T3,
    T4,
    T5,
    T6,
    T7,
}

impl PriorityTier {
    pub fn rank(&self) -> u8 {
        match self {
            PriorityTier::T1 => 1,
            PriorityTier::T2 => 2,
            PriorityTier::T3 => 3,
            PriorityTier::T4 => 4,
            PriorityTier::T5 => 5,
            PriorityTier::T6 => 6,
            PriorityTier::T7 => 7,
        }
    }

    /// Tiers at or above `T2` raise a warning when fully displaced.
    pub fn is_urgent(&self) -> bool {
        *self <= PriorityTier::T2
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.rank())
    }
}

impl FromStr for PriorityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "T1" => Ok(PriorityTier::T1),
            "T2" => Ok(PriorityTier::T2),
            "T3" => Ok(PriorityTier::T3),
            "T4" => Ok(PriorityTier::T4),
            "T5" => Ok(PriorityTier::T5),
            "T6" => Ok(PriorityTier::T6),
            "T7" => Ok(PriorityTier::T7),
            _ => Err(format!("unknown tier '{s}'")),
        }
    }
}

/// One row of the tier table: tasks needing more than `above_hours_per_day`
/// land in `tier`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRule {
    pub tier: PriorityTier,
    pub above_hours_per_day: f64,
    pub max_subunits: usize,
    /// Phases whose character suits work at this urgency.
    #[serde(default)]
    pub phases: Vec<PhaseName>,
}

/// The tier for tasks below every threshold or without a deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierFallback {
    pub tier: PriorityTier,
    pub max_subunits: usize,
    #[serde(default)]
    pub phases: Vec<PhaseName>,
}

/// Ordered thresholds, strictly descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTable {
    #[serde(default = "default_rules")]
    pub rules: Vec<TierRule>,
    #[serde(default = "default_fallback")]
    pub fallback: TierFallback,
}

fn rule(tier: PriorityTier, above: f64, max_subunits: usize, phases: &[PhaseName]) -> TierRule {
    TierRule {
        tier,
        above_hours_per_day: above,
        max_subunits,
        phases: phases.to_vec(),
    }
}

fn default_rules() -> Vec<TierRule> {
    use PhaseName::*;
    vec![
        rule(PriorityTier::T1, 4.0, 5, &[Fire, Wood]),
        rule(PriorityTier::T2, 2.0, 3, &[Fire, Wood]),
        rule(PriorityTier::T3, 1.0, 2, &[Wood, Metal]),
        rule(PriorityTier::T4, 0.5, 2, &[Metal, Fire]),
        rule(PriorityTier::T5, 0.25, 1, &[Metal, Earth]),
    ]
}

fn default_fallback() -> TierFallback {
    TierFallback {
        tier: PriorityTier::T6,
        max_subunits: 1,
        phases: vec![PhaseName::Earth, PhaseName::Metal],
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            fallback: default_fallback(),
        }
    }
}

impl TierTable {
    /// Tier for a task needing `hours_per_day`; `None` means no deadline.
    pub fn classify(&self, hours_per_day: Option<f64>) -> PriorityTier {
        let Some(hpd) = hours_per_day else {
            return self.fallback.tier;
        };
        self.rules
            .iter()
            .find(|r| hpd > r.above_hours_per_day)
            .map(|r| r.tier)
            .unwrap_or(self.fallback.tier)
    }

    /// How many children of a project may be scheduled at this tier.
    pub fn max_subunits(&self, tier: PriorityTier) -> usize {
        self.rules
            .iter()
            .find(|r| r.tier == tier)
            .map(|r| r.max_subunits)
            .unwrap_or(self.fallback.max_subunits)
    }

    pub fn phases(&self, tier: PriorityTier) -> &[PhaseName] {
        self.rules
            .iter()
            .find(|r| r.tier == tier)
            .map(|r| r.phases.as_slice())
            .unwrap_or(&self.fallback.phases)
    }

    /// Thresholds must strictly decrease while tiers strictly increase, and
    /// the fallback tier must sit below every rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: "tiers".into(),
            message,
        };

        for r in &self.rules {
            if !r.above_hours_per_day.is_finite() || r.above_hours_per_day < 0.0 {
                return Err(invalid(format!(
                    "{} threshold {} must be a non-negative number",
                    r.tier, r.above_hours_per_day
                )));
            }
            if r.max_subunits == 0 {
                return Err(invalid(format!("{} max_subunits must be at least 1", r.tier)));
            }
        }
        for pair in self.rules.windows(2) {
            if pair[1].above_hours_per_day >= pair[0].above_hours_per_day {
                return Err(invalid(format!(
                    "thresholds must strictly decrease: {} ({}) then {} ({})",
                    pair[0].tier,
                    pair[0].above_hours_per_day,
                    pair[1].tier,
                    pair[1].above_hours_per_day
                )));
            }
            if pair[1].tier <= pair[0].tier {
                return Err(invalid(format!(
                    "tiers must be listed most urgent first: {} before {}",
                    pair[0].tier, pair[1].tier
                )));
            }
        }
        if let Some(last) = self.rules.last() {
            if self.fallback.tier <= last.tier {
                return Err(invalid(format!(
                    "fallback tier {} must be less urgent than {}",
                    self.fallback.tier, last.tier
                )));
            }
        }
        if self.fallback.max_subunits == 0 {
            return Err(invalid("fallback max_subunits must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds() {
        let table = TierTable::default();
        assert_eq!(table.classify(Some(6.0)), PriorityTier::T1);
        assert_eq!(table.classify(Some(4.0)), PriorityTier::T2);
        assert_eq!(table.classify(Some(1.5)), PriorityTier::T3);
        assert_eq!(table.classify(Some(0.75)), PriorityTier::T4);
        assert_eq!(table.classify(Some(0.3)), PriorityTier::T5);
        assert_eq!(table.classify(Some(0.1)), PriorityTier::T6);
        assert_eq!(table.classify(None), PriorityTier::T6);
    }

    #[test]
    fn subunit_caps_follow_tier() {
        let table = TierTable::default();
        assert_eq!(table.max_subunits(PriorityTier::T1), 5);
        assert_eq!(table.max_subunits(PriorityTier::T2), 3);
        assert_eq!(table.max_subunits(PriorityTier::T4), 2);
        assert_eq!(table.max_subunits(PriorityTier::T6), 1);
        assert_eq!(table.max_subunits(PriorityTier::T7), 1);
    }

    #[test]
    fn seven_tier_table_is_valid() {
        let mut table = TierTable::default();
        table.rules.push(rule(PriorityTier::T6, 0.1, 1, &[]));
        table.fallback.tier = PriorityTier::T7;
        table.validate().unwrap();
        assert_eq!(table.classify(Some(0.05)), PriorityTier::T7);
        assert_eq!(table.classify(Some(0.2)), PriorityTier::T6);
    }

    #[test]
    fn non_descending_thresholds_are_rejected() {
        let mut table = TierTable::default();
        table.rules[2].above_hours_per_day = 3.0; // above T2's 2.0
        assert!(table.validate().is_err());
    }

    #[test]
    fn fallback_must_trail_rules() {
        let mut table = TierTable::default();
        table.fallback.tier = PriorityTier::T5;
        assert!(table.validate().is_err());
    }

    #[test]
    fn tiers_parse_and_display() {
        assert_eq!("t3".parse::<PriorityTier>().unwrap(), PriorityTier::T3);
        assert_eq!(PriorityTier::T7.to_string(), "T7");
        assert!(PriorityTier::T2.is_urgent());
        assert!(!PriorityTier::T3.is_urgent());
    }
}
