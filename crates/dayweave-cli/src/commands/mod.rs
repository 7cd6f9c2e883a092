pub mod config;
pub mod phases;
pub mod plan;

use chrono::{NaiveDate, Utc};
use dayweave_core::error::Result;
use dayweave_core::PlannerConfig;

/// `date`, or today in the configured timezone.
pub fn target_date(config: &PlannerConfig, date: Option<NaiveDate>) -> Result<NaiveDate> {
    match date {
        Some(date) => Ok(date),
        None => Ok(Utc::now().with_timezone(&config.timezone()?).date_naive()),
    }
}
