use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::compiler::ConstraintPayload;
use crate::error::GenerationError;
use crate::habit::RawHabit;
use crate::parser::GeneratorResponse;
use crate::schedule::{FixedEvent, GenerationId, ScheduleEntry};
use crate::task::RawTask;

/// A collaborator could not answer.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ProviderError(pub String);

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// Insertion stopped part way. `created` holds the ids that did land.
#[derive(Debug, Error)]
#[error("{message} (after {} insertions)", .created.len())]
pub struct WriteFailure {
    pub created: Vec<String>,
    pub message: String,
}

/// Calendar holding the user's commitments and receiving planned entries.
///
/// Created events carry the generation tag in their metadata so
/// `delete_events` can find exactly what a planning run wrote.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Events touching `date` (in the provider's timezone).
    async fn list_events(&self, date: NaiveDate) -> Result<Vec<FixedEvent>, ProviderError>;

    /// Insert entries tagged with `generation`, returning their ids in order.
    async fn create_events(
        &self,
        entries: &[ScheduleEntry],
        generation: &GenerationId,
    ) -> Result<Vec<String>, WriteFailure>;

    /// Delete every event tagged for the same generator and date as
    /// `generation`. Returns how many were removed.
    async fn delete_events(&self, generation: &GenerationId) -> Result<usize, ProviderError>;
}

/// Source of open tasks.
#[async_trait]
pub trait TaskProvider: Send + Sync {
    async fn list_open_tasks(&self) -> Result<Vec<RawTask>, ProviderError>;
}

/// Tabular habit store.
#[async_trait]
pub trait HabitSource: Send + Sync {
    async fn list_habits(&self) -> Result<Vec<RawHabit>, ProviderError>;
}

/// The generative scheduling service. Stateless request/response.
#[async_trait]
pub trait ScheduleGenerator: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn generate(
        &self,
        payload: &ConstraintPayload,
        prompt: &str,
    ) -> Result<GeneratorResponse, GenerationError>;
}
