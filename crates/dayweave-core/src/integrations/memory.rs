//! Calendar kept in process memory. Backs tests and dry runs.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use chrono_tz::Tz;
use tokio::sync::Mutex;

use super::traits::{CalendarProvider, ProviderError, WriteFailure};
use crate::clock::start_of_day;
use crate::schedule::{FixedEvent, GenerationId, ScheduleEntry};

struct State {
    events: Vec<FixedEvent>,
    next_id: usize,
    inserts: usize,
}

pub struct InMemoryCalendar {
    tz: Tz,
    state: Mutex<State>,
    /// Reject the insertion after this many successful ones
    fail_after: Option<usize>,
}

impl InMemoryCalendar {
    pub fn new(tz: Tz) -> Self {
        Self::with_events(tz, Vec::new())
    }

    pub fn with_events(tz: Tz, events: Vec<FixedEvent>) -> Self {
        Self {
            tz,
            state: Mutex::new(State {
                events,
                next_id: 1,
                inserts: 0,
            }),
            fail_after: None,
        }
    }

    pub fn fail_after(mut self, inserts: usize) -> Self {
        self.fail_after = Some(inserts);
        self
    }

    /// Snapshot of everything stored.
    pub async fn events(&self) -> Vec<FixedEvent> {
        self.state.lock().await.events.clone()
    }
}

#[async_trait]
impl CalendarProvider for InMemoryCalendar {
    async fn list_events(&self, date: NaiveDate) -> Result<Vec<FixedEvent>, ProviderError> {
        let day_start = start_of_day(self.tz, date);
        let day_end = start_of_day(self.tz, date + Duration::days(1));
        let state = self.state.lock().await;
        let mut events: Vec<FixedEvent> = state
            .events
            .iter()
            .filter(|e| e.start < day_end && day_start < e.end)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.start);
        Ok(events)
    }

    async fn create_events(
        &self,
        entries: &[ScheduleEntry],
        generation: &GenerationId,
    ) -> Result<Vec<String>, WriteFailure> {
        let mut state = self.state.lock().await;
        let mut created = Vec::with_capacity(entries.len());
        for entry in entries {
            if self.fail_after.is_some_and(|limit| state.inserts >= limit) {
                return Err(WriteFailure {
                    created,
                    message: format!("calendar rejected '{}'", entry.title),
                });
            }
            let id = format!("mem-{}", state.next_id);
            state.next_id += 1;
            state.inserts += 1;
            state.events.push(FixedEvent {
                id: Some(id.clone()),
                title: entry.title.clone(),
                start: entry.start,
                end: entry.end,
                generation: Some(generation.tag()),
            });
            created.push(id);
        }
        Ok(created)
    }

    async fn delete_events(&self, generation: &GenerationId) -> Result<usize, ProviderError> {
        let mut state = self.state.lock().await;
        let before = state.events.len();
        state
            .events
            .retain(|e| !e.generation.as_deref().is_some_and(|tag| generation.covers(tag)));
        Ok(before - state.events.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::EntryKind;
    use chrono::{TimeZone, Utc};

    const TZ: Tz = chrono_tz::Europe::Amsterdam;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    fn entry(hour: u32) -> ScheduleEntry {
        let start = Utc.with_ymd_and_hms(2025, 6, 2, hour, 0, 0).unwrap();
        ScheduleEntry::new("Block", start, start + Duration::minutes(30), EntryKind::Task)
    }

    #[tokio::test]
    async fn delete_only_touches_own_generation() {
        let user = FixedEvent::new(
            "Dentist",
            Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 2, 13, 0, 0).unwrap(),
        );
        let calendar = InMemoryCalendar::with_events(TZ, vec![user.clone()]);
        let first = GenerationId::new("dayweave", date());
        calendar.create_events(&[entry(7), entry(8)], &first).await.unwrap();

        let other = GenerationId::new("someone-else", date());
        calendar.create_events(&[entry(9)], &other).await.unwrap();

        let rerun = GenerationId::new("dayweave", date());
        assert_eq!(calendar.delete_events(&rerun).await.unwrap(), 2);

        let left = calendar.list_events(date()).await.unwrap();
        assert_eq!(left.len(), 2);
        assert!(left.contains(&user));
    }

    #[tokio::test]
    async fn failure_reports_partial_inserts() {
        let calendar = InMemoryCalendar::new(TZ).fail_after(1);
        let generation = GenerationId::new("dayweave", date());
        let err = calendar
            .create_events(&[entry(7), entry(8)], &generation)
            .await
            .unwrap_err();
        assert_eq!(err.created.len(), 1);
        assert_eq!(calendar.events().await.len(), 1);
    }

    #[tokio::test]
    async fn list_is_scoped_to_local_day() {
        let late = FixedEvent::new(
            "Late call",
            // 23:30 local on the 2nd
            Utc.with_ymd_and_hms(2025, 6, 2, 21, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 2, 22, 30, 0).unwrap(),
        );
        let calendar = InMemoryCalendar::with_events(TZ, vec![late]);
        assert_eq!(calendar.list_events(date()).await.unwrap().len(), 1);
        assert_eq!(calendar.list_events(date() + Duration::days(1)).await.unwrap().len(), 1);
        assert!(calendar.list_events(date() + Duration::days(2)).await.unwrap().is_empty());
    }
}
