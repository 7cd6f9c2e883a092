//! Collaborators of a planning run: calendar, task list, habit sheet and the
//! generative scheduling service.

pub mod chat;
pub mod file;
pub mod memory;
pub mod traits;

pub use chat::ChatGenerator;
pub use file::{JsonCalendarFile, JsonHabitFile, JsonTaskFile};
pub use memory::InMemoryCalendar;
pub use traits::{
    CalendarProvider, HabitSource, ProviderError, ScheduleGenerator, TaskProvider, WriteFailure,
};
