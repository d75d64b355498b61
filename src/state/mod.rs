//! View-models for the timetable grid and the chat panel.

pub mod chat;
pub mod timetable;

pub use chat::{ChatConsumer, ChatSession, ChatView, Outcome};
pub use timetable::{GridView, TimetableState, TimetableViewModel};
