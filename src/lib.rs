//! Client core for the campus timetable and assistant chat services.
//!
//! SYSTEM CONTEXT
//! ==============
//! The directory, timetable, session and chat services are all externally
//! owned REST endpoints. `net` is the only module that speaks HTTP; the
//! view-models in `state` depend on its traits, and the binary wires both
//! to a terminal.

pub mod config;
pub mod net;
pub mod render;
pub mod state;

pub use config::ClientConfig;
pub use net::{ApiClient, ApiError};
