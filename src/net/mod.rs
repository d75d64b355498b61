//! HTTP boundary: schemas, errors, the REST client and stream decoders.

pub mod api;
pub mod error;
pub mod sse;
pub mod types;

pub use api::{ApiClient, ChatStream, ChatTransport, StreamFormat, TimetableApi};
pub use error::ApiError;
