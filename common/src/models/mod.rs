//! Shared data models.

pub mod chat;

pub use chat::{ChatResponse, QuestionRequest, RawResult};
