//! Core orchestration components
//!
//! The inference client, training-context retriever and interaction logger,
//! sequenced per call by the [`ChatEngine`].

mod chat;
mod inference;
mod logger;
mod prompt;
mod resources;
mod training;

pub use chat::{ChatEngine, ChatError, HealthReport};
