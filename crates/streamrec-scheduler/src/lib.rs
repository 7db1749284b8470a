//! streamrec-scheduler: Recording schedule evaluation and control.
//!
//! Decides from stored rules whether a recording should be running,
//! drives the recording controller to match, and answers "what is next"
//! queries for polling clients.

pub mod badge;
pub mod clock;
pub mod controller;
pub mod engine;
pub mod occurrence;
pub mod store;

use streamrec_storage::StorageError;

pub use badge::{BadgeReport, NextOccurrenceBadge};
pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{ControllerError, InMemoryController, RecordingController};
pub use engine::{
    EngineConfig, EngineSnapshot, SchedulerEngine, TickAction, TickOutcome, TickPreview, TickReport,
};
pub use store::ScheduleStore;

/// Errors surfaced by the scheduler core.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A rule field failed validation. Never retried.
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("schedule not found: {0}")]
    NotFound(String),
    #[error("recording controller error: {0}")]
    Controller(#[from] ControllerError),
    #[error("persistence error: {0}")]
    Persistence(#[from] StorageError),
}

impl SchedulerError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        SchedulerError::Validation {
            field,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
