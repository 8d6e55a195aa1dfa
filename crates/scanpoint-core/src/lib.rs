//! # scanpoint-core
//!
//! Scan pipeline for event check-in and check-out.
//!
//! This crate provides:
//! - Duplicate suppression for camera decodes
//! - Ticket validation with a hard deadline
//! - Group booking resolution
//! - Classification of backend rejections per scan mode
//! - A state machine that guarantees scanning always comes back on
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`orchestrator`] - The scan state machine and its timers
//! - [`gate`] - Same-code suppression window
//! - [`validation`] - Deadline-bounded ticket validation
//! - [`group`] - Group booking lookup and partitioning
//! - [`classify`] - Mapping of rejections to outcomes
//! - [`api`] - Ticketing service client
//! - [`sink`] - Collaborators that render outcomes
//! - [`config`] - Layered configuration loading and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared domain types

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod api;
pub mod classify;
pub mod config;
pub mod error;
pub mod gate;
pub mod group;
pub mod orchestrator;
pub mod sink;
pub mod types;
pub mod validation;

// Re-export primary types for convenience
pub use api::{HttpTicketingApi, TicketingApi};
pub use classify::{classify, Classification, ErrorKind};
pub use config::{
    default_config_path, ApiConfig, LoggingConfig, ScanTimings, ScannerConfig, ScanpointConfig,
};
pub use error::{ApiError, ConfigError, ConfigResult, Result, ScanError};
pub use gate::ScanGate;
pub use group::{partition, GroupResolution, GroupResolver, GroupSelection, SettledGroup};
pub use orchestrator::{
    IgnoreReason, ScanDisposition, ScanOrchestrator, ScanOrchestratorBuilder, ScanPhase,
    ScanResolution, SessionStatus,
};
pub use sink::{FeedbackCue, FeedbackSink, InfoNotice, NoFeedback, ScanOutcomeSink, SingleTicket};
pub use types::{GroupBooking, GroupTicket, Purchaser, ScanEvent, ScanMode, TicketInfo};
pub use validation::{Rejected, ValidationClient, ValidationOutcome};
