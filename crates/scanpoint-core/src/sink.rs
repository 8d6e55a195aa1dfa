//! Collaborators that receive scan outcomes.
//!
//! The orchestrator decides; these traits render. [`ScanOutcomeSink`] covers
//! screens and navigation, [`FeedbackSink`] covers sounds and haptics.

use crate::classify::ErrorKind;
use crate::group::GroupSelection;
use crate::types::{ScanMode, TicketInfo};

/// A ticket ready for the single-ticket action flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleTicket {
    /// The code that was scanned.
    pub code: String,
    /// What the backend told us about the ticket.
    pub info: TicketInfo,
    /// Set when the backend rejected the code but the rejection was tolerated
    /// for this mode.
    pub lenient: bool,
}

/// A short, non-blocking message. Scanning resumes on its own after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoNotice {
    /// What happened.
    pub kind: ErrorKind,
    /// Headline to show.
    pub headline: String,
    /// Guest or purchaser name, when known.
    pub guest_name: Option<String>,
    /// Ticket type, when known.
    pub ticket_type: Option<String>,
    /// When the guest was checked in, as reported by the backend.
    pub checked_in_at: Option<String>,
}

impl InfoNotice {
    /// A notice of `kind` using the kind's default headline.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            headline: kind.title().to_string(),
            guest_name: None,
            ticket_type: None,
            checked_in_at: None,
        }
    }

    /// Fills guest details from ticket info.
    #[must_use]
    pub fn with_ticket(mut self, info: Option<&TicketInfo>) -> Self {
        if let Some(info) = info {
            self.guest_name.clone_from(&info.name);
            self.ticket_type.clone_from(&info.ticket_type);
            self.checked_in_at.clone_from(&info.checked_in_at);
        }
        self
    }
}

/// Receives the result of each processed scan.
///
/// Exactly one method is called per scan that passes the gate. Returning an
/// error is treated as an unexpected failure of the scan.
pub trait ScanOutcomeSink: Send + Sync {
    /// Hand a single ticket to the action flow.
    ///
    /// # Errors
    ///
    /// Returns an error if the action flow cannot be opened.
    fn on_single_resolved(&self, ticket: &SingleTicket, mode: ScanMode) -> anyhow::Result<()>;

    /// Hand the relevant tickets of a booking to the selection surface.
    ///
    /// # Errors
    ///
    /// Returns an error if the selection surface cannot be opened.
    fn on_group_resolved(&self, selection: &GroupSelection) -> anyhow::Result<()>;

    /// Show an informational notice.
    ///
    /// # Errors
    ///
    /// Returns an error if the notice cannot be shown.
    fn on_info(&self, notice: &InfoNotice) -> anyhow::Result<()>;

    /// Show an error that the operator must acknowledge.
    ///
    /// # Errors
    ///
    /// Returns an error if the error cannot be shown.
    fn on_blocking_error(&self, kind: ErrorKind, message: &str) -> anyhow::Result<()>;
}

/// Audible/haptic cue categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedbackCue {
    /// A ticket (or group) is ready for action.
    Success,
    /// An informational notice is shown.
    Info,
    /// A blocking error is shown.
    Error,
}

/// Plays cues. Must not block; failures are the implementor's problem.
pub trait FeedbackSink: Send + Sync {
    /// Play `cue`.
    fn cue(&self, cue: FeedbackCue);
}

/// A [`FeedbackSink`] that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFeedback;

impl FeedbackSink for NoFeedback {
    fn cue(&self, _cue: FeedbackCue) {}
}
