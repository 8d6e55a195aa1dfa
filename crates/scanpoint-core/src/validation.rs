//! Remote validation with a hard deadline.
//!
//! [`ValidationClient`] calls the ticketing service, races the call against an
//! internal timeout, and folds every possible result into a
//! [`ValidationOutcome`]. Downstream code never sees raw JSON.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::api::{MessagePayload, TicketingApi, ValidationResponse};
use crate::types::TicketInfo;

/// Default deadline for a validation call.
pub const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_millis(5000);

/// A rejection from the backend, normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    /// Status code reported by the backend (0 when none was given).
    pub status_code: u16,
    /// Message text regardless of which payload shape carried it.
    pub raw_message: String,
    /// Ticket details, when the backend attached them.
    pub info: Option<TicketInfo>,
}

/// Result of validating one scanned code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The code is valid.
    Valid {
        /// Ticket the code belongs to.
        ticket: TicketInfo,
    },
    /// The backend answered with an error.
    Rejected(Rejected),
    /// The backend did not answer within the deadline.
    TimedOut,
    /// The call failed before a usable answer arrived.
    NetworkFailure {
        /// Description of the failure.
        reason: String,
    },
    /// No event is selected or the session is still initializing; the
    /// network was never called.
    NotReady,
}

impl ValidationOutcome {
    /// Ticket details carried by the outcome, if any.
    #[must_use]
    pub const fn ticket_info(&self) -> Option<&TicketInfo> {
        match self {
            Self::Valid { ticket } => Some(ticket),
            Self::Rejected(Rejected { info, .. }) => info.as_ref(),
            Self::TimedOut | Self::NetworkFailure { .. } | Self::NotReady => None,
        }
    }

    /// Short label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Valid { .. } => "valid",
            Self::Rejected(_) => "rejected",
            Self::TimedOut => "timed_out",
            Self::NetworkFailure { .. } => "network_failure",
            Self::NotReady => "not_ready",
        }
    }

    /// Normalizes a backend response for `code`.
    #[must_use]
    pub fn from_response(code: &str, response: ValidationResponse) -> Self {
        let ValidationResponse {
            error,
            status,
            msg,
            info: top_level_info,
        } = response;

        let (message, nested_info) = match msg {
            Some(MessagePayload::Text(text)) => (text, None),
            Some(MessagePayload::Detailed { message, info }) => (message.unwrap_or_default(), info),
            None => (String::new(), None),
        };
        let info = nested_info.or(top_level_info);

        if error {
            Self::Rejected(Rejected {
                status_code: status.unwrap_or_default(),
                raw_message: message,
                info,
            })
        } else {
            let mut ticket = info.unwrap_or_default();
            if ticket.qr_code.is_none() {
                ticket.qr_code = Some(code.to_owned());
            }
            Self::Valid { ticket }
        }
    }
}

/// Validates codes against the ticketing service under a deadline.
#[derive(Clone)]
pub struct ValidationClient {
    api: Arc<dyn TicketingApi>,
    deadline: Duration,
}

impl std::fmt::Debug for ValidationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationClient")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl ValidationClient {
    /// Creates a client with the given deadline.
    pub fn new(api: Arc<dyn TicketingApi>, deadline: Duration) -> Self {
        Self { api, deadline }
    }

    /// Validates `code` for `event_id`.
    ///
    /// Short-circuits to [`ValidationOutcome::NotReady`] when `event_id` is
    /// empty or `initializing` is set. When the deadline passes first the
    /// pending call is dropped and [`ValidationOutcome::TimedOut`] is returned.
    pub async fn validate(&self, event_id: &str, code: &str, initializing: bool) -> ValidationOutcome {
        if event_id.trim().is_empty() || initializing {
            debug!(initializing, "session not ready, skipping validation");
            return ValidationOutcome::NotReady;
        }

        match timeout(self.deadline, self.api.validate_code(event_id, code)).await {
            Ok(Ok(response)) => ValidationOutcome::from_response(code, response),
            Ok(Err(err)) => {
                warn!(
                    error = %err,
                    transport = err.is_transport(),
                    client_timeout = err.is_timeout(),
                    "validation call failed"
                );
                ValidationOutcome::NetworkFailure {
                    reason: err.to_string(),
                }
            }
            Err(_) => {
                warn!(deadline_ms = self.deadline.as_millis(), "validation timed out");
                ValidationOutcome::TimedOut
            }
        }
    }
}
