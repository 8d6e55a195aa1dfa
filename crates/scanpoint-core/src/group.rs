//! Group booking resolution.
//!
//! A scanned ticket may be one of several bought together. After every
//! validation attempt the orchestrator asks [`GroupResolver`] whether the code
//! belongs to such a booking and, if so, which of its tickets can be acted on
//! in the current mode.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::TicketingApi;
use crate::types::{GroupBooking, GroupTicket, Purchaser, ScanMode};
use crate::validation::ValidationOutcome;

/// Tickets of a booking that can be acted on in the current mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSelection {
    /// Mode the selection was computed for.
    pub mode: ScanMode,
    /// Booking owner.
    pub purchaser: Purchaser,
    /// Relevant tickets, in booking order.
    pub tickets: Vec<GroupTicket>,
    /// Id of the scanned ticket when it is among [`Self::tickets`], so the
    /// selection surface can pre-mark it.
    pub scanned_ticket_id: Option<String>,
    /// Size of the whole booking.
    pub booking_size: usize,
}

/// A booking with nothing left to do in the current mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledGroup {
    /// Mode the booking was checked against.
    pub mode: ScanMode,
    /// Booking owner.
    pub purchaser: Purchaser,
    /// Size of the whole booking.
    pub booking_size: usize,
}

/// Result of partitioning a booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupResolution {
    /// The code is not part of a multi-ticket booking, or the lookup failed.
    NotAGroup,
    /// At least one ticket can be acted on.
    Relevant(GroupSelection),
    /// The booking exists but every ticket is already in the target state.
    NothingToProcess(SettledGroup),
}

/// Splits `booking` into the tickets that `mode` can act on.
///
/// A ticket is relevant when it is not checked in (check-in mode) or is
/// checked in (check-out mode). The scanned ticket gets no special treatment:
/// it is relevant only if it passes the same test. Bookings of one ticket or
/// fewer are not groups.
#[must_use]
pub fn partition(mode: ScanMode, code: &str, booking: GroupBooking) -> GroupResolution {
    let booking_size = booking.tickets.len();
    if booking_size <= 1 {
        return GroupResolution::NotAGroup;
    }

    let tickets: Vec<GroupTicket> = booking
        .tickets
        .into_iter()
        .filter(|ticket| mode.is_actionable(ticket.is_checked_in))
        .collect();

    if tickets.is_empty() {
        return GroupResolution::NothingToProcess(SettledGroup {
            mode,
            purchaser: booking.purchaser,
            booking_size,
        });
    }

    let scanned_ticket_id = tickets
        .iter()
        .find(|ticket| ticket.matches_code(code))
        .map(|ticket| ticket.id.clone());

    GroupResolution::Relevant(GroupSelection {
        mode,
        purchaser: booking.purchaser,
        tickets,
        scanned_ticket_id,
        booking_size,
    })
}

/// Fetches and partitions group bookings.
#[derive(Clone)]
pub struct GroupResolver {
    api: Arc<dyn TicketingApi>,
}

impl std::fmt::Debug for GroupResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupResolver").finish_non_exhaustive()
    }
}

impl GroupResolver {
    /// Creates a resolver backed by `api`.
    pub fn new(api: Arc<dyn TicketingApi>) -> Self {
        Self { api }
    }

    /// Resolves the booking `code` belongs to.
    ///
    /// Runs regardless of how validation went. The lookup has no deadline of
    /// its own; any failure degrades to [`GroupResolution::NotAGroup`] so the
    /// scan continues as an individual ticket.
    pub async fn resolve(
        &self,
        event_id: &str,
        code: &str,
        mode: ScanMode,
        validation: &ValidationOutcome,
    ) -> GroupResolution {
        let response = match self.api.fetch_group_booking(event_id, code, validation).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "group lookup failed, treating as individual ticket");
                return GroupResolution::NotAGroup;
            }
        };

        if response.error {
            debug!("group lookup reported an error, treating as individual ticket");
            return GroupResolution::NotAGroup;
        }

        let booking = GroupBooking {
            purchaser: response.purchaser.unwrap_or_default(),
            tickets: response.tickets,
        };
        let resolution = partition(mode, code, booking);
        if let GroupResolution::Relevant(selection) = &resolution {
            debug!(
                relevant = selection.tickets.len(),
                booking_size = selection.booking_size,
                "group booking resolved"
            );
        }
        resolution
    }
}
