//! Shared domain types.
//!
//! The ticketing API is loosely typed: ids arrive as numbers or strings and
//! check-in flags as booleans, `0`/`1` or `"0"`/`"1"`. The [`lenient`] helpers
//! absorb those variations so the rest of the crate only sees clean types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Whether scans are admitting or releasing guests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Admit guests.
    #[default]
    #[serde(alias = "check-in", alias = "check_in")]
    CheckIn,
    /// Release guests that were previously admitted.
    #[serde(alias = "check-out", alias = "check_out")]
    CheckOut,
}

impl ScanMode {
    /// Returns the opposite mode.
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::CheckIn => Self::CheckOut,
            Self::CheckOut => Self::CheckIn,
        }
    }

    /// Returns `true` if a ticket in the given check-in state can be acted on
    /// in this mode.
    #[inline]
    #[must_use]
    pub const fn is_actionable(self, is_checked_in: bool) -> bool {
        match self {
            Self::CheckIn => !is_checked_in,
            Self::CheckOut => is_checked_in,
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CheckIn => f.write_str("checkin"),
            Self::CheckOut => f.write_str("checkout"),
        }
    }
}

impl FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "checkin" | "check-in" | "check_in" | "in" => Ok(Self::CheckIn),
            "checkout" | "check-out" | "check_out" | "out" => Ok(Self::CheckOut),
            other => Err(format!(
                "unknown scan mode '{other}', expected 'checkin' or 'checkout'"
            )),
        }
    }
}

/// A single decode emitted by the camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    /// The decoded code.
    pub code: String,
    /// When the code was decoded.
    pub scanned_at: Instant,
}

impl ScanEvent {
    /// Creates an event stamped with the current instant.
    pub fn now(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            scanned_at: Instant::now(),
        }
    }
}

/// Ticket details attached to a validation response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketInfo {
    /// Backend ticket id.
    #[serde(deserialize_with = "lenient::opt_string")]
    pub id: Option<String>,

    /// Guest name.
    #[serde(alias = "guest_name", alias = "fullname")]
    pub name: Option<String>,

    /// Guest email.
    pub email: Option<String>,

    /// Ticket type label, e.g. "VIP".
    #[serde(alias = "ticketType", alias = "type")]
    pub ticket_type: Option<String>,

    /// Human-facing ticket identifier printed on the ticket.
    #[serde(alias = "ticketIdentifier", deserialize_with = "lenient::opt_string")]
    pub ticket_identifier: Option<String>,

    /// Booking the ticket belongs to, when the backend reports it.
    #[serde(alias = "bookingId", deserialize_with = "lenient::opt_string")]
    pub booking_id: Option<String>,

    /// Whether the guest is currently checked in.
    #[serde(alias = "checkedin", alias = "isCheckedIn", deserialize_with = "lenient::flag")]
    pub checked_in: bool,

    /// Raw check-in timestamp as reported by the backend.
    #[serde(alias = "checkin_date", alias = "checkedInDate")]
    pub checked_in_at: Option<String>,

    /// Encoded QR payload for the ticket.
    #[serde(alias = "qrCode", alias = "qrcode")]
    pub qr_code: Option<String>,
}

impl TicketInfo {
    /// Parses [`Self::checked_in_at`] into a UTC timestamp.
    ///
    /// Accepts RFC 3339 and the backend's `YYYY-MM-DD HH:MM:SS` form (assumed UTC).
    #[must_use]
    pub fn checked_in_at_utc(&self) -> Option<DateTime<Utc>> {
        let raw = self.checked_in_at.as_deref()?.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// One ticket inside a group booking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupTicket {
    /// Backend ticket id.
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,

    /// Guest name.
    #[serde(default)]
    pub name: String,

    /// Guest email.
    #[serde(default)]
    pub email: String,

    /// Ticket type label.
    #[serde(default, alias = "ticketType")]
    pub ticket_type: String,

    /// Human-facing ticket identifier.
    #[serde(default, alias = "ticketIdentifier", deserialize_with = "lenient::string")]
    pub ticket_identifier: String,

    /// Whether the guest is currently checked in.
    #[serde(
        default,
        alias = "isCheckedIn",
        alias = "checkedin",
        deserialize_with = "lenient::flag"
    )]
    pub is_checked_in: bool,

    /// Encoded QR payload for the ticket.
    #[serde(default, alias = "qrCode", alias = "qrcode")]
    pub qr_code: String,
}

impl GroupTicket {
    /// Returns `true` if `code` identifies this ticket by QR payload, ticket
    /// identifier or id.
    #[must_use]
    pub fn matches_code(&self, code: &str) -> bool {
        [&self.qr_code, &self.ticket_identifier, &self.id]
            .into_iter()
            .any(|candidate| !candidate.is_empty() && candidate == code)
    }
}

/// The person who bought a group booking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Purchaser {
    /// Purchaser email.
    pub email: String,
    /// Purchaser name.
    pub name: String,
    /// Booking id.
    #[serde(alias = "bookingId", deserialize_with = "lenient::string")]
    pub booking_id: String,
}

/// A purchase containing several independently scannable tickets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupBooking {
    /// Who bought the tickets.
    pub purchaser: Purchaser,
    /// Every ticket in the booking.
    pub tickets: Vec<GroupTicket>,
}

/// Deserializers tolerant of the ticketing API's mixed JSON types.
pub(crate) mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn value_to_string(value: Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            other => Some(other.to_string()),
        }
    }

    pub fn string<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(value_to_string(Value::deserialize(deserializer)?).unwrap_or_default())
    }

    pub fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(value_to_string(Value::deserialize(deserializer)?))
    }

    pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Bool(b) => b,
            Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
            Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
            _ => false,
        })
    }
}
