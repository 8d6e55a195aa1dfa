//! Classification of rejected validations.
//!
//! The ticketing backend reports failures as free text plus a status code. The
//! same message means different things depending on the scan mode: "already
//! checked in" is a problem when admitting a guest but exactly what we expect
//! when releasing one. The rules live in one ordered table per mode so the
//! behavior can be audited and tested without a network.
//!
//! Backend wording is not a contract. If the backend changes its messages,
//! these rules change behavior silently; keep the tables in sync with it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::ScanMode;
use crate::validation::Rejected;

/// Closed set of scan failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The ticket was already checked in (informational).
    AlreadyScanned,
    /// The ticket cannot be checked out because it was never checked in
    /// (informational).
    NotCheckedIn,
    /// The ticket is unknown, expired or for another event.
    InvalidTicket,
    /// The validation call did not answer in time.
    ValidationTimeout,
    /// The validation call failed before producing a response.
    ValidationNetworkError,
    /// No event is selected or the session is still initializing.
    SessionNotReady,
    /// Anything else that went wrong while processing a scan.
    Unknown,
}

impl ErrorKind {
    /// Returns `true` if the operator must acknowledge this error before
    /// scanning resumes.
    ///
    /// Non-blocking kinds are shown briefly and scanning resumes on its own.
    #[inline]
    #[must_use]
    pub const fn is_blocking(self) -> bool {
        !matches!(self, Self::AlreadyScanned | Self::NotCheckedIn)
    }

    /// Short headline suitable for a dialog title.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::AlreadyScanned => "Already Checked In",
            Self::NotCheckedIn => "Not Checked In",
            Self::InvalidTicket => "Invalid Ticket",
            Self::ValidationTimeout => "Validation Timed Out",
            Self::ValidationNetworkError => "Network Error",
            Self::SessionNotReady => "Scanner Not Ready",
            Self::Unknown => "Something Went Wrong",
        }
    }

    /// Machine-readable code for logs.
    #[must_use]
    pub const fn error_code(self) -> &'static str {
        match self {
            Self::AlreadyScanned => "ALREADY_SCANNED",
            Self::NotCheckedIn => "NOT_CHECKED_IN",
            Self::InvalidTicket => "INVALID_TICKET",
            Self::ValidationTimeout => "VALIDATION_TIMEOUT",
            Self::ValidationNetworkError => "VALIDATION_NETWORK_ERROR",
            Self::SessionNotReady => "SESSION_NOT_READY",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// What a rejected validation means for the current mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The rejection is expected or tolerated; carry on with the action.
    Proceed,
    /// The rejection is a real failure of the given kind.
    Error(ErrorKind),
}

struct Rule {
    needles: &'static [&'static str],
    statuses: &'static [u16],
    verdict: Classification,
}

impl Rule {
    fn matches(&self, message: &str, status: u16) -> bool {
        self.statuses.contains(&status) || self.needles.iter().any(|n| message.contains(n))
    }
}

const ALREADY_NEEDLES: &[&str] = &["already", "scanned", "checked in", "cannot check in"];
const ALREADY_STATUSES: &[u16] = &[400, 409];

const CHECK_IN_RULES: &[Rule] = &[
    Rule {
        needles: ALREADY_NEEDLES,
        statuses: ALREADY_STATUSES,
        verdict: Classification::Error(ErrorKind::AlreadyScanned),
    },
    Rule {
        needles: &["invalid", "not found", "expired", "wrong event"],
        statuses: &[404],
        verdict: Classification::Error(ErrorKind::InvalidTicket),
    },
];

// Lenient on purpose: the backend rejects some check-ins it still honors.
const CHECK_IN_FALLBACK: Classification = Classification::Proceed;

const CHECK_OUT_RULES: &[Rule] = &[
    Rule {
        needles: &[
            "not checked in",
            "not scanned",
            "not admitted",
            "cannot check out",
        ],
        statuses: &[],
        verdict: Classification::Error(ErrorKind::NotCheckedIn),
    },
    // message only: a conflict status alone says nothing about check-out
    Rule {
        needles: ALREADY_NEEDLES,
        statuses: &[],
        verdict: Classification::Proceed,
    },
];

const CHECK_OUT_FALLBACK: Classification = Classification::Error(ErrorKind::InvalidTicket);

/// Classifies a rejected validation for `mode`.
///
/// Pure and total: message matching is case-insensitive substring search, the
/// first matching rule wins, and unmatched rejections fall through to the
/// mode's fallback rather than to [`ErrorKind::Unknown`].
#[must_use]
pub fn classify(mode: ScanMode, rejected: &Rejected) -> Classification {
    let message = rejected.raw_message.to_lowercase();
    let (rules, fallback) = match mode {
        ScanMode::CheckIn => (CHECK_IN_RULES, CHECK_IN_FALLBACK),
        ScanMode::CheckOut => (CHECK_OUT_RULES, CHECK_OUT_FALLBACK),
    };
    rules
        .iter()
        .find(|rule| rule.matches(&message, rejected.status_code))
        .map_or(fallback, |rule| rule.verdict)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(status_code: u16, message: &str) -> Rejected {
        Rejected {
            status_code,
            raw_message: message.to_string(),
            info: None,
        }
    }

    #[test]
    fn test_check_in_already_by_message() {
        for msg in [
            "Ticket ALREADY used",
            "QR scanned twice",
            "Guest is checked in",
            "Cannot check in this guest",
        ] {
            assert_eq!(
                classify(ScanMode::CheckIn, &rejected(422, msg)),
                Classification::Error(ErrorKind::AlreadyScanned),
                "{msg}"
            );
        }
    }

    #[test]
    fn test_check_in_already_by_status() {
        assert_eq!(
            classify(ScanMode::CheckIn, &rejected(409, "conflict")),
            Classification::Error(ErrorKind::AlreadyScanned)
        );
        assert_eq!(
            classify(ScanMode::CheckIn, &rejected(400, "")),
            Classification::Error(ErrorKind::AlreadyScanned)
        );
    }

    #[test]
    fn test_check_in_invalid() {
        for msg in ["Invalid code", "Ticket not found", "Expired", "Wrong event"] {
            assert_eq!(
                classify(ScanMode::CheckIn, &rejected(422, msg)),
                Classification::Error(ErrorKind::InvalidTicket),
                "{msg}"
            );
        }
        assert_eq!(
            classify(ScanMode::CheckIn, &rejected(404, "")),
            Classification::Error(ErrorKind::InvalidTicket)
        );
    }

    #[test]
    fn test_check_in_already_wins_over_invalid() {
        // rule order matters: the "already" rule is evaluated first
        assert_eq!(
            classify(ScanMode::CheckIn, &rejected(404, "already scanned")),
            Classification::Error(ErrorKind::AlreadyScanned)
        );
    }

    #[test]
    fn test_check_in_unmatched_proceeds() {
        assert_eq!(
            classify(ScanMode::CheckIn, &rejected(500, "seat map unavailable")),
            Classification::Proceed
        );
    }

    #[test]
    fn test_check_out_not_checked_in() {
        for msg in [
            "Guest NOT checked in",
            "ticket not scanned yet",
            "Not admitted",
            "cannot check out",
        ] {
            assert_eq!(
                classify(ScanMode::CheckOut, &rejected(409, msg)),
                Classification::Error(ErrorKind::NotCheckedIn),
                "{msg}"
            );
        }
    }

    #[test]
    fn test_check_out_already_checked_in_is_expected() {
        assert_eq!(
            classify(
                ScanMode::CheckOut,
                &rejected(409, "Ticket already checked in")
            ),
            Classification::Proceed
        );
    }

    #[test]
    fn test_check_out_conflict_status_alone_does_not_proceed() {
        for (status, msg) in [(409, "Ticket belongs to wrong event"), (400, "Invalid ticket code")] {
            assert_eq!(
                classify(ScanMode::CheckOut, &rejected(status, msg)),
                Classification::Error(ErrorKind::InvalidTicket),
                "{msg}"
            );
        }
    }

    #[test]
    fn test_check_out_unmatched_is_invalid() {
        assert_eq!(
            classify(ScanMode::CheckOut, &rejected(404, "no such ticket")),
            Classification::Error(ErrorKind::InvalidTicket)
        );
    }

    #[test]
    fn test_classify_is_deterministic() {
        let input = rejected(409, "Ticket already checked in");
        for mode in [ScanMode::CheckIn, ScanMode::CheckOut] {
            let first = classify(mode, &input);
            for _ in 0..10 {
                assert_eq!(classify(mode, &input), first);
            }
        }
    }

    #[test]
    fn test_blocking_kinds() {
        assert!(!ErrorKind::AlreadyScanned.is_blocking());
        assert!(!ErrorKind::NotCheckedIn.is_blocking());
        assert!(ErrorKind::InvalidTicket.is_blocking());
        assert!(ErrorKind::ValidationTimeout.is_blocking());
        assert!(ErrorKind::ValidationNetworkError.is_blocking());
        assert!(ErrorKind::SessionNotReady.is_blocking());
        assert!(ErrorKind::Unknown.is_blocking());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorKind::AlreadyScanned.error_code(), "ALREADY_SCANNED");
        assert_eq!(ErrorKind::Unknown.error_code(), "UNKNOWN");
        assert_eq!(ErrorKind::InvalidTicket.to_string(), "Invalid Ticket");
    }
}
