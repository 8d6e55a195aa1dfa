//! Terminal rendering of scan outcomes and parsing of operator commands.

use std::fmt::Write as _;
use std::sync::{Mutex, PoisonError};

use chrono::Local;
use scanpoint_core::{
    ErrorKind, FeedbackCue, FeedbackSink, GroupSelection, InfoNotice, ScanMode, ScanOutcomeSink,
    SingleTicket, TicketInfo,
};

/// One line of operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A decoded code.
    Scan(String),
    /// Switch between check-in and check-out.
    Mode(ScanMode),
    /// Switch to the other mode.
    ToggleMode,
    /// Select the event scans are validated against.
    Event(String),
    /// Dismiss the notice or error on screen.
    Ack,
    /// Confirm the pending hand-off. Empty means everything that was offered.
    Done(Vec<String>),
    /// Abandon the pending hand-off.
    Cancel,
    /// Force scanning back on.
    Resume,
    /// Print the session state.
    Status,
    /// Print the effective configuration.
    Config,
    /// Print the command list.
    Help,
    /// Leave.
    Quit,
}

/// Help text for [`Command::Help`].
pub const HELP: &str = "\
Type or pipe codes, one per line. Commands:
  :mode checkin|checkout   switch scan mode
  :toggle                  switch to the other mode
  :event <id>              select the event
  :ack                     dismiss the notice or error on screen
  :done [code,...]         confirm the pending hand-off (default: all offered)
  :cancel                  abandon the pending hand-off
  :resume                  force scanning back on
  :status                  show the session state
  :config                  show the effective configuration
  :quit                    exit";

/// Parses one input line. Blank lines yield `None`.
///
/// # Errors
///
/// Returns a message for unknown commands and malformed arguments.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(command) = line.strip_prefix(':') else {
        return Ok(Some(Command::Scan(line.to_string())));
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(name, rest)| (name, rest.trim()));

    let parsed = match name.to_ascii_lowercase().as_str() {
        "mode" | "m" => Command::Mode(rest.parse()?),
        "toggle" | "t" => Command::ToggleMode,
        "event" | "e" => {
            if rest.is_empty() {
                return Err(":event needs an event id".to_string());
            }
            Command::Event(rest.to_string())
        }
        "ack" | "ok" => Command::Ack,
        "done" | "d" => Command::Done(
            rest.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|code| !code.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        "cancel" | "c" => Command::Cancel,
        "resume" | "r" => Command::Resume,
        "status" | "s" => Command::Status,
        "config" => Command::Config,
        "help" | "h" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        other => return Err(format!("unknown command ':{other}', try :help")),
    };
    Ok(Some(parsed))
}

/// Prints outcomes to stdout and remembers what a hand-off offered so `:done`
/// can confirm it without retyping codes.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    offered: Mutex<Vec<String>>,
}

impl ConsoleSink {
    /// Creates a sink with nothing offered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the codes offered by the last hand-off.
    pub fn take_offered(&self) -> Vec<String> {
        std::mem::take(&mut *self.offered.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn offer(&self, codes: Vec<String>) {
        *self.offered.lock().unwrap_or_else(PoisonError::into_inner) = codes;
    }
}

impl ScanOutcomeSink for ConsoleSink {
    fn on_single_resolved(&self, ticket: &SingleTicket, mode: ScanMode) -> anyhow::Result<()> {
        self.offer(vec![ticket.code.clone()]);
        println!("{}", describe_single(ticket, mode));
        Ok(())
    }

    fn on_group_resolved(&self, selection: &GroupSelection) -> anyhow::Result<()> {
        self.offer(
            selection
                .tickets
                .iter()
                .map(|t| {
                    if t.qr_code.is_empty() {
                        t.ticket_identifier.clone()
                    } else {
                        t.qr_code.clone()
                    }
                })
                .collect(),
        );
        println!("{}", describe_group(selection));
        Ok(())
    }

    fn on_info(&self, notice: &InfoNotice) -> anyhow::Result<()> {
        println!("{}", describe_info(notice));
        Ok(())
    }

    fn on_blocking_error(&self, kind: ErrorKind, message: &str) -> anyhow::Result<()> {
        self.offer(Vec::new());
        println!("!! {}: {message}\n   (:ack to continue)", kind.title());
        Ok(())
    }
}

/// Rings the terminal bell on errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleFeedback;

impl FeedbackSink for ConsoleFeedback {
    fn cue(&self, cue: FeedbackCue) {
        if cue == FeedbackCue::Error {
            eprint!("\x07");
        }
    }
}

/// One-line summary of a ticket ready for action.
#[must_use]
pub fn describe_single(ticket: &SingleTicket, mode: ScanMode) -> String {
    let verb = match mode {
        ScanMode::CheckIn => "CHECK IN",
        ScanMode::CheckOut => "CHECK OUT",
    };
    let mut line = format!("{verb} {}", ticket.code);
    if let Some(name) = &ticket.info.name {
        let _ = write!(line, "  {name}");
    }
    if let Some(kind) = &ticket.info.ticket_type {
        let _ = write!(line, " ({kind})");
    }
    if ticket.info.checked_in {
        let _ = write!(line, "  checked in{}", checked_in_suffix(&ticket.info));
    }
    if ticket.lenient {
        line.push_str("  [backend warning ignored]");
    }
    line.push_str("\n   (:done to confirm, :cancel to abort)");
    line
}

/// Multi-line listing of the tickets offered for a booking.
#[must_use]
pub fn describe_group(selection: &GroupSelection) -> String {
    let action = match selection.mode {
        ScanMode::CheckIn => "check in",
        ScanMode::CheckOut => "check out",
    };
    let mut text = format!(
        "GROUP {} (booking {}): {} of {} tickets to {action}",
        selection.purchaser.name,
        selection.purchaser.booking_id,
        selection.tickets.len(),
        selection.booking_size,
    );
    for (i, ticket) in selection.tickets.iter().enumerate() {
        let _ = write!(
            text,
            "\n  {}. [{}] {} ({}) {}",
            i + 1,
            ticket.ticket_identifier,
            ticket.name,
            ticket.ticket_type,
            ticket.qr_code,
        );
        if selection.scanned_ticket_id.as_deref() == Some(ticket.id.as_str()) {
            text.push_str("  <- scanned");
        }
    }
    text.push_str("\n   (:done [codes] to confirm, :cancel to abort)");
    text
}

/// One-line informational notice.
#[must_use]
pub fn describe_info(notice: &InfoNotice) -> String {
    let mut line = format!("-- {}", notice.headline);
    if let Some(name) = &notice.guest_name {
        let _ = write!(line, ": {name}");
    }
    if let Some(kind) = &notice.ticket_type {
        let _ = write!(line, " ({kind})");
    }
    if let Some(raw) = &notice.checked_in_at {
        let info = TicketInfo {
            checked_in_at: Some(raw.clone()),
            ..TicketInfo::default()
        };
        line.push_str(&checked_in_suffix(&info));
    }
    line
}

fn checked_in_suffix(info: &TicketInfo) -> String {
    match (info.checked_in_at_utc(), &info.checked_in_at) {
        (Some(at), _) => format!(" at {}", at.with_timezone(&Local).format("%H:%M")),
        (None, Some(raw)) if !raw.trim().is_empty() => format!(" at {raw}"),
        _ => String::new(),
    }
}
