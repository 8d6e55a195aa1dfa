use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};

use super::*;
use crate::api::{GroupBookingResponse, MessagePayload, ValidationResponse};
use crate::error::ApiError;
use crate::types::{GroupTicket, Purchaser};

const EVENT: &str = "ev-1";

#[derive(Clone)]
enum Validation {
    Respond(ValidationResponse),
    Fail,
    Hang,
}

#[derive(Clone)]
enum Group {
    Single,
    Booking(GroupBookingResponse),
    Fail,
    Hang,
    Delayed(Duration, GroupBookingResponse),
}

struct MockApi {
    validation: Mutex<Validation>,
    group: Mutex<Group>,
    fail_records: AtomicBool,
    validate_calls: AtomicUsize,
    group_calls: AtomicUsize,
    recorded: Mutex<Vec<(ScanMode, String)>>,
}

impl MockApi {
    fn new(validation: Validation) -> Arc<Self> {
        Arc::new(Self {
            validation: Mutex::new(validation),
            group: Mutex::new(Group::Single),
            fail_records: AtomicBool::new(false),
            validate_calls: AtomicUsize::new(0),
            group_calls: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
        })
    }

    fn set_group(&self, group: Group) {
        *self.group.lock().unwrap() = group;
    }

    fn validate_calls(&self) -> usize {
        self.validate_calls.load(Ordering::SeqCst)
    }

    fn group_calls(&self) -> usize {
        self.group_calls.load(Ordering::SeqCst)
    }

    fn recorded(&self) -> Vec<(ScanMode, String)> {
        self.recorded.lock().unwrap().clone()
    }

    fn record(&self, mode: ScanMode, code: &str) -> std::result::Result<(), ApiError> {
        if self.fail_records.load(Ordering::SeqCst) {
            return Err(ApiError::UnexpectedStatus {
                status: 500,
                body: "boom".into(),
            });
        }
        self.recorded.lock().unwrap().push((mode, code.to_string()));
        Ok(())
    }
}

#[async_trait]
impl TicketingApi for MockApi {
    async fn validate_code(
        &self,
        _event_id: &str,
        _code: &str,
    ) -> std::result::Result<ValidationResponse, ApiError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.validation.lock().unwrap().clone();
        match behavior {
            Validation::Respond(resp) => Ok(resp),
            Validation::Fail => Err(ApiError::UnexpectedStatus {
                status: 503,
                body: "unavailable".into(),
            }),
            Validation::Hang => std::future::pending().await,
        }
    }

    async fn fetch_group_booking(
        &self,
        _event_id: &str,
        _code: &str,
        _validation: &ValidationOutcome,
    ) -> std::result::Result<GroupBookingResponse, ApiError> {
        self.group_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.group.lock().unwrap().clone();
        match behavior {
            Group::Single => Ok(GroupBookingResponse::default()),
            Group::Booking(resp) => Ok(resp),
            Group::Fail => Err(ApiError::UnexpectedStatus {
                status: 500,
                body: String::new(),
            }),
            Group::Hang => std::future::pending().await,
            Group::Delayed(after, resp) => {
                sleep(after).await;
                Ok(resp)
            }
        }
    }

    async fn record_check_in(&self, _event_id: &str, code: &str) -> std::result::Result<(), ApiError> {
        self.record(ScanMode::CheckIn, code)
    }

    async fn record_check_out(&self, _event_id: &str, code: &str) -> std::result::Result<(), ApiError> {
        self.record(ScanMode::CheckOut, code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SinkEvent {
    Single(SingleTicket, ScanMode),
    Group(GroupSelection),
    Info(InfoNotice),
    Blocking(ErrorKind, String),
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    fail_handoffs: AtomicBool,
}

impl RecordingSink {
    fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: SinkEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl ScanOutcomeSink for RecordingSink {
    fn on_single_resolved(&self, ticket: &SingleTicket, mode: ScanMode) -> anyhow::Result<()> {
        if self.fail_handoffs.load(Ordering::SeqCst) {
            anyhow::bail!("ticket screen unavailable");
        }
        self.push(SinkEvent::Single(ticket.clone(), mode));
        Ok(())
    }

    fn on_group_resolved(&self, selection: &GroupSelection) -> anyhow::Result<()> {
        self.push(SinkEvent::Group(selection.clone()));
        Ok(())
    }

    fn on_info(&self, notice: &InfoNotice) -> anyhow::Result<()> {
        self.push(SinkEvent::Info(notice.clone()));
        Ok(())
    }

    fn on_blocking_error(&self, kind: ErrorKind, message: &str) -> anyhow::Result<()> {
        self.push(SinkEvent::Blocking(kind, message.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingFeedback {
    cues: Mutex<Vec<FeedbackCue>>,
}

impl FeedbackSink for RecordingFeedback {
    fn cue(&self, cue: FeedbackCue) {
        self.cues.lock().unwrap().push(cue);
    }
}

struct Harness {
    api: Arc<MockApi>,
    sink: Arc<RecordingSink>,
    feedback: Arc<RecordingFeedback>,
    orchestrator: ScanOrchestrator,
}

fn harness(mode: ScanMode, validation: Validation) -> Harness {
    let api = MockApi::new(validation);
    let sink = Arc::new(RecordingSink::default());
    let feedback = Arc::new(RecordingFeedback::default());
    let orchestrator = ScanOrchestrator::builder(api.clone(), sink.clone())
        .feedback(feedback.clone())
        .mode(mode)
        .event_id(EVENT)
        .build();
    Harness {
        api,
        sink,
        feedback,
        orchestrator,
    }
}

fn valid(checked_in: bool) -> Validation {
    Validation::Respond(ValidationResponse {
        error: false,
        status: Some(200),
        msg: Some(MessagePayload::Detailed {
            message: Some("OK".into()),
            info: Some(TicketInfo {
                id: Some("1".into()),
                name: Some("Ada Lovelace".into()),
                ticket_type: Some("General".into()),
                checked_in,
                ..TicketInfo::default()
            }),
        }),
        info: None,
    })
}

fn rejected(status: u16, message: &str) -> Validation {
    Validation::Respond(ValidationResponse {
        error: true,
        status: Some(status),
        msg: Some(MessagePayload::Text(message.into())),
        info: None,
    })
}

fn booking(states: &[bool]) -> GroupBookingResponse {
    GroupBookingResponse {
        error: false,
        purchaser: Some(Purchaser {
            email: "jane@example.com".into(),
            name: "Jane Doe".into(),
            booking_id: "B-100".into(),
        }),
        tickets: states
            .iter()
            .enumerate()
            .map(|(i, &is_checked_in)| GroupTicket {
                id: format!("{}", i + 1),
                name: format!("Guest {}", i + 1),
                email: format!("guest{}@example.com", i + 1),
                ticket_type: "General".into(),
                ticket_identifier: format!("T-{}", i + 1),
                is_checked_in,
                qr_code: format!("QR-{}", i + 1),
            })
            .collect(),
    }
}

const fn handled(resolution: ScanResolution) -> ScanDisposition {
    ScanDisposition::Handled(resolution)
}

// ---------------------------------------------------------------------------
// Single tickets
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_valid_check_in_hands_off_single_ticket() {
    let h = harness(ScanMode::CheckIn, valid(false));

    let disposition = h.orchestrator.on_scan_event("ABC123").await;

    assert_eq!(disposition, handled(ScanResolution::SingleHandoff { lenient: false }));
    let events = h.sink.events();
    assert_eq!(events.len(), 1);
    let SinkEvent::Single(ticket, mode) = &events[0] else {
        panic!("expected single hand-off, got {events:?}");
    };
    assert_eq!(ticket.code, "ABC123");
    assert!(!ticket.info.checked_in);
    assert_eq!(*mode, ScanMode::CheckIn);

    let status = h.orchestrator.status();
    assert_eq!(status.phase, ScanPhase::SinglePending);
    assert!(!status.scanning_enabled);
    assert!(!status.failsafe_armed);
    assert_eq!(h.api.group_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_completed_handoff_records_and_resumes() {
    let h = harness(ScanMode::CheckIn, valid(false));
    h.orchestrator.on_scan_event("ABC123").await;

    assert!(h.orchestrator.complete_handoff(&["ABC123"]));
    assert!(h.orchestrator.is_scanning_enabled());
    assert_eq!(h.orchestrator.phase(), ScanPhase::Idle);

    sleep(Duration::from_millis(10)).await;
    assert_eq!(h.api.recorded(), vec![(ScanMode::CheckIn, "ABC123".to_string())]);

    // nothing pending any more
    assert!(!h.orchestrator.complete_handoff(&["ABC123"]));
    assert!(!h.orchestrator.cancel_handoff());
}

#[tokio::test(start_paused = true)]
async fn test_record_failure_is_not_surfaced() {
    let h = harness(ScanMode::CheckOut, rejected(409, "Ticket already checked in"));
    h.api.fail_records.store(true, Ordering::SeqCst);
    h.orchestrator.on_scan_event("ABC123").await;

    assert!(h.orchestrator.complete_handoff(&["ABC123"]));
    sleep(Duration::from_millis(10)).await;

    assert!(h.api.recorded().is_empty());
    assert_eq!(h.sink.events().len(), 1);
    assert!(h.orchestrator.is_scanning_enabled());
}

#[tokio::test(start_paused = true)]
async fn test_check_out_of_checked_in_ticket_proceeds() {
    let h = harness(ScanMode::CheckOut, rejected(409, "Ticket already checked in"));

    let disposition = h.orchestrator.on_scan_event("ABC123").await;

    assert_eq!(disposition, handled(ScanResolution::SingleHandoff { lenient: true }));
    let events = h.sink.events();
    let SinkEvent::Single(ticket, mode) = &events[0] else {
        panic!("expected single hand-off, got {events:?}");
    };
    assert!(ticket.lenient);
    assert_eq!(ticket.info.qr_code.as_deref(), Some("ABC123"));
    assert_eq!(*mode, ScanMode::CheckOut);

    h.orchestrator.complete_handoff(&["ABC123"]);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(h.api.recorded(), vec![(ScanMode::CheckOut, "ABC123".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn test_check_out_conflict_for_wrong_event_is_blocking() {
    let h = harness(ScanMode::CheckOut, rejected(409, "Ticket belongs to wrong event"));
    let disposition = h.orchestrator.on_scan_event("ABC123").await;
    assert_eq!(disposition, handled(ScanResolution::Blocked(ErrorKind::InvalidTicket)));
    assert!(!h.orchestrator.complete_handoff(&["ABC123"]));
    assert!(h.api.recorded().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unclassified_check_in_rejection_proceeds() {
    let h = harness(ScanMode::CheckIn, rejected(500, "seat map unavailable"));
    let disposition = h.orchestrator.on_scan_event("ABC123").await;
    assert_eq!(disposition, handled(ScanResolution::SingleHandoff { lenient: true }));
}

#[tokio::test(start_paused = true)]
async fn test_group_lookup_failure_continues_as_single() {
    let h = harness(ScanMode::CheckIn, valid(false));
    h.api.set_group(Group::Fail);
    let disposition = h.orchestrator.on_scan_event("ABC123").await;
    assert_eq!(disposition, handled(ScanResolution::SingleHandoff { lenient: false }));
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_repeat_within_window_skips_validation() {
    let h = harness(ScanMode::CheckIn, valid(false));
    h.orchestrator.on_scan_event("ABC123").await;
    h.orchestrator.cancel_handoff();

    sleep(Duration::from_millis(1000)).await;
    let disposition = h.orchestrator.on_scan_event("ABC123").await;

    assert_eq!(disposition, ScanDisposition::Ignored(IgnoreReason::Duplicate));
    assert_eq!(h.api.validate_calls(), 1);
    assert!(h.orchestrator.is_scanning_enabled());
}

#[tokio::test(start_paused = true)]
async fn test_repeat_after_window_is_processed() {
    let h = harness(ScanMode::CheckIn, valid(false));
    h.orchestrator.on_scan_event("ABC123").await;
    h.orchestrator.cancel_handoff();

    sleep(Duration::from_millis(3000)).await;
    let disposition = h.orchestrator.on_scan_event("ABC123").await;

    assert!(matches!(disposition, ScanDisposition::Handled(_)));
    assert_eq!(h.api.validate_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_mode_change_allows_immediate_repeat() {
    let h = harness(ScanMode::CheckIn, valid(true));
    h.orchestrator.on_scan_event("ABC123").await;
    h.orchestrator.cancel_handoff();

    h.orchestrator.on_mode_change(ScanMode::CheckOut);
    let disposition = h.orchestrator.on_scan_event("ABC123").await;

    assert_eq!(disposition, handled(ScanResolution::SingleHandoff { lenient: false }));
    assert_eq!(h.api.validate_calls(), 2);
    assert_eq!(h.orchestrator.mode(), ScanMode::CheckOut);
    let events = h.sink.events();
    assert!(matches!(events[1], SinkEvent::Single(_, ScanMode::CheckOut)));
}

#[tokio::test(start_paused = true)]
async fn test_scans_are_ignored_while_paused() {
    let h = harness(ScanMode::CheckIn, valid(false));
    h.orchestrator.on_scan_event("ABC123").await;

    let disposition = h.orchestrator.on_scan_event("OTHER").await;

    assert_eq!(disposition, ScanDisposition::Ignored(IgnoreReason::ScanningPaused));
    assert_eq!(h.api.validate_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_blank_code_is_ignored() {
    let h = harness(ScanMode::CheckIn, valid(false));
    assert_eq!(
        h.orchestrator.on_scan_event("   ").await,
        ScanDisposition::Ignored(IgnoreReason::EmptyCode)
    );
    assert_eq!(h.orchestrator.status().last_code, None);
    assert_eq!(h.api.validate_calls(), 0);
}

// ---------------------------------------------------------------------------
// Errors and acknowledgment
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_validation_timeout_blocks_until_failsafe() {
    let h = harness(ScanMode::CheckIn, Validation::Hang);
    let started = Instant::now();

    let disposition = h.orchestrator.on_scan_event("XYZ").await;

    assert_eq!(disposition, handled(ScanResolution::Blocked(ErrorKind::ValidationTimeout)));
    assert!(started.elapsed() >= Duration::from_millis(5000));
    assert!(!h.orchestrator.is_scanning_enabled());
    assert_eq!(h.orchestrator.phase(), ScanPhase::AwaitingAcknowledgment);
    assert!(h.orchestrator.status().failsafe_armed);

    sleep(Duration::from_millis(2000)).await;
    assert!(!h.orchestrator.is_scanning_enabled());

    sleep(Duration::from_millis(1100)).await;
    assert!(h.orchestrator.is_scanning_enabled());
    assert_eq!(h.orchestrator.phase(), ScanPhase::Idle);
    assert!(!h.orchestrator.status().failsafe_armed);
}

#[tokio::test(start_paused = true)]
async fn test_acknowledge_resumes_and_cancels_failsafe() {
    let h = harness(ScanMode::CheckIn, rejected(404, "Ticket not found"));

    let disposition = h.orchestrator.on_scan_event("NOPE").await;
    assert_eq!(disposition, handled(ScanResolution::Blocked(ErrorKind::InvalidTicket)));
    assert_eq!(
        h.sink.events(),
        vec![SinkEvent::Blocking(ErrorKind::InvalidTicket, "Ticket not found".into())]
    );

    assert!(h.orchestrator.acknowledge());
    assert!(h.orchestrator.is_scanning_enabled());
    assert!(!h.orchestrator.acknowledge());

    // a later scan must not be disturbed by the cancelled fail-safe
    sleep(Duration::from_millis(5000)).await;
    h.api.set_group(Group::Hang);
    let orchestrator = h.orchestrator.clone();
    let pending = tokio::spawn(async move { orchestrator.on_scan_event("SECOND").await });
    sleep(Duration::from_millis(4000)).await;
    assert!(!h.orchestrator.is_scanning_enabled());
    assert_eq!(h.orchestrator.phase(), ScanPhase::Validating);
    pending.abort();
}

#[tokio::test(start_paused = true)]
async fn test_network_failure_is_blocking() {
    let h = harness(ScanMode::CheckIn, Validation::Fail);
    let disposition = h.orchestrator.on_scan_event("ABC123").await;
    assert_eq!(
        disposition,
        handled(ScanResolution::Blocked(ErrorKind::ValidationNetworkError))
    );
    let events = h.sink.events();
    let SinkEvent::Blocking(_, message) = &events[0] else {
        panic!("expected blocking error, got {events:?}");
    };
    assert!(message.contains("503"));
}

#[tokio::test(start_paused = true)]
async fn test_missing_event_is_blocking_but_resumes_immediately() {
    let h = harness(ScanMode::CheckIn, valid(false));
    h.orchestrator.set_event("");

    let disposition = h.orchestrator.on_scan_event("ABC123").await;

    assert_eq!(disposition, handled(ScanResolution::Blocked(ErrorKind::SessionNotReady)));
    assert_eq!(h.api.validate_calls(), 0);
    assert_eq!(h.api.group_calls(), 0);
    assert!(h.orchestrator.is_scanning_enabled());
    assert_eq!(h.orchestrator.phase(), ScanPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_initializing_session_is_not_ready() {
    let h = harness(ScanMode::CheckIn, valid(false));
    h.orchestrator.set_initializing(true);

    let disposition = h.orchestrator.on_scan_event("ABC123").await;
    assert_eq!(disposition, handled(ScanResolution::Blocked(ErrorKind::SessionNotReady)));
    assert_eq!(h.api.validate_calls(), 0);
    assert_eq!(h.api.group_calls(), 0);
    assert!(h.orchestrator.is_scanning_enabled());
    let status = h.orchestrator.status();
    assert!(!status.failsafe_armed);
    assert!(!status.auto_resume_armed);
    let events = h.sink.events();
    let [SinkEvent::Blocking(ErrorKind::SessionNotReady, message)] = events.as_slice() else {
        panic!("expected one not-ready error, got {events:?}");
    };
    assert!(message.contains("starting up"));

    h.orchestrator.set_initializing(false);
    sleep(Duration::from_millis(3000)).await;
    let disposition = h.orchestrator.on_scan_event("ABC123").await;
    assert_eq!(disposition, handled(ScanResolution::SingleHandoff { lenient: false }));
}

#[tokio::test(start_paused = true)]
async fn test_sink_failure_is_unknown_and_force_resumes() {
    let h = harness(ScanMode::CheckIn, valid(false));
    h.sink.fail_handoffs.store(true, Ordering::SeqCst);

    let disposition = h.orchestrator.on_scan_event("ABC123").await;

    assert_eq!(disposition, handled(ScanResolution::Blocked(ErrorKind::Unknown)));
    assert!(h.orchestrator.is_scanning_enabled());
    assert_eq!(h.orchestrator.phase(), ScanPhase::Idle);
    let events = h.sink.events();
    let SinkEvent::Blocking(ErrorKind::Unknown, message) = &events[0] else {
        panic!("expected unknown error, got {events:?}");
    };
    assert!(message.contains("ticket screen unavailable"));
}

// ---------------------------------------------------------------------------
// Informational outcomes
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_already_checked_in_informs_and_auto_resumes() {
    let h = harness(
        ScanMode::CheckIn,
        Validation::Respond(ValidationResponse {
            error: true,
            status: Some(409),
            msg: Some(MessagePayload::Detailed {
                message: Some("Ticket already checked in".into()),
                info: Some(TicketInfo {
                    name: Some("Ada Lovelace".into()),
                    ticket_type: Some("VIP".into()),
                    checked_in: true,
                    checked_in_at: Some("2025-03-01 18:30:00".into()),
                    ..TicketInfo::default()
                }),
            }),
            info: None,
        }),
    );

    let disposition = h.orchestrator.on_scan_event("ABC123").await;

    assert_eq!(disposition, handled(ScanResolution::Informed(ErrorKind::AlreadyScanned)));
    let events = h.sink.events();
    let SinkEvent::Info(notice) = &events[0] else {
        panic!("expected info, got {events:?}");
    };
    assert_eq!(notice.guest_name.as_deref(), Some("Ada Lovelace"));
    assert_eq!(notice.ticket_type.as_deref(), Some("VIP"));
    assert_eq!(notice.checked_in_at.as_deref(), Some("2025-03-01 18:30:00"));

    assert_eq!(h.orchestrator.phase(), ScanPhase::ShowingInfo);
    assert!(h.orchestrator.status().auto_resume_armed);
    assert!(!h.orchestrator.status().failsafe_armed);

    sleep(Duration::from_millis(2900)).await;
    assert!(!h.orchestrator.is_scanning_enabled());
    sleep(Duration::from_millis(200)).await;
    assert!(h.orchestrator.is_scanning_enabled());
    assert_eq!(h.orchestrator.phase(), ScanPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_acknowledged_info_cancels_auto_resume() {
    let h = harness(ScanMode::CheckOut, rejected(409, "Guest not checked in"));

    let disposition = h.orchestrator.on_scan_event("ABC123").await;
    assert_eq!(disposition, handled(ScanResolution::Informed(ErrorKind::NotCheckedIn)));

    assert!(h.orchestrator.acknowledge());
    assert!(!h.orchestrator.status().auto_resume_armed);

    // the next run must not be resumed by the old auto-resume timer
    h.api.set_group(Group::Hang);
    let orchestrator = h.orchestrator.clone();
    let pending = tokio::spawn(async move { orchestrator.on_scan_event("OTHER").await });
    sleep(Duration::from_millis(3500)).await;
    assert!(!h.orchestrator.is_scanning_enabled());
    pending.abort();
}

// ---------------------------------------------------------------------------
// Group bookings
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_group_check_in_offers_unchecked_tickets() {
    let h = harness(ScanMode::CheckIn, valid(false));
    h.api.set_group(Group::Booking(booking(&[true, false, true, false])));

    let disposition = h.orchestrator.on_scan_event("QR-2").await;

    assert_eq!(disposition, handled(ScanResolution::GroupHandoff { relevant: 2 }));
    let events = h.sink.events();
    let SinkEvent::Group(selection) = &events[0] else {
        panic!("expected group hand-off, got {events:?}");
    };
    assert_eq!(selection.purchaser.name, "Jane Doe");
    assert_eq!(selection.tickets.len(), 2);
    assert!(selection.tickets.iter().all(|t| !t.is_checked_in));
    assert_eq!(selection.scanned_ticket_id.as_deref(), Some("2"));
    assert_eq!(h.orchestrator.phase(), ScanPhase::GroupPending);
    assert!(!h.orchestrator.is_scanning_enabled());

    // selection stays open beyond the fail-safe
    sleep(Duration::from_millis(9000)).await;
    assert_eq!(h.orchestrator.phase(), ScanPhase::GroupPending);

    assert!(h.orchestrator.complete_handoff(&["QR-2", "QR-4"]));
    sleep(Duration::from_millis(10)).await;
    let mut recorded = h.api.recorded();
    recorded.sort_by(|a, b| a.1.cmp(&b.1));
    assert_eq!(
        recorded,
        vec![
            (ScanMode::CheckIn, "QR-2".to_string()),
            (ScanMode::CheckIn, "QR-4".to_string()),
        ]
    );
    assert!(h.orchestrator.is_scanning_enabled());
}

#[tokio::test(start_paused = true)]
async fn test_group_check_out_with_nothing_checked_in() {
    let h = harness(ScanMode::CheckOut, rejected(409, "Guest not checked in"));
    h.api.set_group(Group::Booking(booking(&[false, false, false])));

    let disposition = h.orchestrator.on_scan_event("QR-1").await;

    assert_eq!(disposition, handled(ScanResolution::Informed(ErrorKind::NotCheckedIn)));
    let events = h.sink.events();
    let SinkEvent::Info(notice) = &events[0] else {
        panic!("expected info, got {events:?}");
    };
    assert_eq!(notice.headline, "Nothing To Check Out");
    assert_eq!(notice.guest_name.as_deref(), Some("Jane Doe"));

    sleep(Duration::from_millis(3100)).await;
    assert!(h.orchestrator.is_scanning_enabled());
}

#[tokio::test(start_paused = true)]
async fn test_group_check_in_all_done() {
    let h = harness(ScanMode::CheckIn, valid(true));
    h.api.set_group(Group::Booking(booking(&[true, true])));

    let disposition = h.orchestrator.on_scan_event("QR-1").await;

    assert_eq!(disposition, handled(ScanResolution::Informed(ErrorKind::AlreadyScanned)));
    let events = h.sink.events();
    assert!(matches!(
        &events[0],
        SinkEvent::Info(notice) if notice.headline == "All Tickets Already Checked In"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_group_is_resolved_even_when_validation_fails() {
    let h = harness(ScanMode::CheckIn, Validation::Hang);
    h.api.set_group(Group::Booking(booking(&[false, false])));

    let disposition = h.orchestrator.on_scan_event("QR-1").await;

    assert_eq!(disposition, handled(ScanResolution::GroupHandoff { relevant: 2 }));
    assert_eq!(h.api.group_calls(), 1);
}

// ---------------------------------------------------------------------------
// Liveness and stale results
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_failsafe_resumes_when_pipeline_hangs() {
    let h = harness(ScanMode::CheckIn, valid(false));
    h.api.set_group(Group::Hang);

    let orchestrator = h.orchestrator.clone();
    let pending = tokio::spawn(async move { orchestrator.on_scan_event("ABC123").await });

    sleep(Duration::from_millis(7900)).await;
    assert!(!h.orchestrator.is_scanning_enabled());
    assert_eq!(h.orchestrator.phase(), ScanPhase::Validating);

    sleep(Duration::from_millis(200)).await;
    assert!(h.orchestrator.is_scanning_enabled());
    assert_eq!(h.orchestrator.phase(), ScanPhase::Idle);
    assert!(h.sink.events().is_empty());
    pending.abort();
}

#[tokio::test(start_paused = true)]
async fn test_late_result_after_failsafe_is_discarded() {
    let h = harness(ScanMode::CheckIn, valid(false));
    h.api.set_group(Group::Delayed(
        Duration::from_millis(10_000),
        booking(&[false, false]),
    ));

    let disposition = h.orchestrator.on_scan_event("QR-1").await;

    assert_eq!(disposition, handled(ScanResolution::Stale));
    assert!(h.sink.events().is_empty());
    assert!(h.feedback.cues.lock().unwrap().is_empty());
    assert!(h.orchestrator.is_scanning_enabled());
    assert_eq!(h.orchestrator.phase(), ScanPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_refocus_invalidates_in_flight_scan() {
    let h = harness(ScanMode::CheckIn, valid(false));
    h.api.set_group(Group::Delayed(Duration::from_millis(1000), booking(&[false, false])));

    let orchestrator = h.orchestrator.clone();
    let pending = tokio::spawn(async move { orchestrator.on_scan_event("QR-1").await });
    sleep(Duration::from_millis(100)).await;

    h.orchestrator.resume_scanning();
    assert!(h.orchestrator.is_scanning_enabled());

    assert_eq!(pending.await.unwrap(), handled(ScanResolution::Stale));
    assert!(h.sink.events().is_empty());
    assert_eq!(h.orchestrator.phase(), ScanPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_scan_resumes_scanning() {
    let h = harness(ScanMode::CheckIn, Validation::Hang);

    let orchestrator = h.orchestrator.clone();
    let pending = tokio::spawn(async move { orchestrator.on_scan_event("ABC123").await });
    sleep(Duration::from_millis(1000)).await;
    assert!(!h.orchestrator.is_scanning_enabled());

    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());

    assert!(h.orchestrator.is_scanning_enabled());
    assert_eq!(h.orchestrator.phase(), ScanPhase::Idle);
    assert!(!h.orchestrator.status().failsafe_armed);
}

// ---------------------------------------------------------------------------
// Observability of the scanning flag
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_scanning_watch_follows_flag() {
    let h = harness(ScanMode::CheckIn, valid(false));
    let mut scanning = h.orchestrator.scanning();
    assert!(*scanning.borrow_and_update());

    h.orchestrator.on_scan_event("ABC123").await;
    assert!(scanning.has_changed().unwrap());
    assert!(!*scanning.borrow_and_update());

    h.orchestrator.complete_handoff::<&str>(&[]);
    assert!(scanning.has_changed().unwrap());
    assert!(*scanning.borrow_and_update());
}

#[tokio::test(start_paused = true)]
async fn test_feedback_cues_match_outcomes() {
    let h = harness(ScanMode::CheckIn, valid(false));
    h.orchestrator.on_scan_event("ABC123").await;
    h.orchestrator.cancel_handoff();

    *h.api.validation.lock().unwrap() = rejected(404, "invalid");
    h.orchestrator.on_scan_event("BAD").await;
    h.orchestrator.acknowledge();

    *h.api.validation.lock().unwrap() = rejected(409, "already scanned");
    h.orchestrator.on_scan_event("DUP").await;

    assert_eq!(
        *h.feedback.cues.lock().unwrap(),
        vec![FeedbackCue::Success, FeedbackCue::Error, FeedbackCue::Info]
    );
}

#[tokio::test(start_paused = true)]
async fn test_builder_applies_scanner_config() {
    let api = MockApi::new(valid(false));
    let sink = Arc::new(RecordingSink::default());
    let config = ScannerConfig {
        event_id: Some("gala".into()),
        mode: ScanMode::CheckOut,
        dedup_window_ms: 500,
        ..ScannerConfig::default()
    };
    let orchestrator = ScanOrchestrator::builder(api, sink).config(&config).build();

    let status = orchestrator.status();
    assert_eq!(status.mode, ScanMode::CheckOut);
    assert_eq!(status.event_id, "gala");

    orchestrator.on_scan_event("A").await;
    orchestrator.cancel_handoff();
    sleep(Duration::from_millis(500)).await;
    assert!(matches!(
        orchestrator.on_scan_event("A").await,
        ScanDisposition::Handled(_)
    ));
}
