//! The scan state machine.
//!
//! [`ScanOrchestrator`] takes every decoded code from the camera and turns it
//! into exactly one outcome: a single-ticket hand-off, a group hand-off, an
//! informational notice, or a blocking error.
//!
//! ```text
//! Idle --scan--> (gate) --pass--> Validating --+--> GroupPending ----------+
//!                                              +--> SinglePending ---------+--> Idle
//!                                              +--> ShowingInfo -----------+
//!                                              +--> AwaitingAcknowledgment-+
//! ```
//!
//! Scanning is switched off for the whole time between gate acceptance and
//! resolution, and it always comes back through at least one of: a completed
//! hand-off, an acknowledgment, the auto-resume timer after a notice, or the
//! fail-safe timer armed when the code was accepted.
//!
//! Network results can arrive after the fail-safe has already reset the
//! session. Every run captures the session generation when it starts and
//! drops its results if the generation has moved on.

mod session;

#[cfg(test)]
mod tests;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::api::TicketingApi;
use crate::classify::{classify, Classification, ErrorKind};
use crate::config::{ScanTimings, ScannerConfig};
use crate::error::{Result, ScanError};
use crate::gate::ScanGate;
use crate::group::{GroupResolution, GroupResolver, GroupSelection, SettledGroup};
use crate::sink::{FeedbackCue, FeedbackSink, InfoNotice, NoFeedback, ScanOutcomeSink, SingleTicket};
use crate::types::{ScanEvent, ScanMode, TicketInfo};
use crate::validation::{ValidationClient, ValidationOutcome};

use session::{Handoff, ScanSession, TimerHandle, TimerKind};
pub use session::{ScanPhase, SessionStatus};

/// Why a scan did not enter the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The code was empty after trimming.
    EmptyCode,
    /// Scanning is switched off while another scan is being handled.
    ScanningPaused,
    /// The same code was accepted moments ago.
    Duplicate,
}

/// How an accepted scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanResolution {
    /// Handed to the single-ticket action flow.
    SingleHandoff {
        /// The backend rejected the code but the rejection was tolerated.
        lenient: bool,
    },
    /// Handed to the group selection surface.
    GroupHandoff {
        /// Number of relevant tickets offered.
        relevant: usize,
    },
    /// An informational notice was shown; scanning resumes by itself.
    Informed(ErrorKind),
    /// A blocking error was shown.
    Blocked(ErrorKind),
    /// The session was reset while the scan was in flight; the result was
    /// discarded.
    Stale,
}

/// What happened to a scan event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDisposition {
    /// The event never entered the pipeline.
    Ignored(IgnoreReason),
    /// The event was processed.
    Handled(ScanResolution),
}

/// One accepted scan on its way through the pipeline.
#[derive(Debug, Clone)]
struct Run {
    generation: u64,
    mode: ScanMode,
    event_id: String,
    initializing: bool,
    code: String,
}

/// Builder for [`ScanOrchestrator`].
pub struct ScanOrchestratorBuilder {
    api: Arc<dyn TicketingApi>,
    sink: Arc<dyn ScanOutcomeSink>,
    feedback: Arc<dyn FeedbackSink>,
    timings: ScanTimings,
    mode: ScanMode,
    event_id: String,
}

impl std::fmt::Debug for ScanOrchestratorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanOrchestratorBuilder")
            .field("timings", &self.timings)
            .field("mode", &self.mode)
            .field("event_id", &self.event_id)
            .finish_non_exhaustive()
    }
}

impl ScanOrchestratorBuilder {
    /// Applies mode, event and timings from configuration.
    #[must_use]
    pub fn config(mut self, config: &ScannerConfig) -> Self {
        self.timings = config.timings();
        self.mode = config.mode;
        self.event_id = config.event_id.clone().unwrap_or_default();
        self
    }

    /// Sets the timers.
    #[must_use]
    pub const fn timings(mut self, timings: ScanTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Sets the initial mode.
    #[must_use]
    pub const fn mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the event scans are validated against.
    #[must_use]
    pub fn event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }

    /// Sets the audio/haptic collaborator.
    #[must_use]
    pub fn feedback(mut self, feedback: Arc<dyn FeedbackSink>) -> Self {
        self.feedback = feedback;
        self
    }

    /// Builds the orchestrator.
    #[must_use]
    pub fn build(self) -> ScanOrchestrator {
        let session = ScanSession::new(
            self.mode,
            self.event_id,
            ScanGate::new(self.timings.dedup_window),
        );
        let (scanning_tx, _) = watch::channel(session.scanning_enabled);

        ScanOrchestrator {
            inner: Arc::new(Inner {
                session: Mutex::new(session),
                scanning_tx,
                validator: ValidationClient::new(Arc::clone(&self.api), self.timings.validation_timeout),
                groups: GroupResolver::new(Arc::clone(&self.api)),
                api: self.api,
                sink: self.sink,
                feedback: self.feedback,
                timings: self.timings,
            }),
        }
    }
}

/// Sequences gate, validation, group resolution and classification for each
/// scanned code, and owns the scanning-enabled flag.
///
/// Cheap to clone; clones share the same session. Must be used from within a
/// Tokio runtime since timers and check-in recording run as tasks.
#[derive(Clone)]
pub struct ScanOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ScanOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanOrchestrator")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl ScanOrchestrator {
    /// Starts building an orchestrator around the ticketing service and the
    /// outcome collaborator.
    pub fn builder(api: Arc<dyn TicketingApi>, sink: Arc<dyn ScanOutcomeSink>) -> ScanOrchestratorBuilder {
        ScanOrchestratorBuilder {
            api,
            sink,
            feedback: Arc::new(NoFeedback),
            timings: ScanTimings::default(),
            mode: ScanMode::default(),
            event_id: String::new(),
        }
    }

    /// Entry point for every decoded frame.
    pub async fn on_scan_event(&self, code: &str) -> ScanDisposition {
        self.on_scan(ScanEvent::now(code)).await
    }

    /// Processes one scan event end to end.
    ///
    /// Returns once the outcome has been handed to the sink. Timers keep
    /// running afterwards and may resume scanning later.
    pub async fn on_scan(&self, event: ScanEvent) -> ScanDisposition {
        let code = event.code.trim();
        if code.is_empty() {
            return ScanDisposition::Ignored(IgnoreReason::EmptyCode);
        }

        let run = {
            let mut session = self.inner.lock_session();
            if !session.scanning_enabled {
                debug!(code, phase = ?session.phase, "scanning paused, ignoring code");
                return ScanDisposition::Ignored(IgnoreReason::ScanningPaused);
            }
            if !session.gate.accept(code, event.scanned_at) {
                debug!(code, "duplicate scan suppressed");
                return ScanDisposition::Ignored(IgnoreReason::Duplicate);
            }

            session.generation += 1;
            session.cancel_timers();
            session.handoff = None;
            session.phase = ScanPhase::Validating;
            self.inner.set_scanning(&mut session, false);
            let failsafe = self
                .inner
                .spawn_timer(&mut session, TimerKind::Failsafe, self.inner.timings.failsafe);
            session.failsafe = Some(failsafe);

            Run {
                generation: session.generation,
                mode: session.mode,
                event_id: session.event_id.clone(),
                initializing: session.initializing,
                code: code.to_owned(),
            }
        };

        let span = info_span!("scan", generation = run.generation, mode = %run.mode, code = %run.code);
        let guard = ResumeGuard::new(&self.inner, run.generation);
        let resolution = async {
            match self.inner.process(&run).await {
                Ok(resolution) => resolution,
                Err(err) => self.inner.fail_unknown(&run, &err),
            }
        }
        .instrument(span)
        .await;
        guard.disarm();

        ScanDisposition::Handled(resolution)
    }

    /// Switches mode and clears the gate so the last code can be rescanned
    /// immediately under the new mode.
    pub fn on_mode_change(&self, mode: ScanMode) {
        let mut session = self.inner.lock_session();
        session.mode = mode;
        session.gate.clear();
        info!(%mode, "scan mode changed");
    }

    /// Acknowledges the notice or error on screen and resumes scanning.
    ///
    /// Returns `false` if nothing was waiting for acknowledgment.
    pub fn acknowledge(&self) -> bool {
        let mut session = self.inner.lock_session();
        if !session.phase.is_acknowledgeable() {
            return false;
        }
        debug!(phase = ?session.phase, "acknowledged");
        self.inner.resume_locked(&mut session);
        true
    }

    /// Finishes a single-ticket or group hand-off.
    ///
    /// Records a check-in or check-out, in the mode the scan was made in, for
    /// every confirmed code. Recording is fire-and-forget: failures are
    /// logged, not reported. Scanning resumes immediately.
    ///
    /// Returns `false` if no hand-off was pending.
    pub fn complete_handoff<S: AsRef<str>>(&self, codes: &[S]) -> bool {
        let handoff = {
            let mut session = self.inner.lock_session();
            if !session.phase.is_handoff() {
                return false;
            }
            let handoff = session.handoff.take();
            self.inner.resume_locked(&mut session);
            handoff
        };

        match handoff {
            Some(handoff) => {
                for code in codes {
                    self.inner.record(&handoff, code.as_ref());
                }
            }
            None => warn!("hand-off completed without recorded context, nothing recorded"),
        }
        true
    }

    /// Abandons a pending hand-off without recording anything.
    ///
    /// Returns `false` if no hand-off was pending.
    pub fn cancel_handoff(&self) -> bool {
        let mut session = self.inner.lock_session();
        if !session.phase.is_handoff() {
            return false;
        }
        debug!("hand-off cancelled");
        self.inner.resume_locked(&mut session);
        true
    }

    /// Forces the session back to idle with scanning on, e.g. when the scan
    /// screen regains focus. Any run still in flight becomes stale.
    pub fn resume_scanning(&self) {
        let mut session = self.inner.lock_session();
        info!(phase = ?session.phase, "scanning resumed");
        self.inner.resume_locked(&mut session);
    }

    /// Selects the event scans are validated against.
    pub fn set_event(&self, event_id: impl Into<String>) {
        let mut session = self.inner.lock_session();
        session.event_id = event_id.into();
        info!(event_id = %session.event_id, "event selected");
    }

    /// Marks the session as (not) initializing. Scans are refused while set.
    pub fn set_initializing(&self, initializing: bool) {
        self.inner.lock_session().initializing = initializing;
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> ScanMode {
        self.inner.lock_session().mode
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ScanPhase {
        self.inner.lock_session().phase
    }

    /// Whether the camera should currently be emitting codes.
    #[must_use]
    pub fn is_scanning_enabled(&self) -> bool {
        self.inner.lock_session().scanning_enabled
    }

    /// Subscribes to changes of the scanning-enabled flag.
    #[must_use]
    pub fn scanning(&self) -> watch::Receiver<bool> {
        self.inner.scanning_tx.subscribe()
    }

    /// Snapshot of the session.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        SessionStatus::from(&*self.inner.lock_session())
    }
}

struct Inner {
    session: Mutex<ScanSession>,
    scanning_tx: watch::Sender<bool>,
    validator: ValidationClient,
    groups: GroupResolver,
    api: Arc<dyn TicketingApi>,
    sink: Arc<dyn ScanOutcomeSink>,
    feedback: Arc<dyn FeedbackSink>,
    timings: ScanTimings,
}

impl Inner {
    fn lock_session(&self) -> MutexGuard<'_, ScanSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_scanning(&self, session: &mut ScanSession, enabled: bool) {
        session.scanning_enabled = enabled;
        self.scanning_tx.send_if_modified(|current| {
            let changed = *current != enabled;
            *current = enabled;
            changed
        });
    }

    /// Returns to idle with scanning on. Cancels both timers and invalidates
    /// whatever run currently owns the session.
    fn resume_locked(&self, session: &mut ScanSession) {
        session.cancel_timers();
        session.handoff = None;
        session.phase = ScanPhase::Idle;
        session.generation += 1;
        self.set_scanning(session, true);
    }

    fn spawn_timer(self: &Arc<Self>, session: &mut ScanSession, kind: TimerKind, after: Duration) -> TimerHandle {
        let id = session.next_timer_id();
        let inner: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(inner) = inner.upgrade() {
                inner.on_timer(kind, id);
            }
        });
        TimerHandle::new(id, task)
    }

    fn on_timer(&self, kind: TimerKind, id: u64) {
        let mut session = self.lock_session();
        let slot = session.timer_slot(kind);
        if slot.as_ref().map(TimerHandle::id) != Some(id) {
            debug!(?kind, id, "superseded timer fired, ignoring");
            return;
        }
        // this task is the timer; dropping its own handle just detaches it
        drop(slot.take());

        match kind {
            TimerKind::Failsafe => warn!(
                phase = ?session.phase,
                generation = session.generation,
                "fail-safe fired, forcing scanning back on"
            ),
            TimerKind::AutoResume => debug!("notice timed out, resuming scanning"),
        }
        self.resume_locked(&mut session);
    }

    async fn process(self: &Arc<Self>, run: &Run) -> Result<ScanResolution> {
        let outcome = self
            .validator
            .validate(&run.event_id, &run.code, run.initializing)
            .await;
        debug!(outcome = outcome.label(), "validation finished");

        if !self.lock_session().owned_by(run.generation) {
            debug!("session reset during validation, discarding result");
            return Ok(ScanResolution::Stale);
        }

        // without a ready session there is nothing to look a booking up in
        let group = if outcome == ValidationOutcome::NotReady {
            GroupResolution::NotAGroup
        } else {
            self.groups
                .resolve(&run.event_id, &run.code, run.mode, &outcome)
                .await
        };

        match group {
            GroupResolution::Relevant(selection) => self.hand_off_group(run, &selection),
            GroupResolution::NothingToProcess(settled) => self.inform(run, &settled_notice(&settled)),
            GroupResolution::NotAGroup => self.resolve_single(run, outcome),
        }
    }

    fn resolve_single(self: &Arc<Self>, run: &Run, outcome: ValidationOutcome) -> Result<ScanResolution> {
        match outcome {
            ValidationOutcome::Valid { ticket } => self.hand_off_single(
                run,
                &SingleTicket {
                    code: run.code.clone(),
                    info: ticket,
                    lenient: false,
                },
            ),
            ValidationOutcome::Rejected(rejected) => match classify(run.mode, &rejected) {
                Classification::Proceed => {
                    info!(
                        status = rejected.status_code,
                        message = %rejected.raw_message,
                        "rejection tolerated in this mode, proceeding"
                    );
                    let info = rejected.info.unwrap_or_else(|| TicketInfo {
                        qr_code: Some(run.code.clone()),
                        ..TicketInfo::default()
                    });
                    self.hand_off_single(
                        run,
                        &SingleTicket {
                            code: run.code.clone(),
                            info,
                            lenient: true,
                        },
                    )
                }
                Classification::Error(kind) if !kind.is_blocking() => {
                    self.inform(run, &InfoNotice::new(kind).with_ticket(rejected.info.as_ref()))
                }
                Classification::Error(kind) => {
                    let message = if rejected.raw_message.trim().is_empty() {
                        kind.title().to_string()
                    } else {
                        rejected.raw_message
                    };
                    self.block(run, kind, &message)
                }
            },
            ValidationOutcome::TimedOut => self.block(
                run,
                ErrorKind::ValidationTimeout,
                "The ticketing service did not answer in time. Check the connection and scan again.",
            ),
            ValidationOutcome::NetworkFailure { reason } => self.block(
                run,
                ErrorKind::ValidationNetworkError,
                &format!("Could not reach the ticketing service: {reason}"),
            ),
            ValidationOutcome::NotReady => self.refuse_not_ready(run),
        }
    }

    /// Resumes scanning, then surfaces a blocking not-ready error.
    fn refuse_not_ready(&self, run: &Run) -> Result<ScanResolution> {
        {
            let mut session = self.lock_session();
            if !session.owned_by(run.generation) {
                return Ok(ScanResolution::Stale);
            }
            self.resume_locked(&mut session);
        }
        let kind = ErrorKind::SessionNotReady;
        info!(kind = kind.error_code(), initializing = run.initializing, "session not ready");
        self.feedback.cue(FeedbackCue::Error);
        self.sink
            .on_blocking_error(kind, &not_ready_message(run))
            .map_err(ScanError::Sink)?;
        Ok(ScanResolution::Blocked(kind))
    }

    /// Moves the session to `next` on behalf of `run`. Returns `false` if the
    /// run no longer owns the session.
    fn transition(self: &Arc<Self>, run: &Run, next: ScanPhase) -> bool {
        let mut session = self.lock_session();
        if !session.owned_by(run.generation) {
            debug!(?next, "session reset before resolution, discarding result");
            return false;
        }

        session.phase = next;
        match next {
            ScanPhase::GroupPending | ScanPhase::SinglePending => {
                session.cancel_timer(TimerKind::Failsafe);
                session.handoff = Some(Handoff {
                    event_id: run.event_id.clone(),
                    mode: run.mode,
                });
            }
            ScanPhase::ShowingInfo => {
                session.cancel_timer(TimerKind::Failsafe);
                let timer = self.spawn_timer(&mut session, TimerKind::AutoResume, self.timings.auto_resume);
                session.auto_resume = Some(timer);
            }
            // the fail-safe stays armed until the operator acknowledges
            ScanPhase::AwaitingAcknowledgment | ScanPhase::Validating => {}
            ScanPhase::Idle => self.resume_locked(&mut session),
        }
        true
    }

    fn hand_off_single(self: &Arc<Self>, run: &Run, ticket: &SingleTicket) -> Result<ScanResolution> {
        if !self.transition(run, ScanPhase::SinglePending) {
            return Ok(ScanResolution::Stale);
        }
        info!(checked_in = ticket.info.checked_in, lenient = ticket.lenient, "single ticket resolved");
        self.feedback.cue(FeedbackCue::Success);
        self.sink
            .on_single_resolved(ticket, run.mode)
            .map_err(ScanError::Sink)?;
        Ok(ScanResolution::SingleHandoff {
            lenient: ticket.lenient,
        })
    }

    fn hand_off_group(self: &Arc<Self>, run: &Run, selection: &GroupSelection) -> Result<ScanResolution> {
        if !self.transition(run, ScanPhase::GroupPending) {
            return Ok(ScanResolution::Stale);
        }
        info!(
            relevant = selection.tickets.len(),
            booking_size = selection.booking_size,
            purchaser = %selection.purchaser.name,
            "group booking resolved"
        );
        self.feedback.cue(FeedbackCue::Success);
        self.sink
            .on_group_resolved(selection)
            .map_err(ScanError::Sink)?;
        Ok(ScanResolution::GroupHandoff {
            relevant: selection.tickets.len(),
        })
    }

    fn inform(self: &Arc<Self>, run: &Run, notice: &InfoNotice) -> Result<ScanResolution> {
        if !self.transition(run, ScanPhase::ShowingInfo) {
            return Ok(ScanResolution::Stale);
        }
        info!(kind = notice.kind.error_code(), headline = %notice.headline, "informational outcome");
        self.feedback.cue(FeedbackCue::Info);
        self.sink.on_info(notice).map_err(ScanError::Sink)?;
        Ok(ScanResolution::Informed(notice.kind))
    }

    fn block(self: &Arc<Self>, run: &Run, kind: ErrorKind, message: &str) -> Result<ScanResolution> {
        if !self.transition(run, ScanPhase::AwaitingAcknowledgment) {
            return Ok(ScanResolution::Stale);
        }
        info!(kind = kind.error_code(), message, "blocking error");
        self.feedback.cue(FeedbackCue::Error);
        self.sink
            .on_blocking_error(kind, message)
            .map_err(ScanError::Sink)?;
        Ok(ScanResolution::Blocked(kind))
    }

    /// Last resort for a run that failed unexpectedly: surface the failure and
    /// force scanning back on.
    fn fail_unknown(&self, run: &Run, err: &ScanError) -> ScanResolution {
        error!(error = %err, code = err.error_code(), "scan failed unexpectedly");
        {
            let mut session = self.lock_session();
            if session.owned_by(run.generation) {
                self.resume_locked(&mut session);
            }
        }
        self.feedback.cue(FeedbackCue::Error);
        if let Err(sink_err) = self
            .sink
            .on_blocking_error(ErrorKind::Unknown, &err.to_string())
        {
            error!(error = %sink_err, "failed to surface unexpected scan failure");
        }
        ScanResolution::Blocked(ErrorKind::Unknown)
    }

    fn record(&self, handoff: &Handoff, code: &str) {
        let api = Arc::clone(&self.api);
        let Handoff { event_id, mode } = handoff.clone();
        let code = code.to_owned();
        tokio::spawn(async move {
            let result = match mode {
                ScanMode::CheckIn => api.record_check_in(&event_id, &code).await,
                ScanMode::CheckOut => api.record_check_out(&event_id, &code).await,
            };
            match result {
                Ok(()) => debug!(%mode, code = %code, "recorded"),
                Err(err) => warn!(%mode, code = %code, error = %err, "failed to record scan"),
            }
        });
    }
}

fn not_ready_message(run: &Run) -> String {
    if run.initializing {
        "The scanner is still starting up. Try again in a moment.".to_string()
    } else {
        ScanError::NoEventSelected.to_string()
    }
}

fn settled_notice(settled: &SettledGroup) -> InfoNotice {
    let (kind, headline) = match settled.mode {
        ScanMode::CheckIn => (ErrorKind::AlreadyScanned, "All Tickets Already Checked In"),
        ScanMode::CheckOut => (ErrorKind::NotCheckedIn, "Nothing To Check Out"),
    };
    let name = settled.purchaser.name.trim();
    InfoNotice {
        kind,
        headline: headline.to_string(),
        guest_name: (!name.is_empty()).then(|| name.to_string()),
        ticket_type: None,
        checked_in_at: None,
    }
}

/// Resumes scanning if a run is dropped or unwinds before it resolves.
struct ResumeGuard {
    inner: Arc<Inner>,
    generation: u64,
    armed: bool,
}

impl ResumeGuard {
    fn new(inner: &Arc<Inner>, generation: u64) -> Self {
        Self {
            inner: Arc::clone(inner),
            generation,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ResumeGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut session = self.inner.lock_session();
        if session.owned_by(self.generation) {
            warn!(generation = self.generation, "scan abandoned mid-flight, resuming scanning");
            self.inner.resume_locked(&mut session);
        }
    }
}
