//! Mutable state of one scan screen.

use tokio::task::JoinHandle;

use crate::gate::ScanGate;
use crate::types::ScanMode;

/// Where the scan pipeline currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanPhase {
    /// Waiting for a code. The camera is live.
    Idle,
    /// A code passed the gate and is being validated and resolved.
    Validating,
    /// Relevant tickets of a booking were handed to the selection surface.
    GroupPending,
    /// A single ticket was handed to the action flow.
    SinglePending,
    /// A blocking error is shown until acknowledged.
    AwaitingAcknowledgment,
    /// An informational notice is shown until acknowledged or auto-resumed.
    ShowingInfo,
}

impl ScanPhase {
    /// Returns `true` while an external flow owns the outcome.
    #[must_use]
    pub const fn is_handoff(self) -> bool {
        matches!(self, Self::GroupPending | Self::SinglePending)
    }

    /// Returns `true` while a notice or error waits for acknowledgment.
    #[must_use]
    pub const fn is_acknowledgeable(self) -> bool {
        matches!(self, Self::AwaitingAcknowledgment | Self::ShowingInfo)
    }
}

/// Which timer a handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// Forces scanning back on if a run never finishes.
    Failsafe,
    /// Resumes scanning after an informational notice.
    AutoResume,
}

/// A scheduled timer task.
#[derive(Debug)]
pub(crate) struct TimerHandle {
    id: u64,
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub(crate) const fn new(id: u64, task: JoinHandle<()>) -> Self {
        Self { id, task }
    }

    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    /// Stops the timer. A timer that already fired is unaffected.
    pub(crate) fn cancel(self) {
        self.task.abort();
    }
}

/// What a pending hand-off needs to record its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Handoff {
    pub(crate) event_id: String,
    pub(crate) mode: ScanMode,
}

/// State owned by the orchestrator. Nothing else writes it.
#[derive(Debug)]
pub(crate) struct ScanSession {
    pub(crate) mode: ScanMode,
    pub(crate) event_id: String,
    pub(crate) initializing: bool,
    pub(crate) scanning_enabled: bool,
    pub(crate) phase: ScanPhase,
    /// Bumped whenever a run starts or the session is forcibly reset. A run
    /// owns the session only while its captured generation is current.
    pub(crate) generation: u64,
    pub(crate) gate: ScanGate,
    pub(crate) failsafe: Option<TimerHandle>,
    pub(crate) auto_resume: Option<TimerHandle>,
    pub(crate) handoff: Option<Handoff>,
    next_timer_id: u64,
}

impl ScanSession {
    pub(crate) fn new(mode: ScanMode, event_id: String, gate: ScanGate) -> Self {
        Self {
            mode,
            event_id,
            initializing: false,
            scanning_enabled: true,
            phase: ScanPhase::Idle,
            generation: 0,
            gate,
            failsafe: None,
            auto_resume: None,
            handoff: None,
            next_timer_id: 0,
        }
    }

    pub(crate) fn next_timer_id(&mut self) -> u64 {
        self.next_timer_id += 1;
        self.next_timer_id
    }

    pub(crate) const fn owned_by(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub(crate) fn timer_slot(&mut self, kind: TimerKind) -> &mut Option<TimerHandle> {
        match kind {
            TimerKind::Failsafe => &mut self.failsafe,
            TimerKind::AutoResume => &mut self.auto_resume,
        }
    }

    pub(crate) fn cancel_timer(&mut self, kind: TimerKind) {
        if let Some(timer) = self.timer_slot(kind).take() {
            timer.cancel();
        }
    }

    pub(crate) fn cancel_timers(&mut self) {
        self.cancel_timer(TimerKind::Failsafe);
        self.cancel_timer(TimerKind::AutoResume);
    }
}

/// Read-only view of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Current mode.
    pub mode: ScanMode,
    /// Selected event, empty when none.
    pub event_id: String,
    /// Whether the session is still initializing.
    pub initializing: bool,
    /// Whether the camera should be emitting codes.
    pub scanning_enabled: bool,
    /// Current phase.
    pub phase: ScanPhase,
    /// Current generation.
    pub generation: u64,
    /// Last code accepted by the gate.
    pub last_code: Option<String>,
    /// Whether the fail-safe timer is armed.
    pub failsafe_armed: bool,
    /// Whether the auto-resume timer is armed.
    pub auto_resume_armed: bool,
}

impl From<&ScanSession> for SessionStatus {
    fn from(session: &ScanSession) -> Self {
        Self {
            mode: session.mode,
            event_id: session.event_id.clone(),
            initializing: session.initializing,
            scanning_enabled: session.scanning_enabled,
            phase: session.phase,
            generation: session.generation,
            last_code: session.gate.last_code().map(str::to_owned),
            failsafe_armed: session.failsafe.is_some(),
            auto_resume_armed: session.auto_resume.is_some(),
        }
    }
}
