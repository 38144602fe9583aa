//! Loop state owned by the connection task.

use firenze_protocol::PollError;
use serde_json::Value;

use crate::backoff::TimerHandle;

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    /// About to send (only observable before the first poll or after stop).
    Idle,
    /// A poll request is outstanding.
    RequestInFlight,
    /// A retry timer is armed.
    WaitingBackoff,
}

/// Counters kept alongside the state for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub polls_sent: u64,
    pub polls_succeeded: u64,
    pub polls_failed: u64,
    /// Failures since the last successful poll.
    pub consecutive_failures: u32,
    pub updates_dispatched: u64,
    pub dispatch_failures: u64,
}

/// Mutable state of one connection. Only the connection task writes it.
#[derive(Debug)]
pub struct ConnectionState {
    /// Token sent on the next poll.
    pub continuation_token: String,
    /// Present iff a retry is scheduled.
    pub(crate) pending_timer: Option<TimerHandle>,
    /// True from the moment a poll is sent until its completion is handled.
    pub request_in_flight: bool,
    pub stats: LoopStats,
}

impl ConnectionState {
    pub fn new(seed: impl Into<String>) -> Self {
        Self {
            continuation_token: seed.into(),
            pending_timer: None,
            request_in_flight: false,
            stats: LoopStats::default(),
        }
    }

    pub fn has_pending_retry(&self) -> bool {
        self.pending_timer.is_some()
    }

    pub fn phase(&self) -> LoopPhase {
        debug_assert!(
            !(self.request_in_flight && self.pending_timer.is_some()),
            "request in flight while a retry timer is armed"
        );
        if self.request_in_flight {
            LoopPhase::RequestInFlight
        } else if self.pending_timer.is_some() {
            LoopPhase::WaitingBackoff
        } else {
            LoopPhase::Idle
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            phase: self.phase(),
            continuation_token: self.continuation_token.clone(),
            stats: self.stats.clone(),
        }
    }
}

/// Snapshot published after every loop step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub phase: LoopPhase,
    pub continuation_token: String,
    pub stats: LoopStats,
}

impl ConnectionStatus {
    pub fn initial(seed: &str) -> Self {
        ConnectionState::new(seed).status()
    }
}

/// Completions reported back to the connection task.
#[derive(Debug)]
pub(crate) enum LoopEvent {
    /// A poll request finished; the body is decoded JSON, not yet interpreted.
    PollCompleted(Result<Value, PollError>),
    /// The retry timer of the given generation expired.
    RetryFired { generation: u64 },
}
