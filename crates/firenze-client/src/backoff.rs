//! Fixed-delay retry timer.
//!
//! At most one timer is live per connection. Arming a new one cancels the
//! previous one; a cancelled timer that already fired before the abort
//! landed is recognised by its stale generation and ignored.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::state::{ConnectionState, LoopEvent};

/// Handle to an armed retry timer.
#[derive(Debug)]
pub struct TimerHandle {
    generation: u64,
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn cancel(self) {
        self.task.abort();
    }
}

pub struct BackoffTimer {
    delay: Duration,
    events: mpsc::UnboundedSender<LoopEvent>,
    next_generation: u64,
}

impl BackoffTimer {
    pub(crate) fn new(delay: Duration, events: mpsc::UnboundedSender<LoopEvent>) -> Self {
        Self {
            delay,
            events,
            next_generation: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Cancel the pending timer, if any. Returns whether one was pending.
    pub fn cancel(&self, state: &mut ConnectionState) -> bool {
        match state.pending_timer.take() {
            Some(handle) => {
                debug!(generation = handle.generation(), "cancelling pending retry");
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Arm a one-shot retry after the configured delay, replacing any
    /// timer that is already pending.
    pub fn schedule_retry(&mut self, state: &mut ConnectionState) {
        self.cancel(state);

        self.next_generation += 1;
        let generation = self.next_generation;
        let delay = self.delay;
        let events = self.events.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The connection task may be gone already; nothing to retry then.
            let _ = events.send(LoopEvent::RetryFired { generation });
        });

        debug!(generation, delay_ms = delay.as_millis() as u64, "retry scheduled");
        state.pending_timer = Some(TimerHandle { generation, task });
    }

    /// Consume a timer expiry. Returns true if it belongs to the pending
    /// timer, which is then cleared; stale expiries return false.
    pub fn take_fired(&self, state: &mut ConnectionState, generation: u64) -> bool {
        match &state.pending_timer {
            Some(handle) if handle.generation == generation => {
                state.pending_timer = None;
                true
            }
            _ => {
                debug!(generation, "ignoring stale retry timer");
                false
            }
        }
    }
}
