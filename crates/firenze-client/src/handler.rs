//! Interprets completed polls and decides what the loop does next.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use firenze_protocol::{PollError, PollResponse};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::backoff::BackoffTimer;
use crate::dispatch::{DispatchError, UpdateDispatcher};
use crate::scheduler::RequestScheduler;
use crate::state::ConnectionState;
use crate::transport::PollTransport;

/// What the handler did with a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The poll succeeded and the next one was sent immediately.
    Repolled { dispatched: usize, failed: usize },
    /// The poll failed and a retry timer was armed.
    RetryScheduled,
}

pub struct ResponseHandler<D: UpdateDispatcher> {
    dispatcher: Arc<D>,
}

impl<D: UpdateDispatcher> ResponseHandler<D> {
    pub fn new(dispatcher: Arc<D>) -> Self {
        Self { dispatcher }
    }

    /// Handle one completed poll. Leaves the loop either with a new
    /// request in flight or with a retry armed.
    pub fn handle<T: PollTransport>(
        &self,
        state: &mut ConnectionState,
        outcome: Result<Value, PollError>,
        scheduler: &mut RequestScheduler<T>,
        backoff: &mut BackoffTimer,
    ) -> HandleOutcome {
        state.request_in_flight = false;
        scheduler.complete();

        // An object body carrying a token moves the token even when the
        // rest of it is rejected.
        let (carried, response) = match outcome {
            Ok(body) => (
                PollResponse::carried_token(&body).map(str::to_owned),
                PollResponse::from_body(body).map_err(PollError::from),
            ),
            Err(e) => (None, Err(e)),
        };

        match response {
            Ok(response) => {
                state.stats.polls_succeeded += 1;
                state.stats.consecutive_failures = 0;
                state.continuation_token = response.reconnect_with.clone();

                let empty = response.is_empty();
                let (dispatched, failed) = self.dispatch_all(state, &response.updates);
                debug!(
                    dispatched,
                    failed,
                    empty,
                    token = %state.continuation_token,
                    "poll succeeded"
                );

                scheduler.poll_once(state);
                HandleOutcome::Repolled { dispatched, failed }
            }
            Err(e) => {
                state.stats.polls_failed += 1;
                state.stats.consecutive_failures += 1;
                if let Some(token) = carried {
                    state.continuation_token = token;
                }
                warn!(
                    error = %e,
                    transport = e.is_transport(),
                    consecutive_failures = state.stats.consecutive_failures,
                    "poll failed, retrying in {}ms",
                    backoff.delay().as_millis()
                );

                backoff.cancel(state);
                backoff.schedule_retry(state);
                HandleOutcome::RetryScheduled
            }
        }
    }

    fn dispatch_all(
        &self,
        state: &mut ConnectionState,
        updates: &[firenze_protocol::Update],
    ) -> (usize, usize) {
        let mut dispatched = 0;
        let mut failed = 0;

        for update in updates {
            let result = catch_unwind(AssertUnwindSafe(|| {
                self.dispatcher.dispatch(&update.path, &update.message)
            }))
            .unwrap_or_else(|_| Err(DispatchError::new(&update.path, "dispatcher panicked")));

            match result {
                Ok(()) => {
                    dispatched += 1;
                    state.stats.updates_dispatched += 1;
                }
                Err(e) => {
                    failed += 1;
                    state.stats.dispatch_failures += 1;
                    error!(path = %update.path, error = %e, "update dispatch failed");
                }
            }
        }

        (dispatched, failed)
    }
}
