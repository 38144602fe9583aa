//! Issues poll requests, one at a time.

use std::sync::Arc;

use firenze_protocol::ConnectionConfig;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::state::{ConnectionState, LoopEvent};
use crate::transport::PollTransport;

pub struct RequestScheduler<T: PollTransport> {
    config: Arc<ConnectionConfig>,
    transport: Arc<T>,
    events: mpsc::UnboundedSender<LoopEvent>,
    in_flight: Option<JoinHandle<()>>,
}

impl<T: PollTransport> RequestScheduler<T> {
    pub(crate) fn new(
        config: Arc<ConnectionConfig>,
        transport: Arc<T>,
        events: mpsc::UnboundedSender<LoopEvent>,
    ) -> Self {
        Self {
            config,
            transport,
            events,
            in_flight: None,
        }
    }

    /// Send the next poll for the current continuation token.
    ///
    /// The completion is delivered to the connection task as a
    /// [`LoopEvent::PollCompleted`]; this call never fails by itself.
    /// Callers must only invoke it with no request in flight and no retry
    /// pending. Debug builds assert that; release builds drop the call.
    pub fn poll_once(&mut self, state: &mut ConnectionState) {
        debug_assert!(!state.request_in_flight, "poll_once called while a request is in flight");
        debug_assert!(
            state.pending_timer.is_none(),
            "poll_once called while a retry is pending"
        );
        if state.request_in_flight || state.pending_timer.is_some() {
            warn!("duplicate poll request ignored");
            return;
        }

        let url = self.config.poll_url(&state.continuation_token);
        if self.config.debug_logging {
            info!(%url, "poll request");
        } else {
            debug!(%url, "poll request");
        }

        state.request_in_flight = true;
        state.stats.polls_sent += 1;

        let transport = self.transport.clone();
        let events = self.events.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let outcome = transport.get_json(&url).await;
            let _ = events.send(LoopEvent::PollCompleted(outcome));
        }));
    }

    /// Mark the outstanding request as resolved.
    pub(crate) fn complete(&mut self) {
        self.in_flight = None;
    }

    /// Abort the outstanding request, if any.
    pub(crate) fn abort(&mut self, state: &mut ConnectionState) {
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
        state.request_in_flight = false;
    }
}
