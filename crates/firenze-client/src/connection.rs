//! The connection task.
//!
//! One tokio task owns the [`ConnectionState`] and is the only writer.
//! Requests and retry timers run as their own tasks and report back over
//! a channel, so the loop steps strictly one event at a time:
//!
//! ```text
//! poll_once ──▶ PollCompleted ──▶ ResponseHandler ─┬─▶ poll_once
//!                                                  └─▶ schedule_retry ──▶ RetryFired ──▶ poll_once
//! ```

use std::sync::Arc;

use firenze_protocol::ConnectionConfig;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

use crate::backoff::BackoffTimer;
use crate::dispatch::UpdateDispatcher;
use crate::handler::ResponseHandler;
use crate::scheduler::RequestScheduler;
use crate::state::{ConnectionState, ConnectionStatus, LoopEvent};
use crate::transport::PollTransport;

/// Entry point: starts a connection loop.
pub struct Connection;

impl Connection {
    /// Spawn the loop on the current tokio runtime. The first poll is sent
    /// right away with `config.reconnect_with` as its token.
    ///
    /// The loop runs until [`ConnectionHandle::stop`] is called or the
    /// handle is dropped.
    pub fn spawn<T, D>(config: ConnectionConfig, transport: T, dispatcher: D) -> ConnectionHandle
    where
        T: PollTransport,
        D: UpdateDispatcher,
    {
        Self::spawn_shared(config, Arc::new(transport), Arc::new(dispatcher))
    }

    /// Like [`Connection::spawn`], for capabilities shared with other code.
    pub fn spawn_shared<T, D>(
        config: ConnectionConfig,
        transport: Arc<T>,
        dispatcher: Arc<D>,
    ) -> ConnectionHandle
    where
        T: PollTransport,
        D: UpdateDispatcher,
    {
        let id = Uuid::new_v4().to_string();
        let config = Arc::new(config);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (status_tx, status_rx) =
            watch::channel(ConnectionStatus::initial(&config.reconnect_with));

        let conn = ConnectionLoop {
            state: ConnectionState::new(config.reconnect_with.clone()),
            scheduler: RequestScheduler::new(config.clone(), transport, events_tx.clone()),
            handler: ResponseHandler::new(dispatcher),
            backoff: BackoffTimer::new(config.retry_delay(), events_tx),
            status_tx,
        };

        if config.cross_origin_relax {
            info!(
                connection_id = %id,
                "cross-origin relaxation requested; enforcement is left to the environment"
            );
        }

        let span = info_span!("connection", id = %id);
        let handle = tokio::spawn(conn.run(events_rx, shutdown_rx).instrument(span));

        ConnectionHandle {
            id,
            status_rx,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }
}

/// Owner's handle on a running connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: String,
    status_rx: watch::Receiver<ConnectionStatus>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Unique id of this connection, also recorded on its tracing span.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest published status.
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    /// Receiver that sees every status the loop publishes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the loop: abort the outstanding request, cancel the pending
    /// retry, and wait for the task to exit.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!(connection_id = %self.id, "connection stopped");
    }
}

struct ConnectionLoop<T: PollTransport, D: UpdateDispatcher> {
    state: ConnectionState,
    scheduler: RequestScheduler<T>,
    handler: ResponseHandler<D>,
    backoff: BackoffTimer,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl<T: PollTransport, D: UpdateDispatcher> ConnectionLoop<T, D> {
    async fn run(
        mut self,
        mut events_rx: mpsc::UnboundedReceiver<LoopEvent>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        info!(token = %self.state.continuation_token, "starting poll loop");
        self.scheduler.poll_once(&mut self.state);
        self.publish();

        loop {
            tokio::select! {
                // Explicit stop, or the handle was dropped.
                _ = shutdown_rx.recv() => break,

                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    self.step(event);
                    self.publish();
                }
            }
        }

        self.scheduler.abort(&mut self.state);
        self.backoff.cancel(&mut self.state);
        self.publish();
        info!("poll loop exited");
    }

    fn step(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::PollCompleted(outcome) => {
                self.handler.handle(
                    &mut self.state,
                    outcome,
                    &mut self.scheduler,
                    &mut self.backoff,
                );
            }
            LoopEvent::RetryFired { generation } => {
                if self.backoff.take_fired(&mut self.state, generation) {
                    debug!(generation, "retrying poll");
                    self.scheduler.poll_once(&mut self.state);
                }
            }
        }
    }

    fn publish(&self) {
        // No receivers left is fine; the loop keeps running until stopped.
        self.status_tx.send_replace(self.state.status());
    }
}
