//! Connection task: connect, pump frames, reconnect on failure.

use futures::{SinkExt, StreamExt};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::TransportError;
use crate::frame::{self, Decoded, OutboundFrame};
use crate::job::now_millis;

use super::{
    Command, Connection, ConnectionState, Connector, FrameHandler, OutboundQueue, Phase,
    ReconnectDecision, ReconnectPolicy, TransportEvent,
};

pub(super) struct Runner {
    pub(super) connector: Arc<dyn Connector>,
    pub(super) endpoint: String,
    pub(super) policy: ReconnectPolicy,
    pub(super) queue: OutboundQueue,
    pub(super) keepalive: Duration,
    pub(super) commands: mpsc::UnboundedReceiver<Command>,
    pub(super) state: Arc<watch::Sender<ConnectionState>>,
    pub(super) handler: Arc<OnceLock<FrameHandler>>,
}

/// Why a connected session ended.
enum SessionExit {
    Shutdown,
    Lost(TransportError),
}

/// Outcome of waiting while disconnected.
enum Wait {
    Elapsed,
    ReconnectNow,
    Shutdown,
}

impl Runner {
    pub(super) async fn run(mut self) {
        let mut attempt: u32 = 0;
        loop {
            self.publish(Phase::Connecting, attempt, None);
            tracing::debug!(endpoint = %self.endpoint, attempt, "connecting");
            match self.connector.connect(&self.endpoint).await {
                Ok(conn) => {
                    tracing::info!(endpoint = %self.endpoint, "transport connected");
                    attempt = 0;
                    self.publish(Phase::Connected, 0, None);
                    self.emit(TransportEvent::Connected);
                    match self.session(conn).await {
                        SessionExit::Shutdown => {
                            self.publish(Phase::Disconnected, 0, None);
                            tracing::info!("transport closed");
                            return;
                        }
                        SessionExit::Lost(e) => {
                            tracing::warn!(error = %e, "connection lost");
                            self.emit(TransportEvent::Disconnected);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(endpoint = %self.endpoint, attempt, error = %e, "connect failed");
                }
            }

            attempt += 1;
            match self.policy.decide(attempt) {
                ReconnectDecision::RetryAfter(delay) => {
                    self.publish(Phase::Disconnected, attempt, Some(delay.as_millis() as u64));
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "reconnecting after backoff"
                    );
                    match self.wait(Some(delay)).await {
                        Wait::Elapsed | Wait::ReconnectNow => {}
                        Wait::Shutdown => break,
                    }
                }
                ReconnectDecision::GiveUp => {
                    let attempts = attempt - 1;
                    tracing::error!(attempts, "reconnect attempts exhausted, transport offline");
                    self.publish(Phase::Offline, attempts, None);
                    self.emit(TransportEvent::Offline { attempts });
                    match self.wait(None).await {
                        Wait::ReconnectNow => attempt = 0,
                        Wait::Elapsed | Wait::Shutdown => break,
                    }
                }
            }
        }
        self.publish(Phase::Disconnected, 0, None);
    }

    async fn session(&mut self, conn: Connection) -> SessionExit {
        let Connection {
            mut sink,
            mut stream,
        } = conn;

        while let Some(frame) = self.queue.pop() {
            let (job_id, seq) = (frame.job_id.clone(), frame.seq);
            if let Err(e) = send_frame(&mut sink, &frame).await {
                self.requeue(frame);
                return SessionExit::Lost(e);
            }
            tracing::debug!(job_id = %job_id, seq, "flushed queued frame");
        }

        let mut keepalive = interval_at(Instant::now() + self.keepalive, self.keepalive);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = stream.next() => {
                    let text = match msg {
                        Some(Ok(text)) => text,
                        Some(Err(e)) => return SessionExit::Lost(e),
                        None => return SessionExit::Lost(TransportError::Closed),
                    };
                    match frame::decode(&text) {
                        Ok(Decoded::Frame(frame)) => self.emit(TransportEvent::Frame(frame)),
                        Ok(Decoded::Pong) => tracing::trace!("pong"),
                        Err(e) => tracing::warn!(error = %e, "dropping inbound frame"),
                    }
                }
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Send(frame)) => {
                        if let Err(e) = send_frame(&mut sink, &frame).await {
                            self.enqueue(frame);
                            return SessionExit::Lost(e);
                        }
                    }
                    Some(Command::Reconnect) => tracing::debug!("already connected"),
                    Some(Command::Disconnect) | None => {
                        if let Err(e) = sink.close().await {
                            tracing::debug!(error = %e, "close failed");
                        }
                        return SessionExit::Shutdown;
                    }
                },
                _ = keepalive.tick() => {
                    if let Err(e) = sink.send(frame::ping(now_millis())).await {
                        return SessionExit::Lost(e);
                    }
                }
            }
        }
    }

    /// Wait out a backoff delay (or indefinitely when offline), queueing
    /// frames sent meanwhile.
    async fn wait(&mut self, delay: Option<Duration>) -> Wait {
        let sleep = tokio::time::sleep(delay.unwrap_or(Duration::MAX));
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep, if delay.is_some() => return Wait::Elapsed,
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Send(frame)) => self.enqueue(frame),
                    Some(Command::Reconnect) => {
                        tracing::info!("reconnect requested");
                        return Wait::ReconnectNow;
                    }
                    Some(Command::Disconnect) | None => return Wait::Shutdown,
                },
            }
        }
    }

    fn enqueue(&mut self, frame: OutboundFrame) {
        tracing::debug!(job_id = %frame.job_id, seq = frame.seq, queued = self.queue.len() + 1, "queueing frame while disconnected");
        if let Some(dropped) = self.queue.push(frame) {
            self.report_drop(dropped);
        }
    }

    fn requeue(&mut self, frame: OutboundFrame) {
        if let Some(dropped) = self.queue.requeue(frame) {
            self.report_drop(dropped);
        }
    }

    fn report_drop(&self, dropped: OutboundFrame) {
        tracing::warn!(
            job_id = %dropped.job_id,
            seq = dropped.seq,
            kind = ?dropped.kind,
            "outbound queue full, dropped oldest frame"
        );
        self.emit(TransportEvent::FrameDropped {
            job_id: dropped.job_id,
            kind: dropped.kind,
        });
    }

    fn emit(&self, event: TransportEvent) {
        match self.handler.get() {
            Some(handler) => handler(event),
            None => tracing::debug!(?event, "no frame handler registered"),
        }
    }

    fn publish(&self, phase: Phase, reconnect_attempt: u32, next_backoff_ms: Option<u64>) {
        self.state.send_replace(ConnectionState {
            phase,
            reconnect_attempt,
            next_backoff_ms,
        });
    }
}

async fn send_frame(
    sink: &mut super::FrameSink,
    frame: &OutboundFrame,
) -> Result<(), TransportError> {
    let text = frame
        .encode()
        .map_err(|e| TransportError::Send(e.to_string()))?;
    tracing::debug!(job_id = %frame.job_id, seq = frame.seq, kind = ?frame.kind, "send");
    sink.send(text).await
}
