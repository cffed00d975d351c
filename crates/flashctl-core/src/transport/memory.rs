//! In-process connector that lets tests play the backend.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::TransportError;
use crate::frame::InboundFrame;

use super::{Connection, Connector};

#[derive(Debug)]
struct Shared {
    refuse: bool,
    connects: u32,
    /// Inbound side of the live connection, if any.
    inbound: Option<mpsc::UnboundedSender<Result<String, TransportError>>>,
    sent: mpsc::UnboundedSender<String>,
}

#[derive(Debug, Clone)]
pub struct MemoryConnector {
    shared: Arc<Mutex<Shared>>,
}

/// Backend end of a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryBackend {
    shared: Arc<Mutex<Shared>>,
    sent: mpsc::UnboundedReceiver<String>,
}

/// A connector and the handle that drives it.
pub fn memory_pair() -> (MemoryConnector, MemoryBackend) {
    let (sent_tx, sent_rx) = mpsc::unbounded();
    let shared = Arc::new(Mutex::new(Shared {
        refuse: false,
        connects: 0,
        inbound: None,
        sent: sent_tx,
    }));
    (
        MemoryConnector {
            shared: shared.clone(),
        },
        MemoryBackend {
            shared,
            sent: sent_rx,
        },
    )
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &str) -> Result<Connection, TransportError> {
        let mut shared = lock(&self.shared);
        if shared.refuse {
            return Err(TransportError::Connect(format!("{endpoint}: connection refused")));
        }
        shared.connects += 1;
        let (inbound_tx, inbound_rx) = mpsc::unbounded();
        shared.inbound = Some(inbound_tx);
        let sink = shared
            .sent
            .clone()
            .sink_map_err(|_| TransportError::Closed);
        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(inbound_rx),
        })
    }
}

impl MemoryBackend {
    /// Deliver a frame to the client. Returns false when no connection is open.
    pub fn push(&self, frame: &InboundFrame) -> bool {
        match serde_json::to_string(frame) {
            Ok(text) => self.push_text(text),
            Err(_) => false,
        }
    }

    pub fn push_text(&self, text: impl Into<String>) -> bool {
        let shared = lock(&self.shared);
        match &shared.inbound {
            Some(tx) => tx.unbounded_send(Ok(text.into())).is_ok(),
            None => false,
        }
    }

    /// Close the live connection from the backend side.
    pub fn drop_connection(&self) {
        lock(&self.shared).inbound = None;
    }

    /// Make subsequent connects fail (or succeed again).
    pub fn refuse_connections(&self, refuse: bool) {
        lock(&self.shared).refuse = refuse;
    }

    pub fn connect_count(&self) -> u32 {
        lock(&self.shared).connects
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared).inbound.is_some()
    }

    /// Next control frame the client sent, skipping keepalive pings.
    pub async fn next_sent(&mut self) -> Option<serde_json::Value> {
        while let Some(text) = self.sent.next().await {
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(v) if v["type"] == "ping" => continue,
                Ok(v) => return Some(v),
                Err(_) => continue,
            }
        }
        None
    }

    /// Like [`MemoryBackend::next_sent`] but without waiting.
    pub fn try_next_sent(&mut self) -> Option<serde_json::Value> {
        while let Ok(Some(text)) = self.sent.try_next() {
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(v) if v["type"] == "ping" => continue,
                Ok(v) => return Some(v),
                Err(_) => continue,
            }
        }
        None
    }

    /// Count pings sent so far, consuming everything pending.
    pub fn drain_pings(&mut self) -> usize {
        let mut pings = 0;
        while let Ok(Some(text)) = self.sent.try_next() {
            if text.contains("\"ping\"") {
                pings += 1;
            }
        }
        pings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameKind;

    #[tokio::test]
    async fn pushes_reach_the_open_connection() {
        let (connector, mut backend) = memory_pair();
        assert!(!backend.push(&InboundFrame::new(FrameKind::Done, "a", 0)));

        let mut conn = connector.connect("mem://test").await.unwrap();
        assert_eq!(backend.connect_count(), 1);
        assert!(backend.push(&InboundFrame::new(FrameKind::Done, "a", 0)));
        let text = conn.stream.next().await.unwrap().unwrap();
        assert!(text.contains("flash.done"));

        conn.sink.send(r#"{"type":"flash.pause"}"#.to_string()).await.unwrap();
        assert_eq!(backend.next_sent().await.unwrap()["type"], "flash.pause");

        backend.drop_connection();
        assert!(conn.stream.next().await.is_none());
    }

    #[tokio::test]
    async fn refused_connects_fail() {
        let (connector, backend) = memory_pair();
        backend.refuse_connections(true);
        assert!(matches!(
            connector.connect("mem://test").await,
            Err(TransportError::Connect(_))
        ));
        assert_eq!(backend.connect_count(), 0);
    }
}
