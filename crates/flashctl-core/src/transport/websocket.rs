use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;

use super::{Connection, Connector};

/// Production connector over tokio-tungstenite.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<Connection, TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (write, read) = ws.split();

        let sink = write
            .sink_map_err(TransportError::from)
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text.into()))));

        // tungstenite answers pings itself; only text frames reach the caller.
        let stream = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::from(e))),
            })
        });

        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
