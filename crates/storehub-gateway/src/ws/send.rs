use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{stream::SplitSink, SinkExt};
use storehub_hub::{FrameSink, HubError};

/// Write half of an upgraded WebSocket, owned by the connection's write loop.
pub struct WsSink(pub SplitSink<WebSocket, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, payload: &str) -> Result<(), HubError> {
        self.0
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| HubError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), HubError> {
        self.0
            .send(Message::Close(None))
            .await
            .map_err(|e| HubError::Transport(e.to_string()))
    }
}
