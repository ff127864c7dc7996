//! In-memory transports for exercising the hub without sockets.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::connection::FrameSink;
use crate::error::{HubError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close,
}

/// Forwards every frame to a channel the test reads from. The channel
/// closes when the write loop drops the sink.
pub struct RecordingSink(mpsc::UnboundedSender<Frame>);

pub fn recording_sink() -> (RecordingSink, mpsc::UnboundedReceiver<Frame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RecordingSink(tx), rx)
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send_text(&mut self, payload: &str) -> Result<()> {
        self.0
            .send(Frame::Text(payload.to_string()))
            .map_err(|_| HubError::Transport("recorder dropped".into()))
    }

    async fn close(&mut self) -> Result<()> {
        self.0
            .send(Frame::Close)
            .map_err(|_| HubError::Transport("recorder dropped".into()))
    }
}

/// A peer that never acknowledges a write.
pub struct StalledSink;

#[async_trait]
impl FrameSink for StalledSink {
    async fn send_text(&mut self, _payload: &str) -> Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Every write fails. Counts close attempts.
pub struct FailingSink(Arc<AtomicUsize>);

pub fn failing_sink() -> (FailingSink, Arc<AtomicUsize>) {
    let closes = Arc::new(AtomicUsize::new(0));
    (FailingSink(closes.clone()), closes)
}

#[async_trait]
impl FrameSink for FailingSink {
    async fn send_text(&mut self, _payload: &str) -> Result<()> {
        Err(HubError::Transport("broken pipe".into()))
    }

    async fn close(&mut self) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Next recorded frame, or `None` if nothing arrives within a second.
pub async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Option<Frame> {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .ok()
        .flatten()
}

/// Every frame until the sink is dropped.
pub async fn frames_until_closed(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(frame)) => frames.push(frame),
            Ok(None) => return frames,
            Err(_) => panic!("sink still open after 2s, frames so far: {frames:?}"),
        }
    }
}

/// True if nothing is recorded within a short window.
pub async fn stays_silent(rx: &mut mpsc::UnboundedReceiver<Frame>) -> bool {
    tokio::time::timeout(Duration::from_millis(50), rx.recv())
        .await
        .is_err()
}
