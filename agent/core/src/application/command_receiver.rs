// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command Receiver
//!
//! Validates inbound frames and forwards well-formed commands to the Task
//! Registry. Frames on one connection are handled strictly in arrival order;
//! malformed frames are answered with a one-line diagnostic on the same
//! connection, which stays open.

use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::domain::protocol::{CommandMessage, ProtocolError, MALFORMED_REQUEST_REPLY};
use crate::domain::task::TaskRegistry;
use crate::infrastructure::frame_codec::FrameCodec;

/// Called once when the request budget is used up
pub type BudgetExhausted = Box<dyn Fn() + Send + Sync>;

pub struct CommandReceiver {
    registry: Arc<dyn TaskRegistry>,
    handled: AtomicU64,
    budget: Option<(u64, BudgetExhausted)>,
}

impl CommandReceiver {
    pub fn new(registry: Arc<dyn TaskRegistry>) -> Self {
        Self {
            registry,
            handled: AtomicU64::new(0),
            budget: None,
        }
    }

    /// Invoke `on_exhausted` once `limit` frames have been handled. A limit of
    /// 0 means unlimited.
    pub fn with_request_limit(mut self, limit: u64, on_exhausted: BudgetExhausted) -> Self {
        if limit > 0 {
            self.budget = Some((limit, on_exhausted));
        }
        self
    }

    pub fn handled_frames(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    /// Handle one complete frame. Returns the diagnostic to write back when
    /// the frame is malformed.
    pub async fn handle_frame(&self, frame: &[u8]) -> Option<&'static str> {
        if frame.iter().all(u8::is_ascii_whitespace) {
            return None;
        }

        let handled = self.handled.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some((limit, on_exhausted)) = &self.budget {
            if handled == *limit {
                on_exhausted();
            }
        }

        match CommandMessage::parse(frame.trim_ascii()) {
            Ok(message) => {
                debug!(call = %message.call, "Dispatching command");
                self.registry.dispatch(message).await;
                None
            }
            Err(e) => {
                info!("Rejected malformed request: {}", e);
                Some(MALFORMED_REQUEST_REPLY)
            }
        }
    }

    /// Serve one connection until the peer closes it or framing fails
    pub async fn serve<S>(&self, stream: S, codec: FrameCodec, peer: &str)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, codec);

        while let Some(frame) = framed.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(ProtocolError::FrameTooLong { limit }) => {
                    warn!(peer, limit, "Frame too long, closing connection");
                    break;
                }
                Err(e) => {
                    debug!(peer, "Connection read failed: {}", e);
                    break;
                }
            };

            if let Some(reply) = self.handle_frame(&frame).await {
                if let Err(e) = framed.send(reply).await {
                    debug!(peer, "Failed to write diagnostic: {}", e);
                    break;
                }
            }
        }

        debug!(peer, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::{LiveTasks, TaskRegistryError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[derive(Default)]
    struct RecordingRegistry {
        dispatched: Mutex<Vec<CommandMessage>>,
    }

    #[async_trait]
    impl TaskRegistry for RecordingRegistry {
        async fn init(&self) -> Result<(), TaskRegistryError> {
            Ok(())
        }
        fn register_signal_handlers(&self) -> Result<(), TaskRegistryError> {
            Ok(())
        }
        async fn dispatch(&self, message: CommandMessage) {
            self.dispatched.lock().push(message);
        }
        async fn list_live_tasks(&self) -> Result<LiveTasks, TaskRegistryError> {
            Ok(LiveTasks::new())
        }
    }

    fn codec() -> FrameCodec {
        FrameCodec::new(b"\r\n".to_vec(), true, 1024)
    }

    #[tokio::test]
    async fn test_valid_frame_is_dispatched_once() {
        let registry = Arc::new(RecordingRegistry::default());
        let receiver = CommandReceiver::new(registry.clone());

        let reply = receiver.handle_frame(br#"{"call":"ping","params":{}}"#).await;
        assert!(reply.is_none());

        let dispatched = registry.dispatched.lock();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0], CommandMessage::new("ping", json!({})));
    }

    #[tokio::test]
    async fn test_missing_params_is_never_dispatched() {
        let registry = Arc::new(RecordingRegistry::default());
        let receiver = CommandReceiver::new(registry.clone());

        let reply = receiver.handle_frame(br#"{"call":"ping"}"#).await;
        assert_eq!(reply, Some(MALFORMED_REQUEST_REPLY));
        assert!(registry.dispatched.lock().is_empty());
    }

    #[tokio::test]
    async fn test_request_limit_fires_once() {
        let registry = Arc::new(RecordingRegistry::default());
        let fired = Arc::new(AtomicU64::new(0));
        let counter = fired.clone();
        let receiver = CommandReceiver::new(registry.clone()).with_request_limit(
            2,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        for _ in 0..3 {
            receiver.handle_frame(br#"{"call":"ping","params":{}}"#).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(receiver.handled_frames(), 3);
        // Frames past the budget are still served until the worker recycles
        assert_eq!(registry.dispatched.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_blank_frame_is_ignored() {
        let registry = Arc::new(RecordingRegistry::default());
        let receiver = CommandReceiver::new(registry.clone());
        assert!(receiver.handle_frame(b"  ").await.is_none());
        assert!(registry.dispatched.lock().is_empty());
    }

    #[tokio::test]
    async fn test_connection_preserves_order_and_replies_once() {
        let registry = Arc::new(RecordingRegistry::default());
        let receiver = CommandReceiver::new(registry.clone());
        let (mut client, server) = tokio::io::duplex(4096);

        let serve = tokio::spawn(async move {
            receiver.serve(server, codec(), "test").await;
        });

        client
            .write_all(
                b"{\"call\":\"a\",\"params\":{}}\r\n{\"call\":\"bad\"}\r\n{\"call\":\"b\",\"params\":{}}\r\n",
            )
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let mut replies = String::new();
        client.read_to_string(&mut replies).await.unwrap();
        serve.await.unwrap();

        assert_eq!(replies, format!("{}\r\n", MALFORMED_REQUEST_REPLY));
        let calls: Vec<String> = registry
            .dispatched
            .lock()
            .iter()
            .map(|m| m.call.clone())
            .collect();
        assert_eq!(calls, vec!["a", "b"]);
    }
}
