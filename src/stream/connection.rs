//! One duplex transport to the exchange's market channel (§4.2).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use crate::metrics::Metrics;
use crate::reconnect::{Reconnector, ReconnectConfig};
use crate::shutdown::ShutdownHandle;
use crate::wire::{decode_inbound, InitialSubscribe, OperationFrame};

/// A read-frame floor large enough for large snapshots (§4.2).
const READ_BUFFER_FLOOR: usize = 1024 * 1024;
const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct StreamConnectionConfig {
    pub ping_interval: Duration,
    pub message_buffer: usize,
    pub reconnect: ReconnectConfig,
}

#[derive(Error, Debug)]
pub enum SubscribeError {
    #[error("no live transport; tracked for resubscription on reconnect")]
    TrackedForLater,
    #[error("write failed: {0}")]
    WriteFailed(String),
}

/// Decoded message paired with the connection it arrived on, as handed
/// to the pool multiplexer.
#[derive(Debug, Clone)]
pub struct ConnectionMessage {
    pub connection_id: usize,
    pub message: crate::wire::InboundMessage,
}

/// One shard of the stream pool: owns a websocket connection, its
/// subscription set, and the reader/pinger/reconnector tasks that keep
/// it alive.
pub struct StreamConnection {
    pub id: usize,
    url: String,
    config: StreamConnectionConfig,
    tracked: Arc<Mutex<HashSet<String>>>,
    write_tx: Arc<Mutex<Option<mpsc::UnboundedSender<WsMessage>>>>,
    connected: Arc<AtomicBool>,
    shutdown: ShutdownHandle,
    metrics: Metrics,
}

impl StreamConnection {
    /// Spawns the connection's background tasks and returns a handle plus
    /// the bounded receiver of decoded messages.
    pub fn spawn(
        id: usize,
        url: String,
        config: StreamConnectionConfig,
        shutdown: ShutdownHandle,
        metrics: Metrics,
    ) -> (Arc<Self>, mpsc::Receiver<ConnectionMessage>) {
        let (out_tx, out_rx) = mpsc::channel(config.message_buffer);

        let connection = Arc::new(Self {
            id,
            url,
            config,
            tracked: Arc::new(Mutex::new(HashSet::new())),
            write_tx: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            shutdown,
            metrics,
        });

        let reader_handle = connection.clone();
        tokio::spawn(async move { reader_handle.run_connection_loop(out_tx).await });

        let pinger_handle = connection.clone();
        tokio::spawn(async move { pinger_handle.run_pinger().await });

        (connection, out_rx)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().len()
    }

    /// Adds `token_ids` to the subscribed set and, if a transport is
    /// live, emits the appropriate outbound frame.
    pub fn subscribe(&self, token_ids: Vec<String>) -> Result<(), SubscribeError> {
        if token_ids.is_empty() {
            return Ok(());
        }
        let (new_ids, was_first) = {
            let mut tracked = self.tracked.lock();
            let was_first = tracked.is_empty();
            let new_ids: Vec<String> = token_ids
                .into_iter()
                .filter(|id| tracked.insert(id.clone()))
                .collect();
            (new_ids, was_first)
        };
        if new_ids.is_empty() {
            return Ok(());
        }

        let guard = self.write_tx.lock();
        let Some(tx) = guard.as_ref() else {
            drop(guard);
            return Err(SubscribeError::TrackedForLater);
        };

        let frame = if was_first {
            serde_json::to_string(&InitialSubscribe::new(new_ids.clone()))
        } else {
            serde_json::to_string(&OperationFrame::subscribe(new_ids.clone()))
        }
        .expect("serialize subscribe frame");

        if tx.send(WsMessage::Text(frame)).is_err() {
            drop(guard);
            let mut tracked = self.tracked.lock();
            for id in &new_ids {
                tracked.remove(id);
            }
            return Err(SubscribeError::WriteFailed("channel closed".into()));
        }
        Ok(())
    }

    /// Removes `token_ids` from the subscribed set and, if a transport
    /// is live, emits the unsubscribe frame. Rolls back on write
    /// failure.
    pub fn unsubscribe(&self, token_ids: Vec<String>) -> Result<(), SubscribeError> {
        if token_ids.is_empty() {
            return Ok(());
        }
        let removed: Vec<String> = {
            let mut tracked = self.tracked.lock();
            token_ids.iter().filter(|id| tracked.remove(*id)).cloned().collect()
        };
        if removed.is_empty() {
            return Ok(());
        }

        let guard = self.write_tx.lock();
        let Some(tx) = guard.as_ref() else {
            drop(guard);
            return Err(SubscribeError::TrackedForLater);
        };

        let frame = serde_json::to_string(&OperationFrame::unsubscribe(removed.clone()))
            .expect("serialize unsubscribe frame");

        if tx.send(WsMessage::Text(frame)).is_err() {
            drop(guard);
            let mut tracked = self.tracked.lock();
            for id in &removed {
                tracked.insert(id.clone());
            }
            return Err(SubscribeError::WriteFailed("channel closed".into()));
        }
        Ok(())
    }

    fn tracked_snapshot(&self) -> Vec<String> {
        self.tracked.lock().iter().cloned().collect()
    }

    async fn run_pinger(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.config.ping_interval) => {}
            }
            if self.is_connected() {
                let guard = self.write_tx.lock();
                if let Some(tx) = guard.as_ref() {
                    let _ = tx.send(WsMessage::Ping(Vec::new()));
                }
            }
        }
    }

    async fn run_connection_loop(self: Arc<Self>, out_tx: mpsc::Sender<ConnectionMessage>) {
        let mut reconnector = Reconnector::new(self.config.reconnect.clone());
        loop {
            if !self.shutdown.is_running() {
                return;
            }

            let id = self.id;
            let url = self.url.clone();
            let ws_config = WebSocketConfig {
                max_message_size: Some(MAX_FRAME_SIZE),
                max_frame_size: Some(MAX_FRAME_SIZE),
                read_buffer_size: READ_BUFFER_FLOOR,
                ..Default::default()
            };

            let connect_result = reconnector
                .reconnect(&self.shutdown, None, |_attempt| {
                    let url = url.clone();
                    let ws_config = ws_config.clone();
                    async move {
                        connect_async_with_config(url, Some(ws_config), false)
                            .await
                            .map(|(stream, _resp)| stream)
                            .map_err(|e| e.to_string())
                    }
                })
                .await;

            let stream = match connect_result {
                Ok(stream) => stream,
                Err(_) => return,
            };

            self.connected.store(true, Ordering::SeqCst);
            debug!(connection_id = id, "connected");

            let (mut sink, mut source) = stream.split();
            let (write_tx, mut write_rx) = mpsc::unbounded_channel::<WsMessage>();
            *self.write_tx.lock() = Some(write_tx);

            let full_set = self.tracked_snapshot();
            if !full_set.is_empty() {
                let frame = serde_json::to_string(&InitialSubscribe::new(full_set))
                    .expect("serialize resubscribe frame");
                let _ = sink.send(WsMessage::Text(frame)).await;
            }

            let writer_task = tokio::spawn(async move {
                while let Some(msg) = write_rx.recv().await {
                    if sink.send(msg).await.is_err() {
                        break;
                    }
                }
            });

            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        writer_task.abort();
                        self.connected.store(false, Ordering::SeqCst);
                        return;
                    }
                    frame = source.next() => {
                        match frame {
                            Some(Ok(WsMessage::Text(text))) => {
                                let decoded = decode_inbound(&text);
                                let item = ConnectionMessage { connection_id: id, message: decoded };
                                if out_tx.try_send(item).is_err() {
                                    self.metrics.messages_dropped.with_label_values(&["pool_buffer_full"]).inc();
                                }
                            }
                            Some(Ok(WsMessage::Pong(_))) => {}
                            Some(Ok(WsMessage::Close(_))) | None => {
                                warn!(connection_id = id, "transport closed");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!(connection_id = id, error = %err, "transport read error");
                                break;
                            }
                        }
                    }
                }
            }

            self.connected.store(false, Ordering::SeqCst);
            *self.write_tx.lock() = None;
            writer_task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribing_same_token_twice_tracks_once() {
        let tracked: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
        {
            let mut t = tracked.lock();
            t.insert("A".to_string());
        }
        let new_ids: Vec<String> = {
            let mut t = tracked.lock();
            vec!["A".to_string()]
                .into_iter()
                .filter(|id| t.insert(id.clone()))
                .collect()
        };
        assert!(new_ids.is_empty());
        assert_eq!(tracked.lock().len(), 1);
    }

    #[test]
    fn unsubscribe_then_subscribe_restores_tracked_set() {
        let tracked: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
        tracked.lock().insert("A".to_string());
        tracked.lock().remove("A");
        tracked.lock().insert("A".to_string());
        assert_eq!(tracked.lock().len(), 1);
        assert!(tracked.lock().contains("A"));
    }
}
