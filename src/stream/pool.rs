//! Stream pool (§4.3): fixed-size connection set, consistent-hash
//! subscription sharding, single multiplexed output channel.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::metrics::Metrics;
use crate::shutdown::ShutdownHandle;

use super::connection::{ConnectionMessage, StreamConnection, StreamConnectionConfig};

/// `assignment(token_id) = crc32(token_id) mod pool_size` — stable
/// across subscribe/unsubscribe cycles (invariant 1).
pub fn assign_connection(token_id: &str, pool_size: usize) -> usize {
    debug_assert!(pool_size > 0);
    (crc32fast::hash(token_id.as_bytes()) as usize) % pool_size
}

pub struct StreamPool {
    connections: Vec<Arc<StreamConnection>>,
    metrics: Metrics,
}

impl StreamPool {
    /// Spawns `pool_size` connections plus the multiplexer task, and
    /// returns the pool handle plus a single bounded output channel.
    pub fn spawn(
        url: String,
        pool_size: usize,
        conn_config: StreamConnectionConfig,
        output_buffer: usize,
        shutdown: ShutdownHandle,
        metrics: Metrics,
    ) -> (Self, mpsc::Receiver<ConnectionMessage>) {
        let mut connections = Vec::with_capacity(pool_size);
        let mut receivers = Vec::with_capacity(pool_size);

        for id in 0..pool_size {
            let (conn, rx) = StreamConnection::spawn(
                id,
                url.clone(),
                conn_config,
                shutdown.clone(),
                metrics.clone(),
            );
            connections.push(conn);
            receivers.push(rx);
        }

        metrics.pool_size.set(pool_size as f64);

        let (out_tx, out_rx) = mpsc::channel(output_buffer);
        tokio::spawn(multiplex(receivers, out_tx, shutdown, metrics.clone()));

        (Self { connections, metrics }, out_rx)
    }

    pub fn pool_size(&self) -> usize {
        self.connections.len()
    }

    /// Splits `token_ids` by hash assignment and issues concurrent
    /// per-connection subscribes.
    pub fn subscribe(&self, token_ids: Vec<String>) {
        let mut by_conn: Vec<Vec<String>> = vec![Vec::new(); self.connections.len()];
        for id in token_ids {
            let idx = assign_connection(&id, self.connections.len());
            by_conn[idx].push(id);
        }
        for (idx, ids) in by_conn.into_iter().enumerate() {
            if ids.is_empty() {
                continue;
            }
            if let Err(err) = self.connections[idx].subscribe(ids) {
                debug!(connection = idx, %err, "subscribe deferred");
            }
            self.metrics
                .subscriptions_per_connection
                .with_label_values(&[&idx.to_string()])
                .observe(self.connections[idx].tracked_count() as f64);
        }
    }

    pub fn unsubscribe(&self, token_ids: Vec<String>) {
        let mut by_conn: Vec<Vec<String>> = vec![Vec::new(); self.connections.len()];
        for id in token_ids {
            let idx = assign_connection(&id, self.connections.len());
            by_conn[idx].push(id);
        }
        for (idx, ids) in by_conn.into_iter().enumerate() {
            if ids.is_empty() {
                continue;
            }
            if let Err(err) = self.connections[idx].unsubscribe(ids) {
                debug!(connection = idx, %err, "unsubscribe deferred");
            }
        }
    }
}

/// Selects across every per-connection receiver, forwarding decoded
/// messages onto the single pool output channel. Each receiver is
/// wrapped as a stream and merged with `select_all`; a sub-channel that
/// closes simply drops out of the merged set on its own, which is the
/// stream-combinator equivalent of "swap for a sentinel the select
/// loop ignores" (§4.3).
async fn multiplex(
    receivers: Vec<mpsc::Receiver<ConnectionMessage>>,
    out_tx: mpsc::Sender<ConnectionMessage>,
    shutdown: ShutdownHandle,
    metrics: Metrics,
) {
    use tokio_stream::wrappers::ReceiverStream;
    use tokio_stream::StreamExt;

    let streams: Vec<_> = receivers.into_iter().map(ReceiverStream::new).collect();
    let mut merged = futures_util::stream::select_all(streams);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            item = merged.next() => {
                match item {
                    Some(msg) => {
                        if out_tx.try_send(msg).is_err() {
                            metrics.messages_dropped.with_label_values(&["multiplex_output_full"]).inc();
                        }
                    }
                    None => return,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn assignment_is_stable_for_fixed_pool_size() {
        let a = assign_connection("token-123", 4);
        let b = assign_connection("token-123", 4);
        assert_eq!(a, b);
    }

    #[test]
    fn assignment_is_in_range() {
        for pool_size in 1..8usize {
            for tid in ["a", "b", "token-xyz", ""] {
                assert!(assign_connection(tid, pool_size) < pool_size);
            }
        }
    }

    proptest! {
        #[test]
        fn assignment_matches_formula(token in "[a-zA-Z0-9]{0,40}", pool_size in 1usize..64) {
            let expected = (crc32fast::hash(token.as_bytes()) as usize) % pool_size;
            prop_assert_eq!(assign_connection(&token, pool_size), expected);
        }
    }
}
