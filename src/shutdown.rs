//! Root cancellation handle.
//!
//! The single root `CancellationToken` propagates through every task
//! (§5). Unlike the polling `Arc<AtomicBool>` flag this lineage has used
//! elsewhere, a token can be awaited directly inside a `select!`, so
//! connection reads and channel sends can be interrupted mid-suspension
//! rather than only at loop boundaries. `interruptible_sleep` is kept for
//! call sites that cannot easily take a `select!` branch.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self { token: CancellationToken::new() }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        info!("shutdown requested, cancelling root token");
        self.token.cancel();
    }

    /// Spawns a task that cancels the root token on ctrl-c.
    pub fn spawn_signal_handler(&self) {
        let handle = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received");
                handle.cancel();
            }
        });
    }

    /// Sleeps for `duration` unless cancelled first; polls in 50ms steps so
    /// callers that only have a flag (not a `select!`-friendly context)
    /// still observe cancellation promptly.
    pub async fn interruptible_sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let step = Duration::from_millis(50);
        loop {
            if self.token.is_cancelled() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let remaining = deadline - now;
            tokio::time::sleep(remaining.min(step)).await;
        }
    }

    /// Awaits cancellation; suitable as a `select!` branch.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}
