//! Reconnector (§4.1): exponential backoff with one-sided jitter and a
//! caller-supplied async connect callback.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};

use crate::shutdown::ShutdownHandle;

#[derive(Error, Debug)]
pub enum ReconnectError {
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_pct: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_pct: 0.2,
        }
    }
}

/// Holds the one piece of mutable state the reconnector owns: the
/// current backoff duration.
pub struct Reconnector {
    config: ReconnectConfig,
    current: Duration,
}

impl Reconnector {
    pub fn new(config: ReconnectConfig) -> Self {
        let current = config.initial_delay;
        Self { config, current }
    }

    /// Sleeps for `current * (1 + U[0, jitter_pct])`, then invokes
    /// `connect`. On success, resets `current` to `initial_delay`. On
    /// failure, multiplies `current` by `multiplier`, clamps to
    /// `max_delay`, and retries — up to `max_attempts` times if set,
    /// otherwise indefinitely until cancelled.
    pub async fn reconnect<F, Fut, T, E>(
        &mut self,
        shutdown: &ShutdownHandle,
        max_attempts: Option<usize>,
        mut connect: F,
    ) -> Result<T, ReconnectError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: usize = 0;
        loop {
            if !shutdown.is_running() {
                return Err(ReconnectError::Cancelled);
            }
            if let Some(max) = max_attempts {
                if attempt >= max {
                    return Err(ReconnectError::Cancelled);
                }
            }

            let jitter: f64 = rand::thread_rng().gen_range(0.0..self.config.jitter_pct);
            let sleep_for = self.current.mul_f64(1.0 + jitter);

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = shutdown.cancelled() => return Err(ReconnectError::Cancelled),
            }

            match connect(attempt).await {
                Ok(value) => {
                    info!(attempt, "reconnect succeeded, resetting backoff");
                    self.current = self.config.initial_delay;
                    return Ok(value);
                }
                Err(_err) => {
                    let next = self.current.mul_f64(self.config.multiplier).min(self.config.max_delay);
                    warn!(attempt, delay_ms = next.as_millis() as u64, "reconnect attempt failed");
                    self.current = next;
                    attempt += 1;
                }
            }
        }
    }

    pub fn current_delay(&self) -> Duration {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn resets_to_initial_after_success() {
        let mut reconnector = Reconnector::new(ReconnectConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(50),
            multiplier: 4.0,
            jitter_pct: 0.0,
        });
        let shutdown = ShutdownHandle::new();
        let attempts = Arc::new(AtomicUsize::new(0));

        let a = attempts.clone();
        let result = reconnector
            .reconnect(&shutdown, None, move |_n| {
                let a = a.clone();
                async move {
                    let n = a.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err::<(), &'static str>("boom")
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(reconnector.current_delay(), Duration::from_millis(1));
    }

    #[tokio::test]
    async fn cancellation_interrupts_reconnect() {
        let mut reconnector = Reconnector::new(ReconnectConfig {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_pct: 0.0,
        });
        let shutdown = ShutdownHandle::new();
        shutdown.cancel();

        let result = reconnector
            .reconnect(&shutdown, None, |_n| async { Ok::<(), &'static str>(()) })
            .await;

        assert!(matches!(result, Err(ReconnectError::Cancelled)));
    }

    #[tokio::test]
    async fn backoff_multiplies_and_clamps() {
        let mut reconnector = Reconnector::new(ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(25),
            multiplier: 3.0,
            jitter_pct: 0.0,
        });
        let shutdown = ShutdownHandle::new();

        let _ = reconnector
            .reconnect(&shutdown, Some(1), |_n| async { Err::<(), &'static str>("boom") })
            .await;

        assert_eq!(reconnector.current_delay(), Duration::from_millis(25));
    }
}
