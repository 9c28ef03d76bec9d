//! Explicit reconnection policy
//!
//! The connection manager never retries on its own. Callers that want to
//! survive backend restarts wrap `connect` in [`connect_with_backoff`], which
//! waits an exponentially growing, jittered delay between attempts and gives up
//! after a fixed number of retries.

use crate::config::Endpoint;
use crate::connection::ConnectionManager;
use crate::error::MonitorError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Exponential backoff with jitter and a retry cap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first retry (milliseconds)
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay (milliseconds)
    pub max_delay_ms: u64,
    /// Growth factor applied per attempt
    pub multiplier: f64,
    /// Retries after the first failed attempt; 0 disables retrying
    pub max_retries: u32,
    /// Fraction of the delay randomized in both directions (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_retries: 5,
            jitter: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never retries
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.multiplier < 1.0 {
            return Err(MonitorError::ConfigError(
                "reconnect.multiplier must be >= 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(MonitorError::ConfigError(
                "reconnect.jitter must be within 0.0 - 1.0".to_string(),
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(MonitorError::ConfigError(
                "reconnect.initial_delay_ms exceeds max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(millis.min(self.max_delay_ms as f64) as u64)
    }

    /// Delay before retry number `attempt`, with jitter applied from `rng`
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt).as_millis() as f64;
        if self.jitter <= 0.0 || base <= 0.0 {
            return Duration::from_millis(base as u64);
        }
        let spread = base * self.jitter;
        let jittered = rng.gen_range((base - spread)..=(base + spread));
        Duration::from_millis(jittered.clamp(0.0, self.max_delay_ms as f64) as u64)
    }
}

/// Connect, retrying failed attempts according to `policy`.
///
/// Returns the error of the last attempt once retries are exhausted.
pub async fn connect_with_backoff(
    manager: &ConnectionManager,
    endpoint: &Endpoint,
    policy: &ReconnectPolicy,
) -> Result<(), MonitorError> {
    let mut attempt = 0;
    loop {
        match manager.connect(endpoint).await {
            Ok(()) => {
                if attempt > 0 {
                    info!(endpoint = %endpoint, attempt, "reconnected");
                }
                return Ok(());
            }
            Err(e) if attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_with(attempt, &mut rand::thread_rng());
                warn!(
                    endpoint = %endpoint,
                    error = %e,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "connect failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_base_delay_grows_and_caps() {
        let policy = ReconnectPolicy {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            max_retries: 10,
            jitter: 0.0,
        };
        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(4), Duration::from_millis(800));
        assert_eq!(policy.base_delay(5), Duration::from_millis(1_000));
        assert_eq!(policy.base_delay(30), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = ReconnectPolicy {
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            max_retries: 3,
            jitter: 0.25,
        };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let delay = policy.delay_with(2, &mut rng).as_millis();
            assert!((1_500..=2_500).contains(&delay), "delay {} out of band", delay);
        }
    }

    #[test]
    fn test_validate() {
        assert!(ReconnectPolicy::default().validate().is_ok());
        assert!(ReconnectPolicy {
            jitter: 1.5,
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(ReconnectPolicy {
            multiplier: 0.5,
            ..Default::default()
        }
        .validate()
        .is_err());
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        // Port 1 on loopback is reserved and refuses connections
        let endpoint = Endpoint::new("127.0.0.1", 1);
        let manager = ConnectionManager::new();
        let policy = ReconnectPolicy {
            initial_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 2.0,
            max_retries: 2,
            jitter: 0.0,
        };

        let result = connect_with_backoff(&manager, &endpoint, &policy).await;
        assert!(matches!(result, Err(MonitorError::ConnectError(_))));
        assert_eq!(manager.state(), crate::types::ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_session_outlives_failed_first_attempt() {
        use crate::dispatcher::lock;
        use crate::types::ConnectionState;
        use futures_util::StreamExt;
        use std::sync::{Arc, Mutex};

        // Reserve a port, then free it so the first attempt is refused
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let (close_tx, close_rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
                .await
                .unwrap();
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let _ = close_rx.await;
            ws.close(None).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let manager = ConnectionManager::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _handle = manager.on_state_change(move |state| lock(&sink).push(*state));

        let policy = ReconnectPolicy {
            initial_delay_ms: 50,
            max_delay_ms: 200,
            multiplier: 2.0,
            max_retries: 10,
            jitter: 0.0,
        };
        connect_with_backoff(&manager, &Endpoint::new("127.0.0.1", port), &policy)
            .await
            .unwrap();

        {
            let seen = lock(&seen);
            let failed = seen.iter().position(|s| *s == ConnectionState::Failed);
            let open = seen.iter().position(|s| *s == ConnectionState::Open);
            assert!(failed.is_some());
            assert!(failed < open);
        }

        // The earlier failure must not end the live session
        let still_open =
            tokio::time::timeout(Duration::from_millis(100), manager.wait_until_ended()).await;
        assert!(still_open.is_err());
        assert!(manager.is_open());

        let wait = manager.wait_until_ended();
        tokio::pin!(wait);
        assert!(tokio::time::timeout(Duration::from_millis(10), &mut wait)
            .await
            .is_err());
        let _ = close_tx.send(());
        assert_eq!(wait.await, ConnectionState::Closed);
        server.await.unwrap();
    }
}
