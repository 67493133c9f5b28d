//! JSON-RPC HTTP Client - Rate-limited, Retrying Reads
//!
//! Wraps reqwest with a `governor` rate limiter and exponential-backoff
//! retries. Only ever used for idempotent reads, so retrying a request
//! after a transport failure is always safe.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::types::{RpcRequest, RpcResponse};

/// Configuration for the JSON-RPC client.
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
  /// Endpoint URL.
  pub url: String,
  /// Request timeout.
  pub timeout: Duration,
  /// Maximum retries on transient errors.
  pub max_retries: u32,
  /// Base delay between retries (exponential backoff).
  pub retry_base_delay: Duration,
  /// Sustained request rate.
  pub requests_per_second: NonZeroU32,
}

impl Default for RpcClientConfig {
  fn default() -> Self {
    Self {
      url: "https://api.devnet.solana.com".to_string(),
      timeout: Duration::from_secs(15),
      max_retries: 3,
      retry_base_delay: Duration::from_millis(250),
      requests_per_second: NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN),
    }
  }
}

/// Rate-limited JSON-RPC client.
pub struct RpcClient {
  /// Underlying HTTP client.
  http: Client,
  /// Client configuration.
  config: RpcClientConfig,
  /// Request pacing.
  limiter: DefaultDirectRateLimiter,
  /// JSON-RPC request id counter.
  next_id: AtomicU64,
}

impl RpcClient {
  /// Create a new JSON-RPC client.
  pub fn new(config: RpcClientConfig) -> Result<Self> {
    let http = Client::builder()
      .timeout(config.timeout)
      .pool_max_idle_per_host(5)
      .build()
      .context("Failed to build HTTP client")?;

    let limiter = RateLimiter::direct(Quota::per_second(config.requests_per_second));

    Ok(Self {
      http,
      config,
      limiter,
      next_id: AtomicU64::new(1),
    })
  }

  /// Call `method` with `params`, retrying transient failures.
  ///
  /// Errors reported by the node in the JSON-RPC `error` object are not
  /// retried; they are returned with the node's message verbatim.
  pub async fn call<P, T>(&self, method: &str, params: P) -> Result<T>
  where
    P: Serialize + Send + Sync,
    T: DeserializeOwned,
  {
    self
      .call_optional(method, params)
      .await?
      .with_context(|| format!("{method} returned neither result nor error"))
  }

  /// Like [`call`](Self::call), for methods whose result may be `null`.
  pub async fn call_optional<P, T>(&self, method: &str, params: P) -> Result<Option<T>>
  where
    P: Serialize + Send + Sync,
    T: DeserializeOwned,
  {
    let request = RpcRequest {
      jsonrpc: "2.0",
      id: self.next_id.fetch_add(1, Ordering::Relaxed),
      method,
      params,
    };

    let mut last_error = None;

    for attempt in 0..=self.config.max_retries {
      if attempt > 0 {
        let delay = backoff_delay(self.config.retry_base_delay, attempt);
        debug!(method, attempt, delay_ms = delay.as_millis(), "Retrying RPC call");
        sleep(delay).await;
      }

      self.limiter.until_ready().await;

      match self.http.post(&self.config.url).json(&request).send().await {
        Ok(response) => match response.status() {
          StatusCode::OK => {
            let body: RpcResponse<T> = response
              .json()
              .await
              .with_context(|| format!("Invalid {method} response"))?;
            if let Some(error) = body.error {
              return Err(anyhow::anyhow!("{} (code {})", error.message, error.code));
            }
            return Ok(body.result);
          }
          StatusCode::TOO_MANY_REQUESTS => {
            warn!(method, "Rate limited by RPC node, backing off");
            last_error = Some(anyhow::anyhow!("Rate limited"));
          }
          status if status.is_server_error() => {
            warn!(method, status = %status, "RPC server error, retrying");
            last_error = Some(anyhow::anyhow!("Server error: {status}"));
          }
          status => {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("RPC error {status}: {body}"));
          }
        },
        Err(e) => {
          warn!(method, error = %e, attempt, "RPC request failed");
          last_error = Some(e.into());
        }
      }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Max retries exceeded")))
  }
}

/// Delay before retry `attempt` (1-based): `base * 2^(attempt - 1)`, saturating.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
  base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}
