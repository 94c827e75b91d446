//! HTTP client used for every call to another member.
//!
//! Transport-level failures (connect errors, timeouts) are retried with
//! exponential backoff and jitter. Error responses carry an `ErrorBody` and
//! are turned back into the exact `GridError` the remote side raised.

use crate::error::{ErrorBody, GridError, Result};

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

const MAX_BACKOFF_MULTIPLIER: u64 = 8;

#[derive(Clone)]
pub struct PeerClient {
    http_client: reqwest::Client,
    timeout: Duration,
    attempts: usize,
    backoff_ms: u64,
}

impl PeerClient {
    pub fn new(timeout: Duration, attempts: usize, backoff_ms: u64) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            timeout,
            attempts: attempts.max(1),
            backoff_ms,
        }
    }

    pub async fn post<T, R>(&self, url: String, payload: &T) -> Result<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let response = self.post_with_retry(url, payload).await?;
        Self::decode(response).await
    }

    pub async fn get<R: DeserializeOwned>(&self, url: String) -> Result<R> {
        let response = self.get_with_retry(url).await?;
        Self::decode(response).await
    }

    async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<R>().await?);
        }

        match response.json::<ErrorBody>().await {
            Ok(body) => Err(body.into()),
            Err(_) if status == StatusCode::NOT_FOUND => {
                Err(GridError::Transport(format!("endpoint not found ({status})")))
            }
            Err(e) => Err(GridError::Transport(format!(
                "request failed with {status}: {e}"
            ))),
        }
    }

    async fn post_with_retry<T: Serialize>(
        &self,
        url: String,
        payload: &T,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = self.backoff_ms;

        for attempt in 0..self.attempts {
            let response = self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(self.timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(e.into());
                    }
                    tracing::debug!("POST {} failed (attempt {}): {}", url, attempt + 1, e);
                    delay_ms = self.pause(delay_ms).await;
                }
            }
        }

        Err(GridError::Transport("Retry attempts exhausted".into()))
    }

    async fn get_with_retry(&self, url: String) -> Result<reqwest::Response> {
        let mut delay_ms = self.backoff_ms;

        for attempt in 0..self.attempts {
            let response = self
                .http_client
                .get(url.clone())
                .timeout(self.timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(e.into());
                    }
                    tracing::debug!("GET {} failed (attempt {}): {}", url, attempt + 1, e);
                    delay_ms = self.pause(delay_ms).await;
                }
            }
        }

        Err(GridError::Transport("Retry attempts exhausted".into()))
    }

    /// Sleeps for `delay_ms` plus jitter and returns the next delay.
    async fn pause(&self, delay_ms: u64) -> u64 {
        let jitter = rand::random::<u64>() % 50;
        tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
        (delay_ms * 2).min(self.backoff_ms.max(1) * MAX_BACKOFF_MULTIPLIER)
    }
}
