//! Retry decorator for providers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use super::classify::ErrorType;
use super::Provider;
use crate::config::serde_duration;
use crate::context::Context;
use crate::error::{ProviderError, Result, SmsError};
use crate::message::{SendRequest, SendResponse, StatusResponse, VerifyRequest, VerifyResponse};

/// How often and how patiently to retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts after the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay; the wait before attempt `n` is `retry_delay * n`
    #[serde(
        default = "default_retry_delay",
        rename = "retry_delay_ms",
        with = "serde_duration::millis"
    )]
    pub retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(2)
}

impl RetryConfig {
    /// Linear backoff: the wait before retry `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt)
    }

    /// Total number of calls the policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Wraps a provider and re-invokes it on transient failures.
///
/// `send` and both status queries retry; `verify` passes straight through
/// because a single-use code must not be submitted twice blindly.
pub struct RetryProvider {
    inner: Arc<dyn Provider>,
    config: RetryConfig,
}

impl RetryProvider {
    /// Wrap `inner`; `None` uses [`RetryConfig::default`].
    pub fn new(inner: Arc<dyn Provider>, config: Option<RetryConfig>) -> Self {
        Self {
            inner,
            config: config.unwrap_or_default(),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Sleep before retry `attempt`, or return early if `ctx` fires.
    async fn backoff(&self, ctx: &Context, attempt: u32) -> Result<()> {
        let delay = self.config.delay_for(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Waiting before retry");

        tokio::select! {
            biased;
            err = ctx.done() => Err(err),
            _ = sleep(delay) => Ok(()),
        }
    }

    fn exhausted(&self, operation: &'static str, last: Option<SmsError>) -> SmsError {
        let attempts = self.config.max_attempts();
        let source = last.unwrap_or_else(|| {
            ProviderError::new("UNKNOWN_ERROR", "no attempt recorded a failure").into()
        });
        warn!(operation, attempts, error = %source, "Retries exhausted");
        SmsError::RetriesExhausted {
            operation,
            attempts,
            source: Box::new(source),
        }
    }

    /// Retry loop for calls whose only failure signal is the error.
    async fn run<T, F, Fut>(&self, ctx: &Context, operation: &'static str, mut call: F) -> Result<T>
    where
        T: Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        let mut last_err = None;

        for attempt in 0..self.config.max_attempts() {
            if attempt > 0 {
                self.backoff(ctx, attempt).await?;
            }

            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    warn!(operation, attempt, error = %err, "Retryable provider failure");
                    last_err = Some(err);
                }
            }
        }

        Err(self.exhausted(operation, last_err))
    }
}

#[async_trait]
impl Provider for RetryProvider {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    #[instrument(skip(self, ctx, req), fields(phone = %req.phone, biz_id = %req.biz_id))]
    async fn send(&self, ctx: &Context, req: &SendRequest) -> Result<SendResponse> {
        let mut last_err = None;

        for attempt in 0..self.config.max_attempts() {
            if attempt > 0 {
                self.backoff(ctx, attempt).await?;
            }

            match self.inner.send(ctx, req).await {
                Ok(resp) if resp.success => return Ok(resp),
                Ok(resp) => {
                    // Failed without an error: the response code decides.
                    if !ErrorType::from_code(&resp.error_code).is_retryable() {
                        return Ok(resp);
                    }
                    warn!(attempt, code = %resp.error_code, "Send failed, retrying");
                    let err = ProviderError::new(resp.error_code.clone(), resp.error_message.clone())
                        .with_response(resp);
                    last_err = Some(err.into());
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    warn!(attempt, error = %err, "Send failed, retrying");
                    last_err = Some(err);
                }
            }
        }

        Err(self.exhausted("send", last_err))
    }

    async fn verify(&self, ctx: &Context, req: &VerifyRequest) -> Result<VerifyResponse> {
        self.inner.verify(ctx, req).await
    }

    async fn query_status(&self, ctx: &Context, msg_id: &str) -> Result<StatusResponse> {
        self.run(ctx, "query_status", || self.inner.query_status(ctx, msg_id))
            .await
    }

    async fn query_status_by_phone(
        &self,
        ctx: &Context,
        phone: &str,
    ) -> Result<Vec<StatusResponse>> {
        self.run(ctx, "query_status_by_phone", || {
            self.inner.query_status_by_phone(ctx, phone)
        })
        .await
    }
}
