//! The send pipeline: rate limiter, business quota, then provider.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::context::Context;
use crate::error::{Result, SmsError};
use crate::message::{SendRequest, SendResponse, StatusResponse, VerifyRequest, VerifyResponse};
use crate::provider::{Provider, RetryConfig, RetryProvider};
use crate::ratelimit::{LimiterConfig, QuotaManager, QuotaTable, RateLimiter};
use crate::store::CounterStore;

/// Entry point for sending and verifying messages.
///
/// A client owns one rate limiter, one quota manager and one provider chain.
/// Clients built over the same [`CounterStore`] share their counters.
pub struct Client {
    limiter: RateLimiter,
    quota: QuotaManager,
    provider: Arc<dyn Provider>,
}

/// Assembles a [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    store: Option<Arc<dyn CounterStore>>,
    provider: Option<Arc<dyn Provider>>,
    limiter_config: Option<LimiterConfig>,
    retry_config: Option<RetryConfig>,
    enable_retry: bool,
    quotas: QuotaTable,
    clock: Option<Arc<dyn Clock>>,
}

impl ClientBuilder {
    pub fn store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn limiter_config(mut self, config: LimiterConfig) -> Self {
        self.limiter_config = Some(config);
        self
    }

    /// Retry policy; only used when retries are enabled.
    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = Some(config);
        self
    }

    pub fn enable_retry(mut self, enable: bool) -> Self {
        self.enable_retry = enable;
        self
    }

    /// Initial per-business daily ceilings.
    pub fn quotas(mut self, quotas: QuotaTable) -> Self {
        self.quotas = quotas;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<Client> {
        let store = self
            .store
            .ok_or_else(|| SmsError::Config("a counter store is required".to_string()))?;
        let mut provider = self
            .provider
            .ok_or_else(|| SmsError::Config("a provider is required".to_string()))?;

        if self.enable_retry {
            provider = Arc::new(RetryProvider::new(provider, self.retry_config));
        }

        let mut limiter = RateLimiter::new(store.clone(), self.limiter_config);
        let mut quota = QuotaManager::with_quotas(store, self.quotas);
        if let Some(clock) = self.clock {
            limiter = limiter.with_clock(clock.clone());
            quota = quota.with_clock(clock);
        }

        info!(
            provider = provider.name(),
            retry = self.enable_retry,
            "SMS client initialized"
        );

        Ok(Client {
            limiter,
            quota,
            provider,
        })
    }
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Build a client from loaded configuration.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn CounterStore>,
        provider: Arc<dyn Provider>,
    ) -> Result<Self> {
        Self::builder()
            .store(store)
            .provider(provider)
            .limiter_config(config.limiter.clone())
            .retry_config(config.retry.clone())
            .enable_retry(config.client.enable_retry)
            .quotas(config.quotas.clone())
            .build()
    }

    /// Admit and send one message.
    ///
    /// Invalid requests fail before any counter is touched. A rate limit or
    /// quota rejection is returned as-is and the provider is not called.
    #[instrument(skip(self, ctx, req), fields(phone = %req.phone, biz_id = %req.biz_id))]
    pub async fn send(&self, ctx: &Context, req: &SendRequest) -> Result<SendResponse> {
        req.validate()?;

        if let Err(err) = self.limiter.check_and_increment(req).await {
            debug!(error = %err, "Send rejected by rate limiter");
            return Err(err);
        }

        if !req.biz_id.is_empty() {
            if let Err(err) = self.quota.check_and_increment(&req.biz_id).await {
                debug!(error = %err, "Send rejected by business quota");
                return Err(err);
            }
        }

        match self.provider.send(ctx, req).await {
            Ok(resp) => {
                info!(msg_id = %resp.msg_id, "Message sent");
                Ok(resp)
            }
            Err(err) => {
                warn!(error = %err, "Message send failed");
                Err(err)
            }
        }
    }

    /// Check a submitted code. Not rate limited.
    pub async fn verify(&self, ctx: &Context, req: &VerifyRequest) -> Result<VerifyResponse> {
        self.provider.verify(ctx, req).await
    }

    pub async fn query_status(&self, ctx: &Context, msg_id: &str) -> Result<StatusResponse> {
        self.provider.query_status(ctx, msg_id).await
    }

    pub async fn query_status_by_phone(
        &self,
        ctx: &Context,
        phone: &str,
    ) -> Result<Vec<StatusResponse>> {
        self.provider.query_status_by_phone(ctx, phone).await
    }

    /// Today's `(used, max)` for a business id.
    pub async fn get_quota(&self, biz_id: &str) -> Result<(u64, u32)> {
        self.quota.get_quota(biz_id).await
    }

    pub fn set_quota(&self, biz_id: &str, max_per_day: u32) {
        self.quota.set_quota(biz_id, max_per_day);
    }

    pub async fn reset_quota(&self, biz_id: &str) -> Result<()> {
        self.quota.reset_quota(biz_id).await
    }

    /// Sends recorded for `phone` in the current `window` bucket
    /// (`minute`, `hour` or `day`).
    pub async fn get_phone_count(&self, phone: &str, window: &str) -> Result<u64> {
        self.limiter.get_phone_count(phone, window).await
    }

    /// Name of the underlying provider.
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::ProviderError;
    use crate::provider::MockProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use crate::store::MemoryStore;
    use chrono::{Local, TimeZone};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    struct Fixture {
        client: Client,
        provider: Arc<MockProvider>,
        clock: Arc<FixedClock>,
    }

    fn create_client(limiter: LimiterConfig) -> Fixture {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockProvider::new(store.clone()).with_success_rate(1.0));
        let clock = Arc::new(FixedClock::new(
            Local.with_ymd_and_hms(2024, 12, 8, 10, 30, 15).unwrap(),
        ));

        let client = Client::builder()
            .store(store)
            .provider(provider.clone())
            .limiter_config(limiter)
            .clock(clock.clone())
            .build()
            .unwrap();

        Fixture {
            client,
            provider,
            clock,
        }
    }

    fn request(phone: &str) -> SendRequest {
        SendRequest::new(phone, "SMS_001", HashMap::new()).with_biz_id("login")
    }

    #[tokio::test]
    async fn test_limiter_then_quota_scenario() {
        let limiter = LimiterConfig {
            phone_per_minute: 1,
            ..LimiterConfig::default()
        };
        let fixture = create_client(limiter);
        let client = &fixture.client;
        let ctx = Context::background();

        assert_ok!(client.send(&ctx, &request("13800000000")).await);

        let err = client.send(&ctx, &request("13800000000")).await.unwrap_err();
        assert!(matches!(err, SmsError::PhoneRateLimit));

        assert_ok!(client.send(&ctx, &request("13800000001")).await);
        assert_ok!(client.send(&ctx, &request("13800000002")).await);

        let err = client.send(&ctx, &request("13800000003")).await.unwrap_err();
        assert!(matches!(err, SmsError::QuotaExceeded));

        assert_eq!(fixture.provider.sent_count(), 3);
        assert_eq!(client.get_quota("login").await.unwrap(), (3, 3));
    }

    #[tokio::test]
    async fn test_send_then_verify_once() {
        let fixture = create_client(LimiterConfig::default());
        let client = &fixture.client;
        let ctx = Context::background();

        let req = request("13800000000").with_param("code", "135790");
        assert_ok!(client.send(&ctx, &req).await);

        let verify = VerifyRequest::new("13800000000", "135790", "login");
        assert!(client.verify(&ctx, &verify).await.unwrap().success);
        assert!(!client.verify(&ctx, &verify).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_invalid_request_touches_nothing() {
        let fixture = create_client(LimiterConfig::default());
        let client = &fixture.client;

        let req = SendRequest::new("13800000000", "", HashMap::new()).with_biz_id("login");
        let err = client.send(&Context::background(), &req).await.unwrap_err();
        assert!(matches!(err, SmsError::InvalidParams(_)));

        assert_eq!(client.get_phone_count("13800000000", "minute").await.unwrap(), 0);
        assert_eq!(client.get_quota("login").await.unwrap(), (0, 3));
        assert_eq!(fixture.provider.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_biz_id_skips_quota() {
        let fixture = create_client(LimiterConfig::unlimited());
        let client = &fixture.client;
        let ctx = Context::background();

        for i in 0..5 {
            let req = SendRequest::new(format!("1380000000{}", i), "SMS_001", HashMap::new());
            assert_ok!(client.send(&ctx, &req).await);
        }
        assert_eq!(client.get_quota("").await.unwrap().0, 0);
    }

    #[tokio::test]
    async fn test_quota_admin_accessors() {
        let fixture = create_client(LimiterConfig::unlimited());
        let client = &fixture.client;
        let ctx = Context::background();

        client.set_quota("login", 1);
        assert_ok!(client.send(&ctx, &request("13800000000")).await);
        assert_err!(client.send(&ctx, &request("13800000001")).await);

        assert_ok!(client.reset_quota("login").await);
        assert_ok!(client.send(&ctx, &request("13800000002")).await);
    }

    #[tokio::test]
    async fn test_phone_count_follows_clock() {
        let fixture = create_client(LimiterConfig::default());
        let client = &fixture.client;

        assert_ok!(client.send(&Context::background(), &request("13800000000")).await);
        assert_eq!(client.get_phone_count("13800000000", "minute").await.unwrap(), 1);
        assert_eq!(client.get_phone_count("13800000000", "day").await.unwrap(), 1);

        fixture.clock.advance(chrono::Duration::minutes(1));
        assert_eq!(client.get_phone_count("13800000000", "minute").await.unwrap(), 0);
        assert_eq!(client.get_phone_count("13800000000", "hour").await.unwrap(), 1);

        let err = client.get_phone_count("13800000000", "week").await.unwrap_err();
        assert!(matches!(err, SmsError::InvalidWindow(_)));
    }

    #[test]
    fn test_build_requires_store_and_provider() {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new());
        let provider: Arc<dyn Provider> = Arc::new(MockProvider::new(store.clone()));

        let err = Client::builder().provider(provider.clone()).build().err().unwrap();
        assert!(matches!(err, SmsError::Config(_)));

        let err = Client::builder().store(store.clone()).build().err().unwrap();
        assert!(matches!(err, SmsError::Config(_)));

        let client = Client::builder()
            .store(store)
            .provider(provider)
            .enable_retry(true)
            .retry_config(RetryConfig {
                max_retries: 1,
                retry_delay: Duration::from_millis(10),
            })
            .build()
            .unwrap();
        assert_eq!(client.provider_name(), "mock");
    }

    /// Fails the first send with a retryable error, then succeeds.
    #[derive(Default)]
    struct FlakyProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn send(&self, _ctx: &Context, _req: &SendRequest) -> Result<SendResponse> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ProviderError::new("NETWORK_ERROR", "connection reset")
                    .retryable(true)
                    .into());
            }
            Ok(SendResponse::succeeded("msg-ok"))
        }

        async fn verify(&self, _ctx: &Context, _req: &VerifyRequest) -> Result<VerifyResponse> {
            Ok(VerifyResponse::rejected("no code"))
        }

        async fn query_status(&self, _ctx: &Context, msg_id: &str) -> Result<StatusResponse> {
            Err(ProviderError::new("NOT_SUPPORTED", msg_id.to_string())
                .retryable(false)
                .into())
        }

        async fn query_status_by_phone(
            &self,
            _ctx: &Context,
            _phone: &str,
        ) -> Result<Vec<StatusResponse>> {
            Ok(Vec::new())
        }
    }

    fn flaky_client(enable_retry: bool) -> (Client, Arc<FlakyProvider>) {
        let provider = Arc::new(FlakyProvider::default());
        let client = Client::builder()
            .store(Arc::new(MemoryStore::new()))
            .provider(provider.clone())
            .limiter_config(LimiterConfig::unlimited())
            .enable_retry(enable_retry)
            .retry_config(RetryConfig {
                max_retries: 2,
                retry_delay: Duration::from_secs(2),
            })
            .build()
            .unwrap();
        (client, provider)
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_retry_wraps_provider() {
        let (client, provider) = flaky_client(true);

        let resp = client
            .send(&Context::background(), &request("13800000000"))
            .await
            .unwrap();
        assert_eq!(resp.msg_id, "msg-ok");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_disabled_calls_provider_once() {
        let (client, provider) = flaky_client(false);

        let err = client
            .send(&Context::background(), &request("13800000000"))
            .await
            .unwrap_err();
        assert!(matches!(err, SmsError::Provider(ref e) if e.code == "NETWORK_ERROR"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_from_config_installs_quotas() {
        let mut config = AppConfig::default();
        config.quotas.insert("register".to_string(), 7);

        let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockProvider::new(store.clone()));
        let client = Client::from_config(&config, store, provider).unwrap();

        assert_eq!(client.provider_name(), "mock");
        assert_eq!(client.quota.max_per_day("register"), 7);
        assert_eq!(client.quota.max_per_day("login"), 3);
    }
}
