//! Simulated provider for development and tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info};

use super::{verify_stored_code, Provider};
use crate::context::Context;
use crate::error::{ProviderError, Result};
use crate::message::{
    MessageStatus, SendRequest, SendResponse, StatusResponse, VerifyRequest, VerifyResponse,
};
use crate::store::{code_key, CounterStore};

/// Default lifetime of a stored verification code.
pub const DEFAULT_CODE_EXPIRY: Duration = Duration::from_secs(5 * 60);
/// Default probability that a send succeeds.
pub const DEFAULT_SUCCESS_RATE: f64 = 0.95;
/// Default number of sent messages remembered for status queries.
pub const DEFAULT_RECORD_CAPACITY: usize = 10_000;

/// A provider that never leaves the process.
///
/// Sends fail at random with a retryable `NETWORK_ERROR` at a fixed rate.
/// Successful sends store a six-digit code (or the caller's `code` param)
/// and are remembered for status queries; once more than the record
/// capacity are held, the oldest are forgotten.
pub struct MockProvider {
    store: Arc<dyn CounterStore>,
    code_expiry: Duration,
    success_rate: f64,
    capacity: usize,
    sent: DashMap<String, StatusResponse>,
    order: Mutex<VecDeque<String>>,
    seq: AtomicU64,
}

impl MockProvider {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            code_expiry: DEFAULT_CODE_EXPIRY,
            success_rate: DEFAULT_SUCCESS_RATE,
            capacity: DEFAULT_RECORD_CAPACITY,
            sent: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Set the success probability, clamped to `0.0..=1.0`.
    pub fn with_success_rate(mut self, rate: f64) -> Self {
        self.success_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_code_expiry(mut self, expiry: Duration) -> Self {
        self.code_expiry = expiry;
        self
    }

    /// How many sent messages to remember, at least one.
    pub fn with_record_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn success_rate(&self) -> f64 {
        self.success_rate
    }

    /// Number of sent messages currently remembered.
    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }

    fn remember(&self, record: StatusResponse) {
        let mut order = self.order.lock();
        order.push_back(record.msg_id.clone());
        self.sent.insert(record.msg_id.clone(), record);

        while order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.sent.remove(&oldest);
            }
        }
    }

    fn next_msg_id(&self) -> String {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("mock_{}_{}", nanos, seq)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn send(&self, _ctx: &Context, req: &SendRequest) -> Result<SendResponse> {
        let (fails, generated) = {
            let mut rng = rand::thread_rng();
            let fails = rng.gen::<f64>() >= self.success_rate;
            (fails, format!("{:06}", rng.gen_range(0..1_000_000)))
        };

        if fails {
            debug!(phone = %req.phone, "Simulated send failure");
            return Err(ProviderError::new("NETWORK_ERROR", "simulated network error")
                .retryable(true)
                .into());
        }

        let code = req.params.get("code").cloned().unwrap_or(generated);
        self.store
            .set(&code_key(&req.biz_id, &req.phone), &code, self.code_expiry)
            .await?;

        let msg_id = self.next_msg_id();
        let now = Utc::now().timestamp();
        self.remember(StatusResponse {
            msg_id: msg_id.clone(),
            phone: req.phone.clone(),
            status: MessageStatus::Delivered,
            sent_time: now,
            receive_time: now,
            error_message: String::new(),
        });

        info!(phone = %req.phone, biz_id = %req.biz_id, msg_id = %msg_id, "Mock message sent");
        Ok(SendResponse::succeeded(msg_id))
    }

    async fn verify(&self, _ctx: &Context, req: &VerifyRequest) -> Result<VerifyResponse> {
        verify_stored_code(self.store.as_ref(), req).await
    }

    async fn query_status(&self, _ctx: &Context, msg_id: &str) -> Result<StatusResponse> {
        if let Some(record) = self.sent.get(msg_id) {
            return Ok(record.clone());
        }

        let now = Utc::now().timestamp();
        Ok(StatusResponse {
            msg_id: msg_id.to_string(),
            phone: String::new(),
            status: MessageStatus::Delivered,
            sent_time: now,
            receive_time: now,
            error_message: String::new(),
        })
    }

    async fn query_status_by_phone(
        &self,
        _ctx: &Context,
        phone: &str,
    ) -> Result<Vec<StatusResponse>> {
        let mut records: Vec<StatusResponse> = self
            .sent
            .iter()
            .filter(|record| record.phone == phone)
            .map(|record| record.value().clone())
            .collect();

        if records.is_empty() {
            let now = Utc::now().timestamp();
            records.push(StatusResponse {
                msg_id: format!("mock_{}_1", phone),
                phone: phone.to_string(),
                status: MessageStatus::Delivered,
                sent_time: now - 300,
                receive_time: now - 299,
                error_message: String::new(),
            });
        }

        records.sort_by(|a, b| b.sent_time.cmp(&a.sent_time));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SmsError;
    use crate::store::MemoryStore;
    use std::collections::HashMap;

    fn create_provider(rate: f64) -> (MockProvider, MemoryStore) {
        let store = MemoryStore::new();
        let provider = MockProvider::new(Arc::new(store.clone())).with_success_rate(rate);
        (provider, store)
    }

    fn request() -> SendRequest {
        SendRequest::new("13800000000", "SMS_001", HashMap::new()).with_biz_id("login")
    }

    #[tokio::test]
    async fn test_send_stores_six_digit_code() {
        let (provider, store) = create_provider(1.0);
        let resp = provider.send(&Context::background(), &request()).await.unwrap();

        assert!(resp.success);
        assert!(resp.msg_id.starts_with("mock_"));

        let code = store
            .get(&code_key("login", "13800000000"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_send_then_verify_round_trip() {
        let (provider, _) = create_provider(1.0);
        let ctx = Context::background();
        provider
            .send(&ctx, &request().with_param("code", "424242"))
            .await
            .unwrap();

        let verify = VerifyRequest::new("13800000000", "424242", "login");
        assert!(provider.verify(&ctx, &verify).await.unwrap().success);
        assert!(!provider.verify(&ctx, &verify).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_zero_success_rate_always_fails_retryably() {
        let (provider, store) = create_provider(0.0);
        let err = provider
            .send(&Context::background(), &request())
            .await
            .unwrap_err();

        assert!(matches!(err, SmsError::Provider(ref e) if e.code == "NETWORK_ERROR"));
        assert!(err.is_retryable());
        assert!(store.is_empty());
        assert_eq!(provider.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_status_of_sent_message() {
        let (provider, _) = create_provider(1.0);
        let ctx = Context::background();
        let resp = provider.send(&ctx, &request()).await.unwrap();

        let status = provider.query_status(&ctx, &resp.msg_id).await.unwrap();
        assert_eq!(status.msg_id, resp.msg_id);
        assert_eq!(status.phone, "13800000000");
        assert_eq!(status.status, MessageStatus::Delivered);

        let by_phone = provider
            .query_status_by_phone(&ctx, "13800000000")
            .await
            .unwrap();
        assert_eq!(by_phone.len(), 1);
        assert_eq!(by_phone[0].msg_id, resp.msg_id);
    }

    #[tokio::test]
    async fn test_unknown_phone_gets_fabricated_record() {
        let (provider, _) = create_provider(1.0);
        let records = provider
            .query_status_by_phone(&Context::background(), "13900000000")
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].msg_id, "mock_13900000000_1");
        assert_eq!(records[0].sent_time + 1, records[0].receive_time);
    }

    #[tokio::test]
    async fn test_records_are_bounded() {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new());
        let provider = MockProvider::new(store)
            .with_success_rate(1.0)
            .with_record_capacity(3);
        let ctx = Context::background();

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(provider.send(&ctx, &request()).await.unwrap().msg_id);
        }

        assert_eq!(provider.sent_count(), 3);
        // The two oldest were forgotten and now read as fabricated records.
        assert_eq!(provider.query_status(&ctx, &ids[0]).await.unwrap().phone, "");
        assert_eq!(
            provider.query_status(&ctx, &ids[4]).await.unwrap().phone,
            "13800000000"
        );
    }

    #[test]
    fn test_success_rate_is_clamped() {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new());
        assert_eq!(MockProvider::new(store.clone()).success_rate(), DEFAULT_SUCCESS_RATE);
        assert_eq!(MockProvider::new(store.clone()).with_success_rate(7.0).success_rate(), 1.0);
        assert_eq!(MockProvider::new(store).with_success_rate(-1.0).success_rate(), 0.0);
    }
}
