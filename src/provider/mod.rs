//! Message providers.
//!
//! A [`Provider`] performs the actual transmission, code verification and
//! status lookup. Concrete providers talk to a carrier or simulate one;
//! [`RetryProvider`] decorates any provider with retries.

pub mod aliyun;
mod classify;
mod mock;
mod retry;

use async_trait::async_trait;
use tracing::debug;

use crate::context::Context;
use crate::error::Result;
use crate::message::{SendRequest, SendResponse, StatusResponse, VerifyRequest, VerifyResponse};
use crate::store::{code_key, CounterStore};

pub use aliyun::{AliyunConfig, AliyunProvider};
pub use classify::{lookup, ErrorType};
pub use mock::MockProvider;
pub use retry::{RetryConfig, RetryProvider};

/// Capability set shared by every provider and provider decorator.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider key, e.g. "aliyun" or "mock".
    fn name(&self) -> &'static str;

    /// Transmit one message.
    ///
    /// A carrier-reported failure is an `Err(SmsError::Provider(_))` whose
    /// error carries the failed [`SendResponse`] alongside the vendor code.
    async fn send(&self, ctx: &Context, req: &SendRequest) -> Result<SendResponse>;

    /// Check a submitted code against the stored one. A match consumes the
    /// code. A mismatch or a missing code is a failed response, not an error.
    async fn verify(&self, ctx: &Context, req: &VerifyRequest) -> Result<VerifyResponse>;

    /// Look a message up by id.
    async fn query_status(&self, ctx: &Context, msg_id: &str) -> Result<StatusResponse>;

    /// Recent delivery records for a phone number.
    async fn query_status_by_phone(
        &self,
        ctx: &Context,
        phone: &str,
    ) -> Result<Vec<StatusResponse>>;
}

/// Verify `req` against the code stored under its business id and phone.
///
/// The stored code is claimed by deleting it; only the caller whose delete
/// removed the key succeeds, so a code verifies at most once.
pub(crate) async fn verify_stored_code(
    store: &dyn CounterStore,
    req: &VerifyRequest,
) -> Result<VerifyResponse> {
    let key = code_key(&req.biz_id, &req.phone);

    let Some(stored) = store.get(&key).await? else {
        debug!(phone = %req.phone, biz_id = %req.biz_id, "No stored verification code");
        return Ok(VerifyResponse::rejected("code not found or expired"));
    };

    if stored != req.code {
        debug!(phone = %req.phone, biz_id = %req.biz_id, "Verification code mismatch");
        return Ok(VerifyResponse::rejected("code does not match"));
    }

    if !store.del(&key).await? {
        return Ok(VerifyResponse::rejected("code already used"));
    }

    Ok(VerifyResponse::passed())
}
