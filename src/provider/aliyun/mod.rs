//! Aliyun Dysms provider over the signed HTTP RPC API.

mod signer;
mod wire;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use self::signer::Signer;
use self::wire::{Envelope, QuerySendDetailsBody, SendSmsBody};
use super::classify::{lookup, ErrorType};
use super::{verify_stored_code, Provider};
use crate::config::serde_duration;
use crate::context::Context;
use crate::error::{ProviderError, Result, SmsError};
use crate::message::{
    SendRequest, SendResponse, StatusResponse, VerifyRequest, VerifyResponse,
    DEFAULT_COUNTRY_CODE,
};
use crate::store::{code_key, CounterStore};

/// Aliyun codes and their shared classes.
pub const ALIYUN_ERROR_CODES: &[(&str, ErrorType)] = &[
    ("isv.BUSINESS_LIMIT_CONTROL", ErrorType::RateLimit),
    ("isv.OUT_OF_SERVICE", ErrorType::CircuitBreak),
    ("isv.AMOUNT_NOT_ENOUGH", ErrorType::Balance),
    ("isv.INVALID_PARAMETERS", ErrorType::Format),
    ("isv.MOBILE_NUMBER_ILLEGAL", ErrorType::InvalidPhone),
    ("isv.MOBILE_COUNT_OVER_LIMIT", ErrorType::Format),
    ("isp.RAM_PERMISSION_DENY", ErrorType::Format),
    ("isv.TEMPLATE_MISSING_PARAMETERS", ErrorType::Format),
    ("isv.SMS_TEMPLATE_ILLEGAL", ErrorType::Format),
    ("isv.SMS_SIGNATURE_ILLEGAL", ErrorType::Format),
    ("isv.SIGN_NAME_ILLEGAL", ErrorType::Format),
    ("RequestTimeout", ErrorType::Timeout),
    ("Throttling.User", ErrorType::RateLimit),
    ("Throttling", ErrorType::RateLimit),
];

/// Classify an Aliyun error code.
pub fn error_type(code: &str) -> ErrorType {
    lookup(ALIYUN_ERROR_CODES, code)
}

const QUERY_PAGE_SIZE: &str = "10";

fn default_endpoint() -> String {
    "dysmsapi.aliyuncs.com".to_string()
}

fn default_region_id() -> String {
    "cn-hangzhou".to_string()
}

fn default_code_expiry() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_country_code() -> String {
    DEFAULT_COUNTRY_CODE.to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_lookback_days() -> u32 {
    2
}

/// Account and behaviour settings for [`AliyunProvider`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliyunConfig {
    pub access_key_id: String,
    pub access_key_secret: String,
    /// Signature used when the request has none
    #[serde(default)]
    pub sign_name: String,
    /// Host name, or a full base URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_region_id")]
    pub region_id: String,
    #[serde(
        default = "default_code_expiry",
        rename = "code_expiry_secs",
        with = "serde_duration::secs"
    )]
    pub code_expiry: Duration,
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
    #[serde(
        default = "default_timeout",
        rename = "timeout_ms",
        with = "serde_duration::millis"
    )]
    pub timeout: Duration,
    /// Days of history searched by phone, today included
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

impl AliyunConfig {
    pub fn new(access_key_id: impl Into<String>, access_key_secret: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            access_key_secret: access_key_secret.into(),
            sign_name: String::new(),
            endpoint: default_endpoint(),
            region_id: default_region_id(),
            code_expiry: default_code_expiry(),
            default_country_code: default_country_code(),
            timeout: default_timeout(),
            lookback_days: default_lookback_days(),
        }
    }

    pub fn with_sign_name(mut self, sign_name: impl Into<String>) -> Self {
        self.sign_name = sign_name.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.access_key_id.is_empty() || self.access_key_secret.is_empty() {
            return Err(SmsError::Config(
                "aliyun access key id and secret are required".to_string(),
            ));
        }
        Ok(())
    }

    fn base_url(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("https://{}", endpoint)
        }
    }
}

/// Why an RPC call produced no usable body.
#[derive(Debug)]
enum RpcError {
    Transport(reqwest::Error),
    Decode(String),
    Interrupted(SmsError),
}

impl RpcError {
    /// The request URL carries the access key id and signature; keep it out
    /// of messages and logs.
    fn transport(err: reqwest::Error) -> Self {
        RpcError::Transport(err.without_url())
    }
}

/// Sends through Aliyun's SMS service and keeps verification codes in a
/// [`CounterStore`].
pub struct AliyunProvider {
    http: reqwest::Client,
    signer: Signer,
    store: Arc<dyn CounterStore>,
    config: AliyunConfig,
    base_url: String,
}

impl AliyunProvider {
    pub fn new(store: Arc<dyn CounterStore>, config: AliyunConfig) -> Result<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SmsError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            signer: Signer::new(
                &config.access_key_id,
                &config.access_key_secret,
                &config.region_id,
            ),
            store,
            base_url: config.base_url(),
            config,
        })
    }

    pub fn config(&self) -> &AliyunConfig {
        &self.config
    }

    /// Issue one signed GET, racing it against the caller's context.
    async fn call<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        action: &str,
        params: BTreeMap<String, String>,
    ) -> std::result::Result<T, RpcError> {
        if let Some(err) = ctx.err() {
            return Err(RpcError::Interrupted(err));
        }

        let url = format!("{}/?{}", self.base_url, self.signer.sign_now(action, params));

        tokio::select! {
            biased;
            err = ctx.done() => Err(RpcError::Interrupted(err)),
            result = self.fetch(&url) => result,
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, url: &str) -> std::result::Result<T, RpcError> {
        let response = self.http.get(url).send().await.map_err(RpcError::transport)?;
        let status = response.status();
        let body = response.text().await.map_err(RpcError::transport)?;

        // Error statuses still carry a JSON envelope with the vendor code.
        serde_json::from_str(&body)
            .map_err(|e| RpcError::Decode(format!("HTTP {}: {}", status, e)))
    }

    fn send_error(err: RpcError) -> SmsError {
        match err {
            RpcError::Interrupted(err) => err,
            // Only a carrier-reported RequestTimeout is permanent; a local
            // timeout is a transport failure like any other.
            RpcError::Transport(e) if e.is_timeout() => {
                ProviderError::new("NETWORK_ERROR", "request to aliyun timed out")
                    .retryable(true)
                    .with_source(e)
                    .into()
            }
            RpcError::Transport(e) => ProviderError::new("NETWORK_ERROR", "request to aliyun failed")
                .retryable(true)
                .with_source(e)
                .into(),
            RpcError::Decode(message) => ProviderError::new("RESPONSE_ERROR", message)
                .retryable(true)
                .into(),
        }
    }

    fn query_error(err: RpcError) -> SmsError {
        match err {
            RpcError::Interrupted(err) => err,
            RpcError::Transport(e) => ProviderError::new("QUERY_ERROR", "status query failed")
                .retryable(true)
                .with_source(e)
                .into(),
            RpcError::Decode(message) => ProviderError::new("QUERY_ERROR", message)
                .retryable(true)
                .into(),
        }
    }

    fn api_error(envelope: &Envelope, retryable: bool) -> ProviderError {
        ProviderError::new(envelope.code.clone(), envelope.describe()).retryable(retryable)
    }
}

#[async_trait]
impl Provider for AliyunProvider {
    fn name(&self) -> &'static str {
        "aliyun"
    }

    async fn send(&self, ctx: &Context, req: &SendRequest) -> Result<SendResponse> {
        let template_param = serde_json::to_string(&req.params).map_err(|e| {
            ProviderError::new("PARAM_ERROR", "failed to encode template params")
                .retryable(false)
                .with_source(e)
        })?;

        let sign_name = req
            .sign_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(self.config.sign_name.as_str());

        let mut params = BTreeMap::new();
        params.insert(
            "PhoneNumbers".to_string(),
            req.full_phone(&self.config.default_country_code),
        );
        params.insert("SignName".to_string(), sign_name.to_string());
        params.insert("TemplateCode".to_string(), req.template.clone());
        params.insert("TemplateParam".to_string(), template_param);
        if let Some(out_id) = req.out_id.as_deref().filter(|id| !id.is_empty()) {
            params.insert("OutId".to_string(), out_id.to_string());
        }

        let body: SendSmsBody = self
            .call(ctx, "SendSms", params)
            .await
            .map_err(Self::send_error)?;

        if !body.envelope.is_ok() {
            let retryable = error_type(&body.envelope.code).is_retryable();
            warn!(
                phone = %req.phone,
                code = %body.envelope.code,
                request_id = %body.envelope.request_id,
                retryable,
                "Aliyun rejected message"
            );
            let response = SendResponse::failed(
                body.biz_id.clone(),
                body.envelope.code.clone(),
                body.envelope.message.clone(),
            );
            return Err(Self::api_error(&body.envelope, retryable)
                .with_response(response)
                .into());
        }

        if let Some(code) = req.params.get("code") {
            let key = code_key(&req.biz_id, &req.phone);
            if let Err(err) = self.store.set(&key, code, self.config.code_expiry).await {
                warn!(key = %key, error = %err, "Failed to store verification code");
            }
        }

        info!(phone = %req.phone, biz_id = %req.biz_id, msg_id = %body.biz_id, "Aliyun message sent");
        Ok(SendResponse::succeeded(body.biz_id))
    }

    async fn verify(&self, _ctx: &Context, req: &VerifyRequest) -> Result<VerifyResponse> {
        verify_stored_code(self.store.as_ref(), req).await
    }

    async fn query_status(&self, _ctx: &Context, _msg_id: &str) -> Result<StatusResponse> {
        Err(ProviderError::new(
            "NOT_SUPPORTED",
            "aliyun looks messages up by phone number, use query_status_by_phone",
        )
        .retryable(false)
        .into())
    }

    async fn query_status_by_phone(
        &self,
        ctx: &Context,
        phone: &str,
    ) -> Result<Vec<StatusResponse>> {
        let days = self.config.lookback_days.max(1);
        let today = Local::now();

        let mut records = Vec::new();
        let mut failures = 0;
        let mut last_error = None;

        for offset in 0..days {
            let send_date = (today - chrono::Duration::days(i64::from(offset)))
                .format("%Y%m%d")
                .to_string();

            let mut params = BTreeMap::new();
            params.insert("PhoneNumber".to_string(), phone.to_string());
            params.insert("SendDate".to_string(), send_date.clone());
            params.insert("PageSize".to_string(), QUERY_PAGE_SIZE.to_string());
            params.insert("CurrentPage".to_string(), "1".to_string());

            match self
                .call::<QuerySendDetailsBody>(ctx, "QuerySendDetails", params)
                .await
            {
                Ok(body) if body.envelope.is_ok() => records.extend(body.into_records()),
                Ok(body) => {
                    debug!(
                        phone = %phone,
                        date = %send_date,
                        code = %body.envelope.code,
                        "Skipping failed status page"
                    );
                }
                Err(RpcError::Interrupted(err)) => return Err(err),
                Err(err) => {
                    warn!(phone = %phone, date = %send_date, error = ?err, "Status query failed");
                    failures += 1;
                    last_error = Some(Self::query_error(err));
                }
            }
        }

        if failures == days {
            if let Some(err) = last_error {
                return Err(err);
            }
        }

        Ok(records)
    }
}
