//! Request and response value types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SmsError};

/// Dialing prefix used when a request carries no country code.
pub const DEFAULT_COUNTRY_CODE: &str = "+86";

/// An outbound message request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendRequest {
    /// Phone number without the country code
    pub phone: String,
    /// Dialing prefix such as `+86`
    #[serde(default)]
    pub country_code: Option<String>,
    /// Template identifier registered with the carrier
    pub template: String,
    /// Named template parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// Business identifier (`login`, `register`, ...)
    #[serde(default)]
    pub biz_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    /// Signature name override
    #[serde(default)]
    pub sign_name: Option<String>,
    /// External tracking identifier
    #[serde(default)]
    pub out_id: Option<String>,
}

impl SendRequest {
    pub fn new(
        phone: impl Into<String>,
        template: impl Into<String>,
        params: HashMap<String, String>,
    ) -> Self {
        Self {
            phone: phone.into(),
            template: template.into(),
            params,
            ..Default::default()
        }
    }

    pub fn with_country_code(mut self, code: impl Into<String>) -> Self {
        self.country_code = Some(code.into());
        self
    }

    pub fn with_biz_id(mut self, biz_id: impl Into<String>) -> Self {
        self.biz_id = biz_id.into();
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_sign_name(mut self, sign_name: impl Into<String>) -> Self {
        self.sign_name = Some(sign_name.into());
        self
    }

    pub fn with_out_id(mut self, out_id: impl Into<String>) -> Self {
        self.out_id = Some(out_id.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// The routable address: country code followed by the phone number.
    ///
    /// Falls back to `default_code` without touching the request.
    pub fn full_phone(&self, default_code: &str) -> String {
        let code = self
            .country_code
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(default_code);
        format!("{}{}", code, self.phone)
    }

    /// Device id, if present and non-empty.
    pub fn device(&self) -> Option<&str> {
        self.device_id.as_deref().filter(|d| !d.is_empty())
    }

    /// Origin IP, if present and non-empty.
    pub fn origin_ip(&self) -> Option<&str> {
        self.ip.as_deref().filter(|ip| !ip.is_empty())
    }

    /// Reject requests no provider could route.
    pub fn validate(&self) -> Result<()> {
        if self.phone.trim().is_empty() {
            return Err(SmsError::InvalidParams("phone is required".to_string()));
        }
        if self.template.trim().is_empty() {
            return Err(SmsError::InvalidParams("template is required".to_string()));
        }
        Ok(())
    }
}

/// Outcome of a single send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    /// Provider-issued message identifier
    pub msg_id: String,
    pub success: bool,
    pub error_code: String,
    pub error_message: String,
}

impl SendResponse {
    pub fn succeeded(msg_id: impl Into<String>) -> Self {
        Self {
            msg_id: msg_id.into(),
            success: true,
            error_code: String::new(),
            error_message: String::new(),
        }
    }

    pub fn failed(
        msg_id: impl Into<String>,
        error_code: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            msg_id: msg_id.into(),
            success: false,
            error_code: error_code.into(),
            error_message: error_message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub phone: String,
    pub code: String,
    pub biz_id: String,
}

impl VerifyRequest {
    pub fn new(
        phone: impl Into<String>,
        code: impl Into<String>,
        biz_id: impl Into<String>,
    ) -> Self {
        Self {
            phone: phone.into(),
            code: code.into(),
            biz_id: biz_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub message: String,
}

impl VerifyResponse {
    pub fn passed() -> Self {
        Self {
            success: true,
            message: String::new(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Delivery state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Unknown,
    Pending,
    Sent,
    Delivered,
    Failed,
}

/// Delivery record for one message. Identity is the message id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub msg_id: String,
    pub phone: String,
    pub status: MessageStatus,
    /// Epoch seconds
    pub sent_time: i64,
    /// Epoch seconds
    pub receive_time: i64,
    pub error_message: String,
}
