//! Error types for smsgate.

use std::fmt;

use thiserror::Error;

use crate::message::SendResponse;
use crate::provider::ErrorType;

/// Boxed cause carried by a [`ProviderError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for smsgate operations.
#[derive(Error, Debug)]
pub enum SmsError {
    /// Per-phone ceiling reached for the current window
    #[error("phone send rate exceeded")]
    PhoneRateLimit,

    /// Per-device ceiling reached for today
    #[error("device send rate exceeded")]
    DeviceRateLimit,

    /// Per-IP ceiling reached for today
    #[error("IP send rate exceeded")]
    IpRateLimit,

    /// Business quota used up for today
    #[error("business quota exceeded")]
    QuotaExceeded,

    /// Malformed request
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// Unknown counter window name
    #[error("invalid window: {0}")]
    InvalidWindow(String),

    // The three below are classifier sentinels. Providers in this crate
    // report through `Provider`; other `Provider` impls may return these.
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("insufficient balance")]
    BalanceNotEnough,

    /// Structured error reported by a provider
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline passed
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Every attempt allowed by the retry policy failed
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: Box<SmsError>,
    },

    /// Counter store failure
    #[error("counter store error: {0}")]
    Store(String),

    /// Configuration-related errors
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SmsError {
    /// Whether repeating the same call may succeed without caller-side changes.
    ///
    /// An explicit flag on a [`ProviderError`] wins. A provider error without
    /// a flag is classified by its code. Everything else goes through the
    /// sentinel table, and anything not listed there is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            SmsError::Provider(err) => err.is_retryable(),
            SmsError::RetriesExhausted { .. } => false,
            SmsError::Timeout
            | SmsError::PhoneRateLimit
            | SmsError::DeviceRateLimit
            | SmsError::IpRateLimit
            | SmsError::QuotaExceeded
            | SmsError::BalanceNotEnough
            | SmsError::InvalidParams(_)
            | SmsError::InvalidWindow(_)
            | SmsError::Config(_)
            | SmsError::Cancelled
            | SmsError::DeadlineExceeded => false,
            _ => true,
        }
    }

    /// True for cancellation or deadline expiry.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SmsError::Cancelled | SmsError::DeadlineExceeded)
    }

    /// The failed send response attached to a provider error, if any.
    pub fn send_response(&self) -> Option<&SendResponse> {
        match self {
            SmsError::Provider(err) => err.response.as_ref(),
            _ => None,
        }
    }
}

/// Result type alias for smsgate operations.
pub type Result<T> = std::result::Result<T, SmsError>;

/// A provider-reported failure: vendor code, message and retry hint.
#[derive(Debug)]
pub struct ProviderError {
    /// Vendor error code
    pub code: String,
    /// Human readable message
    pub message: String,
    /// Explicit retry decision; `None` defers to the code mapping
    pub retryable: Option<bool>,
    /// The failed response, when the provider produced one
    pub response: Option<SendResponse>,
    source: Option<BoxError>,
}

impl ProviderError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable: None,
            response: None,
            source: None,
        }
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub fn with_response(mut self, response: SendResponse) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// The shared error class for this error's code.
    pub fn error_type(&self) -> ErrorType {
        ErrorType::from_code(&self.code)
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
            .unwrap_or_else(|| self.error_type().is_retryable())
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.message, source),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}
