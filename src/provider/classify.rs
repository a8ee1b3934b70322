//! Provider error classes and vendor code tables.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Shared classification of provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Timeout,
    RateLimit,
    /// Carrier out of service or circuit open
    CircuitBreak,
    /// Insufficient account balance
    Balance,
    /// Malformed request, template or signature
    Format,
    InvalidPhone,
    Other,
}

/// Codes understood regardless of provider.
const GENERIC_CODES: &[(&str, ErrorType)] = &[
    ("TIMEOUT", ErrorType::Timeout),
    ("timeout", ErrorType::Timeout),
    ("RequestTimeout", ErrorType::Timeout),
    ("RateLimit", ErrorType::RateLimit),
    ("Throttling", ErrorType::RateLimit),
    ("FlowControl", ErrorType::RateLimit),
    ("ServiceUnavailable", ErrorType::CircuitBreak),
    ("InsufficientBalance", ErrorType::Balance),
    ("InvalidParameter", ErrorType::Format),
    ("InvalidPhoneNumber", ErrorType::InvalidPhone),
];

impl ErrorType {
    /// Classify a code with the generic table.
    pub fn from_code(code: &str) -> Self {
        lookup(GENERIC_CODES, code)
    }

    /// Only unclassified failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorType::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Timeout => "timeout",
            ErrorType::RateLimit => "rate_limit",
            ErrorType::CircuitBreak => "circuit_break",
            ErrorType::Balance => "balance",
            ErrorType::Format => "format",
            ErrorType::InvalidPhone => "invalid_phone",
            ErrorType::Other => "other",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Look `code` up in a vendor table; unknown codes are [`ErrorType::Other`].
pub fn lookup(table: &[(&str, ErrorType)], code: &str) -> ErrorType {
    table
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, error_type)| *error_type)
        .unwrap_or(ErrorType::Other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_codes() {
        assert_eq!(ErrorType::from_code("TIMEOUT"), ErrorType::Timeout);
        assert_eq!(ErrorType::from_code("RequestTimeout"), ErrorType::Timeout);
        assert_eq!(ErrorType::from_code("FlowControl"), ErrorType::RateLimit);
        assert_eq!(ErrorType::from_code("ServiceUnavailable"), ErrorType::CircuitBreak);
        assert_eq!(ErrorType::from_code("InsufficientBalance"), ErrorType::Balance);
        assert_eq!(ErrorType::from_code("InvalidParameter"), ErrorType::Format);
        assert_eq!(ErrorType::from_code("InvalidPhoneNumber"), ErrorType::InvalidPhone);
        assert_eq!(ErrorType::from_code("NETWORK_ERROR"), ErrorType::Other);
        assert_eq!(ErrorType::from_code(""), ErrorType::Other);
    }

    #[test]
    fn test_only_other_retries() {
        let permanent = [
            ErrorType::Timeout,
            ErrorType::RateLimit,
            ErrorType::CircuitBreak,
            ErrorType::Balance,
            ErrorType::Format,
            ErrorType::InvalidPhone,
        ];
        for error_type in permanent {
            assert!(!error_type.is_retryable(), "{} should not retry", error_type);
        }
        assert!(ErrorType::Other.is_retryable());
    }

    #[test]
    fn test_lookup_custom_table() {
        const TABLE: &[(&str, ErrorType)] = &[("E_BAL", ErrorType::Balance)];
        assert_eq!(lookup(TABLE, "E_BAL"), ErrorType::Balance);
        assert_eq!(lookup(TABLE, "TIMEOUT"), ErrorType::Other);
    }
}
