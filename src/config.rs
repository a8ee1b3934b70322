//! Configuration management for smsgate.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SmsError};
use crate::message::DEFAULT_COUNTRY_CODE;
use crate::provider::{AliyunConfig, RetryConfig};
use crate::ratelimit::LimiterConfig;

/// Prefix of environment overrides, e.g. `SMSGATE__LIMITER__PHONE_PER_DAY=5`.
pub const ENV_PREFIX: &str = "SMSGATE";

/// Main configuration for the smsgate binary and [`crate::Client::from_config`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Rate limiter ceilings
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Retry policy for provider calls
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub client: ClientSettings,

    /// Daily ceiling per business id
    #[serde(default)]
    pub quotas: HashMap<String, u32>,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub provider: ProviderSettings,
}

/// Client behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Wrap the provider with retries
    #[serde(default)]
    pub enable_retry: bool,

    /// Dialing prefix for requests without one
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            enable_retry: false,
            default_country_code: default_country_code(),
        }
    }
}

fn default_country_code() -> String {
    DEFAULT_COUNTRY_CODE.to_string()
}

/// Where counters and verification codes live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreSettings {
    /// Process memory; counters are not shared between instances
    #[default]
    Memory,
    /// A Redis server shared by every instance
    Redis { url: String },
}

/// Which carrier to send through.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderSettings {
    Mock(MockSettings),
    Aliyun(AliyunConfig),
}

impl Default for ProviderSettings {
    fn default() -> Self {
        ProviderSettings::Mock(MockSettings::default())
    }
}

/// Simulated provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockSettings {
    /// Probability that a send succeeds
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,

    #[serde(
        default = "default_code_expiry",
        rename = "code_expiry_secs",
        with = "serde_duration::secs"
    )]
    pub code_expiry: Duration,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            success_rate: default_success_rate(),
            code_expiry: default_code_expiry(),
        }
    }
}

fn default_success_rate() -> f64 {
    0.95
}

fn default_code_expiry() -> Duration {
    Duration::from_secs(5 * 60)
}

impl AppConfig {
    /// Parse configuration from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| SmsError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Layer defaults, an optional YAML file and `SMSGATE__*` environment
    /// variables, in that order of precedence.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&AppConfig::default()).map_err(config_error)?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = path {
            let path = path.to_str().ok_or_else(|| {
                SmsError::Config(format!("config path is not UTF-8: {}", path.display()))
            })?;
            builder = builder.add_source(File::new(path, FileFormat::Yaml));
        }

        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(config_error)?
            .try_deserialize()
            .map_err(config_error)
    }
}

fn config_error(err: config::ConfigError) -> SmsError {
    SmsError::Config(err.to_string())
}

/// `serde(with = ...)` adapters storing a [`Duration`] as an integer.
pub(crate) mod serde_duration {
    pub mod millis {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Duration,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            serializer.serialize_u64(value.as_millis() as u64)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
            u64::deserialize(deserializer).map(Duration::from_millis)
        }
    }

    pub mod secs {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Duration,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            serializer.serialize_u64(value.as_secs())
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
            u64::deserialize(deserializer).map(Duration::from_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.limiter, LimiterConfig::default());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.retry_delay, Duration::from_secs(2));
        assert!(!config.client.enable_retry);
        assert_eq!(config.client.default_country_code, "+86");
        assert!(config.quotas.is_empty());
        assert_eq!(config.store, StoreSettings::Memory);
        assert!(matches!(
            config.provider,
            ProviderSettings::Mock(ref mock) if *mock == MockSettings::default()
        ));
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
limiter:
  phone_per_minute: 2
retry:
  max_retries: 5
  retry_delay_ms: 250
client:
  enable_retry: true
quotas:
  login: 5
  register: 1
store:
  type: redis
  url: redis://127.0.0.1:6379
provider:
  type: aliyun
  access_key_id: id
  access_key_secret: secret
  sign_name: Acme
  code_expiry_secs: 120
  timeout_ms: 3000
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.limiter.phone_per_minute, 2);
        assert_eq!(config.limiter.phone_per_hour, 3);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.retry_delay, Duration::from_millis(250));
        assert!(config.client.enable_retry);
        assert_eq!(config.client.default_country_code, "+86");
        assert_eq!(config.quotas.get("login"), Some(&5));
        assert_eq!(
            config.store,
            StoreSettings::Redis {
                url: "redis://127.0.0.1:6379".to_string()
            }
        );

        let ProviderSettings::Aliyun(aliyun) = config.provider else {
            panic!("expected aliyun provider");
        };
        assert_eq!(aliyun.sign_name, "Acme");
        assert_eq!(aliyun.code_expiry, Duration::from_secs(120));
        assert_eq!(aliyun.timeout, Duration::from_millis(3000));
        assert_eq!(aliyun.region_id, "cn-hangzhou");
    }

    #[test]
    fn test_mock_provider_section() {
        let config = AppConfig::from_yaml("provider:\n  type: mock\n  success_rate: 1.0\n").unwrap();
        let ProviderSettings::Mock(mock) = config.provider else {
            panic!("expected mock provider");
        };
        assert_eq!(mock.success_rate, 1.0);
        assert_eq!(mock.code_expiry, Duration::from_secs(300));
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = AppConfig::from_yaml("limiter: not-a-map").unwrap_err();
        assert!(matches!(err, SmsError::Config(_)));
    }

    #[test]
    fn test_load_layers_file_and_environment() {
        let path = std::env::temp_dir().join(format!("smsgate-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "limiter:\n  phone_per_day: 4\nquotas:\n  login: 7\n").unwrap();
        std::env::set_var("SMSGATE__RETRY__MAX_RETRIES", "9");

        let config = AppConfig::load(Some(path.as_path())).unwrap();
        std::env::remove_var("SMSGATE__RETRY__MAX_RETRIES");
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.limiter.phone_per_day, 4);
        assert_eq!(config.limiter.phone_per_minute, 1);
        assert_eq!(config.quotas.get("login"), Some(&7));
        assert_eq!(config.retry.max_retries, 9);
        assert_eq!(config.retry.retry_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let path = std::env::temp_dir().join("smsgate-does-not-exist.yaml");
        let err = AppConfig::load(Some(path.as_path())).unwrap_err();
        assert!(matches!(err, SmsError::Config(_)));
    }
}
