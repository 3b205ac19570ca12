//! Configuration management for the sign-in client
//!
//! [`AuthConfig`] is the per-controller configuration object: every optional
//! field carries its own default. [`Config`] loads the process-level settings
//! for the CLI from environment variables, with `.env` support.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;

use crate::auth::state::AuthStatus;
use crate::error::AuthError;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Language used for user-facing messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    Zh,
}

impl Locale {
    /// Parse locale from string
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "en" | "en-us" | "english" => Ok(Locale::En),
            "zh" | "zh-cn" | "chinese" => Ok(Locale::Zh),
            _ => Err(ConfigError::InvalidValue(format!(
                "Invalid locale: '{}'. Expected: en or zh",
                s
            ))),
        }
    }

    /// Notice shown when the user declines the signature request
    pub fn sign_in_cancelled(&self) -> &'static str {
        match self {
            Locale::En => "Sign-in cancelled",
            Locale::Zh => "用户取消签名",
        }
    }
}

pub type SuccessCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&AuthError) + Send + Sync>;
pub type StatusCallback = Arc<dyn Fn(AuthStatus) + Send + Sync>;

pub const DEFAULT_DOMAIN: &str = "localhost";
pub const DEFAULT_API_BASE_URL: &str = "/api/v1/auth";
pub const DEFAULT_CHAIN_ID: u64 = 1;
pub const DEFAULT_AUTO_RESET: Duration = Duration::from_secs(3);
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_CHALLENGE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Sign-in configuration
#[derive(Clone)]
pub struct AuthConfig {
    /// Domain the user signs in to; also the host of the URI line
    pub domain: String,

    /// Auth API base. Relative paths are resolved against `https://{domain}`
    pub api_base_url: String,

    /// Chain id rendered into the challenge text
    pub chain_id: u64,

    /// Grace window before a terminal status returns to `Idle`
    pub auto_reset_after: Duration,

    /// Expiration used when the backend does not bound the challenge
    pub challenge_ttl: Duration,

    /// Optional namespace prepended to the session keys, for several apps sharing one store
    pub storage_namespace: Option<String>,

    /// Timeout for each backend request
    pub request_timeout: Duration,

    pub locale: Locale,

    pub on_success: Option<SuccessCallback>,
    pub on_error: Option<ErrorCallback>,
    pub on_status_change: Option<StatusCallback>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            domain: DEFAULT_DOMAIN.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            chain_id: DEFAULT_CHAIN_ID,
            auto_reset_after: DEFAULT_AUTO_RESET,
            challenge_ttl: DEFAULT_CHALLENGE_TTL,
            storage_namespace: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            locale: Locale::default(),
            on_success: None,
            on_error: None,
            on_status_change: None,
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("domain", &self.domain)
            .field("api_base_url", &self.api_base_url)
            .field("chain_id", &self.chain_id)
            .field("auto_reset_after", &self.auto_reset_after)
            .field("challenge_ttl", &self.challenge_ttl)
            .field("storage_namespace", &self.storage_namespace)
            .field("request_timeout", &self.request_timeout)
            .field("locale", &self.locale)
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_status_change", &self.on_status_change.is_some())
            .finish()
    }
}

impl AuthConfig {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Self::default()
        }
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn with_auto_reset_after(mut self, grace: Duration) -> Self {
        self.auto_reset_after = grace;
        self
    }

    pub fn with_challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = ttl;
        self
    }

    pub fn with_storage_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.storage_namespace = Some(namespace.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    pub fn on_success(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&AuthError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_status_change(mut self, f: impl Fn(AuthStatus) + Send + Sync + 'static) -> Self {
        self.on_status_change = Some(Arc::new(f));
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domain.trim().is_empty() {
            return Err(ConfigError::InvalidValue("Domain must not be empty".to_string()));
        }
        if self.chain_id == 0 {
            return Err(ConfigError::InvalidValue(
                "Chain id must be greater than 0".to_string(),
            ));
        }
        if self.challenge_ttl.is_zero() || self.challenge_ttl > MAX_CHALLENGE_TTL {
            return Err(ConfigError::InvalidValue(format!(
                "Challenge TTL must be between 1s and {}s",
                MAX_CHALLENGE_TTL.as_secs()
            )));
        }
        if matches!(&self.storage_namespace, Some(ns) if ns.trim().is_empty()) {
            return Err(ConfigError::InvalidValue(
                "Storage namespace must not be blank".to_string(),
            ));
        }
        self.api_base()?;
        Ok(())
    }

    /// Absolute API base URL, without a trailing slash
    pub fn api_base(&self) -> Result<Url, ConfigError> {
        let raw = self.api_base_url.trim_end_matches('/');
        let joined = if raw.starts_with("http://") || raw.starts_with("https://") {
            raw.to_string()
        } else {
            let has_scheme =
                self.domain.starts_with("http://") || self.domain.starts_with("https://");
            let origin = if has_scheme {
                self.domain.trim_end_matches('/').to_string()
            } else {
                format!("https://{}", self.domain)
            };
            format!("{}/{}", origin, raw.trim_start_matches('/'))
        };

        Url::parse(&joined).map_err(|e| {
            ConfigError::InvalidValue(format!("Invalid API base URL '{}': {}", joined, e))
        })
    }
}

/// Process configuration for the CLI
#[derive(Debug, Clone)]
pub struct Config {
    /// Sign-in configuration (callbacks are attached by the caller)
    pub auth: AuthConfig,

    /// File holding the persisted session
    pub session_file: PathBuf,

    /// Use the in-process stub backend instead of HTTP
    pub use_stub_backend: bool,

    /// Address of the wallet to sign in with (WALLET_ADDRESS)
    pub wallet_address: Option<String>,

    /// Log level (RUST_LOG)
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        dotenvy::dotenv().ok();

        let domain = env::var("AUTH_DOMAIN").unwrap_or_else(|_| DEFAULT_DOMAIN.to_string());

        let api_base_url =
            env::var("AUTH_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string());

        let chain_id = env::var("AUTH_CHAIN_ID")
            .unwrap_or_else(|_| DEFAULT_CHAIN_ID.to_string())
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidValue("AUTH_CHAIN_ID must be a number".to_string()))?;

        let auto_reset_after = env::var("AUTH_RESET_GRACE_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_AUTO_RESET);

        let challenge_ttl = env::var("AUTH_CHALLENGE_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CHALLENGE_TTL);

        let storage_namespace = env::var("AUTH_STORAGE_NAMESPACE").ok();

        let request_timeout = env::var("AUTH_REQUEST_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let locale = env::var("AUTH_LOCALE")
            .map(|s| Locale::from_str(&s))
            .unwrap_or(Ok(Locale::En))?;

        let session_file = env::var("AUTH_SESSION_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".stellovault-session.json"));

        let use_stub_backend = env::var("AUTH_USE_STUB_BACKEND")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let wallet_address = env::var("WALLET_ADDRESS")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let auth = AuthConfig {
            domain,
            api_base_url,
            chain_id,
            auto_reset_after,
            challenge_ttl,
            storage_namespace,
            request_timeout,
            locale,
            ..AuthConfig::default()
        };
        auth.validate()?;

        Ok(Config {
            auth,
            session_file,
            use_stub_backend,
            wallet_address,
            log_level,
        })
    }

    /// Wallet address, required by commands that talk to the wallet
    pub fn require_wallet_address(&self) -> Result<&str, ConfigError> {
        self.wallet_address
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("WALLET_ADDRESS".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AuthConfig::default();
        assert_eq!(config.domain, "localhost");
        assert_eq!(config.api_base_url, "/api/v1/auth");
        assert_eq!(config.chain_id, 1);
        assert_eq!(config.auto_reset_after, Duration::from_secs(3));
        assert_eq!(config.storage_namespace, None);
        assert!(config.on_success.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_relative_base_joined_to_domain() {
        let config = AuthConfig::new("example.com");
        assert_eq!(
            config.api_base().unwrap().as_str(),
            "https://example.com/api/v1/auth"
        );
    }

    #[test]
    fn test_absolute_base_kept() {
        let config =
            AuthConfig::new("example.com").with_api_base_url("http://127.0.0.1:8080/auth/");
        assert_eq!(config.api_base().unwrap().as_str(), "http://127.0.0.1:8080/auth");
    }

    #[test]
    fn test_domain_with_scheme() {
        let config = AuthConfig::new("https://api.example.com/");
        assert_eq!(
            config.api_base().unwrap().as_str(),
            "https://api.example.com/api/v1/auth"
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(AuthConfig::new("  ").validate().is_err());
        assert!(AuthConfig::new("example.com").with_chain_id(0).validate().is_err());
        assert!(AuthConfig::new("example.com")
            .with_storage_namespace(" ")
            .validate()
            .is_err());
        assert!(AuthConfig::new("example.com")
            .with_challenge_ttl(Duration::from_secs(10_000_000_000_000))
            .validate()
            .is_err());
        assert!(AuthConfig::new("example.com")
            .with_challenge_ttl(Duration::ZERO)
            .validate()
            .is_err());
        assert!(AuthConfig::new("example.com")
            .with_challenge_ttl(MAX_CHALLENGE_TTL)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_missing_wallet_address() {
        let config = Config {
            auth: AuthConfig::default(),
            session_file: PathBuf::from("session.json"),
            use_stub_backend: true,
            wallet_address: None,
            log_level: "info".to_string(),
        };
        let err = config.require_wallet_address().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref name) if name == "WALLET_ADDRESS"));
    }

    #[test]
    fn test_locale_from_str() {
        assert_eq!(Locale::from_str("en").unwrap(), Locale::En);
        assert_eq!(Locale::from_str("ZH").unwrap(), Locale::Zh);
        assert!(Locale::from_str("fr").is_err());
    }

    #[test]
    fn test_debug_hides_callbacks() {
        let config = AuthConfig::default().on_success(|_| {});
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("on_success: true"));
        assert!(rendered.contains("on_error: false"));
    }
}
