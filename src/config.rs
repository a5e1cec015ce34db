//! Configuration types, built from `EMAIL_OPERATOR_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default MailerSend-compatible send endpoint.
pub const DEFAULT_PROVIDER_URL: &str = "https://api.mailersend.com/v1/email";

/// Response header carrying the provider's message id.
pub const DEFAULT_MESSAGE_ID_HEADER: &str = "X-Message-Id";

/// Outbound delivery provider settings.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Endpoint the send request is POSTed to.
    pub url: String,
    /// Response header the message id is read from.
    pub message_id_header: String,
    /// Whole-request timeout for the outbound call.
    pub request_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_PROVIDER_URL.to_string(),
            message_id_header: DEFAULT_MESSAGE_ID_HEADER.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Controller runtime settings, shared by every controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Maximum reconciles in flight at once (across keys).
    pub max_concurrent_reconciles: usize,
    /// Upper bound on a single reconcile pass.
    pub reconcile_timeout: Duration,
    /// First requeue delay after a failed reconcile.
    pub backoff_base: Duration,
    /// Largest requeue delay.
    pub backoff_max: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: 4,
            reconcile_timeout: Duration::from_secs(60),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// Record store settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    /// Directory of JSON manifests applied at startup, if any.
    pub manifest_dir: Option<PathBuf>,
    /// How often watches poll the database for new revisions.
    pub watch_poll_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/email-operator.db"),
            manifest_dir: None,
            watch_poll_interval: Duration::from_secs(1),
        }
    }
}

/// Top-level operator configuration.
#[derive(Debug, Clone, Default)]
pub struct OperatorConfig {
    pub store: StoreConfig,
    pub provider: ProviderConfig,
    pub controller: ControllerConfig,
}

impl OperatorConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable lookup. Unset variables take
    /// their defaults; set but unparseable ones are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let store = StoreConfig {
            db_path: get("EMAIL_OPERATOR_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.store.db_path),
            manifest_dir: get("EMAIL_OPERATOR_MANIFEST_DIR").map(PathBuf::from),
            watch_poll_interval: parse_var(&get, "EMAIL_OPERATOR_WATCH_POLL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.store.watch_poll_interval),
        };

        let provider = ProviderConfig {
            url: get("EMAIL_OPERATOR_PROVIDER_URL").unwrap_or(defaults.provider.url),
            message_id_header: get("EMAIL_OPERATOR_MESSAGE_ID_HEADER")
                .unwrap_or(defaults.provider.message_id_header),
            request_timeout: parse_var(&get, "EMAIL_OPERATOR_HTTP_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.provider.request_timeout),
        };

        let controller = ControllerConfig {
            max_concurrent_reconciles: parse_var(&get, "EMAIL_OPERATOR_MAX_CONCURRENT")?
                .unwrap_or(defaults.controller.max_concurrent_reconciles),
            reconcile_timeout: parse_var(&get, "EMAIL_OPERATOR_RECONCILE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.controller.reconcile_timeout),
            backoff_base: parse_var(&get, "EMAIL_OPERATOR_BACKOFF_BASE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.controller.backoff_base),
            backoff_max: parse_var(&get, "EMAIL_OPERATOR_BACKOFF_MAX_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.controller.backoff_max),
        };

        let config = Self {
            store,
            provider,
            controller,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.controller.max_concurrent_reconciles == 0 {
            return Err(ConfigError::InvalidValue {
                key: "EMAIL_OPERATOR_MAX_CONCURRENT".into(),
                message: "must be at least 1".into(),
            });
        }
        if !self.provider.url.starts_with("http://") && !self.provider.url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "EMAIL_OPERATOR_PROVIDER_URL".into(),
                message: format!("not an http(s) URL: {}", self.provider.url),
            });
        }
        if self.controller.backoff_base > self.controller.backoff_max {
            return Err(ConfigError::InvalidValue {
                key: "EMAIL_OPERATOR_BACKOFF_BASE_MS".into(),
                message: "must not exceed EMAIL_OPERATOR_BACKOFF_MAX_SECS".into(),
            });
        }
        Ok(())
    }
}

/// Parse `key` if set; unset keys are `Ok(None)`.
fn parse_var<T, G>(get: &G, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
        None => Ok(None),
    }
}
