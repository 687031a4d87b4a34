//! Application configuration.
//!
//! Loaded from a TOML file, then overlaid with `SNIPE__<SECTION>__<KEY>`
//! environment variables so secrets can stay out of the file, e.g.
//! `SNIPE__CREDENTIALS__APPLICATION_SECRET`.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use snipe_api::resolve_endpoint;
use snipe_control::ControlConfig;
use snipe_core::{ConfigResult, Credentials, LoopPolicy, OrderOptions, ResourceQuery};
use snipe_monitor::SessionConfig;
use snipe_telemetry::TelegramConfig;

use crate::error::{AppError, AppResult};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SNIPE";
const ENV_SEPARATOR: &str = "__";

/// Purchase behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseConfig {
    /// Order once, automatically, when the resource becomes available.
    #[serde(default)]
    pub auto_checkout: bool,
    /// Allow the operator to start a retrying purchase loop.
    #[serde(default)]
    pub enable_loop: bool,
    /// Delay between failed loop attempts. Minimum 10.
    #[serde(default = "default_loop_interval_secs")]
    pub loop_interval_secs: u64,
    /// Give up after this many loop attempts. 0 = never.
    #[serde(default)]
    pub max_attempts: u32,
    /// Start monitoring as soon as the process is up.
    #[serde(default)]
    pub start_on_launch: bool,
}

fn default_loop_interval_secs() -> u64 {
    60
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            auto_checkout: false,
            enable_loop: false,
            loop_interval_secs: default_loop_interval_secs(),
            max_attempts: 0,
            start_on_launch: false,
        }
    }
}

impl PurchaseConfig {
    pub fn policy(&self) -> ConfigResult<LoopPolicy> {
        LoopPolicy::new(self.enable_loop, self.loop_interval_secs, self.max_attempts)
    }
}

/// Vendor client behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorConfig {
    /// Align signature timestamps with the vendor clock at startup.
    #[serde(default = "default_sync_time")]
    pub sync_time: bool,
    /// Per-request timeout for vendor calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_sync_time() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            sync_time: default_sync_time(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Main application configuration.
///
/// Deserialize-only: it carries vendor secrets that must never be written out.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub credentials: Credentials,
    pub resource: ResourceQuery,
    #[serde(default)]
    pub order: OrderOptions,
    #[serde(default)]
    pub purchase: PurchaseConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub vendor: VendorConfig,
}

impl AppConfig {
    /// Load from a TOML file with environment overrides.
    pub fn load(path: &str) -> AppResult<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`AppConfig::load`], reading overrides from `env` instead of the
    /// process environment when given.
    pub fn load_with_env(path: &str, env: Option<config::Map<String, String>>) -> AppResult<Self> {
        let settings = Config::builder()
            .add_source(File::new(path, FileFormat::Toml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .map_err(|e| AppError::Config(format!("Failed to load config: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Parse a TOML document without environment overrides.
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> AppResult<()> {
        self.credentials.validate()?;
        self.resource.validate()?;
        self.purchase.policy()?;
        resolve_endpoint(&self.credentials.endpoint)?;
        Ok(())
    }

    /// Session configuration derived from this file.
    pub fn session_config(&self) -> AppResult<SessionConfig> {
        Ok(SessionConfig {
            query: self.resource.clone(),
            order: self.order.clone(),
            policy: self.purchase.policy()?,
            auto_checkout: self.purchase.auto_checkout,
        })
    }
}

#[cfg(test)]
mod tests {
    use snipe_core::{ConfigError, NotifyKind};

    use super::*;

    const MINIMAL: &str = r#"
        [credentials]
        application_key = "ak"
        application_secret = "as"
        consumer_key = "ck"

        [resource]
        plan_code = "25skmystery01"
        zone = "FR"
    "#;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.credentials.endpoint, "ovh-eu");
        assert_eq!(config.resource.datacenter, None);
        assert_eq!(config.order.duration, "P1M");
        assert!(!config.purchase.auto_checkout);
        assert!(!config.purchase.enable_loop);
        assert_eq!(config.purchase.loop_interval_secs, 60);
        assert_eq!(config.purchase.max_attempts, 0);
        assert!(!config.control.enabled);
        assert!(!config.telegram.is_enabled());
        assert!(config.vendor.sync_time);
        config.validate().unwrap();
    }

    #[test]
    fn test_full_file() {
        let config = AppConfig::from_toml_str(
            r#"
            [credentials]
            application_key = "ak"
            application_secret = "as"
            consumer_key = "ck"
            endpoint = "kimsufi-eu"

            [resource]
            plan_code = "24ska01"
            zone = "IE"
            datacenter = "gra"

            [order]
            duration = "P12M"
            os_image = "debian12_64"
            options = ["bandwidth-100-24sk"]

            [purchase]
            auto_checkout = true
            enable_loop = true
            loop_interval_secs = 15
            max_attempts = 5

            [telegram]
            bot_token = "123:abc"
            chat_id = "-100200"
            kinds = ["success", "error"]

            [control]
            enabled = true
            port = 9100
            cors_origins = ["*"]

            [vendor]
            sync_time = false
            request_timeout_secs = 10
        "#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.resource.datacenter.as_deref(), Some("gra"));
        assert_eq!(config.order.options, vec!["bandwidth-100-24sk"]);
        assert_eq!(config.telegram.kinds, vec![NotifyKind::Success, NotifyKind::Error]);
        assert_eq!(config.control.port, 9100);
        assert!(!config.vendor.sync_time);
        assert_eq!(config.vendor.request_timeout_secs, 10);

        let session = config.session_config().unwrap();
        assert!(session.auto_checkout);
        assert!(session.policy.enabled);
        assert_eq!(session.policy.max_attempts(), 5);
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = AppConfig::from_toml_str(MINIMAL).unwrap();
        config.credentials.application_secret.clear();
        assert!(matches!(
            config.validate(),
            Err(AppError::Invalid(ConfigError::MissingCredentials))
        ));

        let mut config = AppConfig::from_toml_str(MINIMAL).unwrap();
        config.purchase.loop_interval_secs = 5;
        assert!(matches!(
            config.validate(),
            Err(AppError::Invalid(ConfigError::IntervalTooShort { secs: 5, .. }))
        ));

        let mut config = AppConfig::from_toml_str(MINIMAL).unwrap();
        config.credentials.endpoint = "ovh-mars".to_string();
        assert!(matches!(
            config.validate(),
            Err(AppError::Invalid(ConfigError::UnknownEndpoint(_)))
        ));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = AppConfig::from_toml_str(
            r#"
            [credentials]
            application_key = "ak-123456"
            application_secret = "very-secret-value"
            consumer_key = "ck-123456"

            [resource]
            plan_code = "25skmystery01"
            zone = "FR"

            [telegram]
            bot_token = "123:bot-secret"
            chat_id = "-100200"
        "#,
        )
        .unwrap();

        let printed = format!("{config:?}");
        assert!(!printed.contains("very-secret-value"));
        assert!(!printed.contains("ck-123456"));
        assert!(!printed.contains("bot-secret"));
    }

    #[test]
    fn test_resource_required() {
        assert!(matches!(
            AppConfig::from_toml_str("[credentials]\napplication_key = \"ak\"\n"),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_env_overrides_file() {
        let path = std::env::temp_dir().join(format!(
            "snipe-config-test-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, MINIMAL).unwrap();

        let mut env = config::Map::new();
        env.insert(
            "SNIPE__CREDENTIALS__APPLICATION_SECRET".to_string(),
            "from-env".to_string(),
        );
        env.insert("SNIPE__PURCHASE__MAX_ATTEMPTS".to_string(), "7".to_string());
        env.insert("SNIPE__CONTROL__ENABLED".to_string(), "true".to_string());

        let config = AppConfig::load_with_env(path.to_str().unwrap(), Some(env)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.credentials.application_secret, "from-env");
        assert_eq!(config.credentials.application_key, "ak");
        assert_eq!(config.purchase.max_attempts, 7);
        assert!(config.control.enabled);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            AppConfig::load_with_env("/nonexistent/snipe.toml", Some(config::Map::new())),
            Err(AppError::Config(_))
        ));
    }
}
