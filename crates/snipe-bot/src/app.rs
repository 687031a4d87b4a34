//! Main application orchestration.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use snipe_api::{DynVendor, OvhClient};
use snipe_core::{EventEmitter, ServerStatus};
use snipe_monitor::Session;
use snipe_telemetry::{TelegramSink, TracingSink};

use crate::config::AppConfig;
use crate::error::AppResult;

/// How long pending notifications may take to flush at shutdown.
const NOTIFIER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Main application state.
pub struct Application {
    config: AppConfig,
    client: Arc<OvhClient>,
    emitter: EventEmitter,
    session: Arc<Session>,
}

impl Application {
    /// Validate the configuration and build the vendor client and session.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;

        let timeout = Duration::from_secs(config.vendor.request_timeout_secs);
        let client = Arc::new(OvhClient::with_timeout(&config.credentials, timeout)?);

        let emitter = EventEmitter::new();
        emitter.add_sink(Arc::new(TracingSink::new(config.resource.to_string())));

        let vendor: DynVendor = client.clone();
        let session = Arc::new(Session::new(config.session_config()?, vendor, emitter.clone()));

        info!(
            endpoint = %client.base_url(),
            resource = %config.resource,
            auto_checkout = config.purchase.auto_checkout,
            loop_enabled = config.purchase.enable_loop,
            "Application initialized"
        );

        Ok(Self {
            config,
            client,
            emitter,
            session,
        })
    }

    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Align the signing clock with the vendor. Failures only degrade accuracy.
    pub async fn sync_time(&self) {
        match self.client.sync_time().await {
            Ok(offset) => info!(offset_secs = offset, "Vendor clock synchronized"),
            Err(e) => warn!(error = %e, "Vendor clock sync failed, using local time"),
        }
    }

    /// One signed availability check.
    pub async fn check_once(&self) -> AppResult<Vec<ServerStatus>> {
        if self.config.vendor.sync_time {
            self.sync_time().await;
        }
        Ok(self.client.fetch_availability(&self.config.resource).await?)
    }

    /// Vendor clock offset in seconds (positive = vendor ahead).
    pub async fn time_offset(&self) -> AppResult<i64> {
        Ok(self.client.sync_time().await?)
    }

    /// Run until Ctrl-C or until the control server fails.
    pub async fn run(self) -> AppResult<()> {
        if self.config.vendor.sync_time {
            self.sync_time().await;
        }

        let notifier = if self.config.telegram.is_enabled() {
            let (sink, handle) = TelegramSink::spawn(self.config.telegram.clone())?;
            self.emitter.add_sink(sink);
            info!("Telegram notifications enabled");
            Some(handle)
        } else {
            None
        };

        let shutdown = CancellationToken::new();
        let control = self.config.control.enabled.then(|| {
            tokio::spawn(snipe_control::run_server(
                self.session.clone(),
                self.config.control.clone(),
                shutdown.clone(),
            ))
        });
        let mut control_running = control.is_some();

        if self.config.purchase.start_on_launch {
            self.session.start_monitoring().await?;
        } else if !control_running {
            warn!("Control server disabled and start_on_launch unset: nothing will be monitored");
        }

        let control_exit = async move {
            match control {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(control_exit);

        let result = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                Ok(())
            }
            joined = &mut control_exit => {
                control_running = false;
                match joined {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => {
                        error!(error = %e, "Control server failed");
                        Err(e.into())
                    }
                    Err(e) => {
                        error!(error = %e, "Control server task panicked");
                        Ok(())
                    }
                }
            }
        };

        info!("Shutting down");
        self.session.stop_monitoring().await;
        shutdown.cancel();
        if control_running {
            if let Err(e) = control_exit.await {
                warn!(error = %e, "Control server task ended abnormally");
            }
        }

        // Dropping the sinks closes the notifier queue so its worker can drain.
        self.emitter.clear_sinks();
        if let Some(handle) = notifier {
            if tokio::time::timeout(NOTIFIER_DRAIN_TIMEOUT, handle).await.is_err() {
                warn!("Pending notifications not delivered before shutdown");
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use snipe_core::ConfigError;

    use super::*;
    use crate::error::AppError;

    fn config(secret: &str) -> AppConfig {
        AppConfig::from_toml_str(&format!(
            r#"
            [credentials]
            application_key = "ak"
            application_secret = "{secret}"
            consumer_key = "ck"
            endpoint = "http://127.0.0.1:9"

            [resource]
            plan_code = "25skmystery01"
            zone = "FR"
            "#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_new_rejects_missing_credentials() {
        assert!(matches!(
            Application::new(config("")),
            Err(AppError::Invalid(ConfigError::MissingCredentials))
        ));
    }

    #[tokio::test]
    async fn test_new_builds_idle_session() {
        let app = Application::new(config("as")).unwrap();
        assert!(!app.session().is_monitoring().await);
        assert_eq!(app.session().query().plan_code, "25skmystery01");
    }

    #[tokio::test]
    async fn test_check_once_reports_transport_error() {
        let mut config = config("as");
        config.vendor.sync_time = false;
        config.vendor.request_timeout_secs = 2;
        let app = Application::new(config).unwrap();

        assert!(matches!(
            app.check_once().await,
            Err(AppError::Api(snipe_api::ApiError::Transport(_)))
        ));
    }
}
