//! Control server configuration.

use serde::{Deserialize, Serialize};

/// Control server configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Enable the control server.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Address to bind.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum concurrent event stream connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Basic auth username (empty = disabled).
    #[serde(default)]
    pub username: String,
    /// Basic auth password (empty = disabled).
    #[serde(default)]
    pub password: String,
    /// Allowed CORS origins. Empty = no CORS headers, `["*"]` = any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_enabled() -> bool {
    false
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_max_connections() -> usize {
    10
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            bind: default_bind(),
            port: default_port(),
            max_connections: default_max_connections(),
            username: String::new(),
            password: String::new(),
            cors_origins: Vec::new(),
        }
    }
}

impl std::fmt::Debug for ControlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlConfig")
            .field("enabled", &self.enabled)
            .field("bind", &self.bind)
            .field("port", &self.port)
            .field("max_connections", &self.max_connections)
            .field("auth_enabled", &self.auth_enabled())
            .field("cors_origins", &self.cors_origins)
            .finish()
    }
}

impl ControlConfig {
    /// Check if basic auth is enabled.
    pub fn auth_enabled(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}
