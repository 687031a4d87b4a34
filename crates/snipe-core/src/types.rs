//! Domain types for inventory watching and ordering.
//!
//! Everything here is plain data. Ownership rules (who may mutate what) live in
//! `snipe-monitor`; this module only defines the shapes.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ConfigError, ConfigResult};

// ============================================================================
// ResourceQuery
// ============================================================================

/// Identifies the purchasable resource being watched.
///
/// Immutable for the lifetime of a monitoring session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceQuery {
    /// Vendor plan code (e.g. "25skmystery01").
    pub plan_code: String,
    /// Ordering zone / subsidiary (e.g. "FR").
    pub zone: String,
    /// Datacenter constraint (e.g. "rbx"). None = any datacenter.
    #[serde(default)]
    pub datacenter: Option<String>,
}

impl ResourceQuery {
    /// Create a query without a datacenter constraint.
    pub fn new(plan_code: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            plan_code: plan_code.into(),
            zone: zone.into(),
            datacenter: None,
        }
    }

    /// Constrain the query to a datacenter.
    #[must_use]
    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = Some(datacenter.into());
        self
    }

    /// Validate that the query names something.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.plan_code.trim().is_empty() {
            return Err(ConfigError::Invalid("plan_code is empty".to_string()));
        }
        if self.zone.trim().is_empty() {
            return Err(ConfigError::Invalid("zone is empty".to_string()));
        }
        Ok(())
    }

    /// Pick the inventory entry this query refers to.
    ///
    /// With a datacenter constraint, the first entry for that datacenter;
    /// otherwise the first entry. `None` means the vendor returned no data.
    pub fn select<'a>(&self, entries: &'a [ServerStatus]) -> Option<&'a ServerStatus> {
        match &self.datacenter {
            Some(dc) => entries
                .iter()
                .find(|s| s.datacenter.eq_ignore_ascii_case(dc)),
            None => entries.first(),
        }
    }
}

impl std::fmt::Display for ResourceQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.datacenter {
            Some(dc) => write!(f, "{}@{}/{}", self.plan_code, self.zone, dc),
            None => write!(f, "{}@{}", self.plan_code, self.zone),
        }
    }
}

// ============================================================================
// AvailabilityState / ServerStatus
// ============================================================================

/// Availability of the watched resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityState {
    /// No result yet, last check failed, or monitoring stopped.
    #[default]
    Unknown,
    /// A check is in flight.
    Checking,
    /// The vendor reports the resource as orderable.
    Available,
    /// The vendor reports the resource as not orderable.
    Unavailable,
}

impl AvailabilityState {
    /// Map the vendor's availability string.
    ///
    /// Only the exact value "available" counts as orderable.
    pub fn from_vendor(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("available") {
            Self::Available
        } else {
            Self::Unavailable
        }
    }

    /// Settled states are the outcome of a finished check (or a reset).
    /// `Checking` is transient and never counts as a transition source.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Checking)
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

impl std::fmt::Display for AvailabilityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Checking => write!(f, "checking"),
            Self::Available => write!(f, "available"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// One inventory entry as returned by the vendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Fully qualified name of the hardware offer.
    #[serde(default)]
    pub fqn: String,
    /// Datacenter the entry refers to.
    #[serde(default)]
    pub datacenter: String,
    /// Raw availability string.
    #[serde(default)]
    pub availability: String,
}

impl ServerStatus {
    /// Interpret the raw availability string.
    pub fn state(&self) -> AvailabilityState {
        AvailabilityState::from_vendor(&self.availability)
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Vendor API credentials.
///
/// Opaque to the core beyond being signer inputs. Secret material is wiped on
/// drop, never printed by `Debug` and never serialized.
#[derive(Clone, Default, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    /// Application key (sent in clear as a header).
    #[serde(default)]
    pub application_key: String,
    /// Application secret (signing input only).
    #[serde(default)]
    pub application_secret: String,
    /// Consumer key (sent as a header, also a signing input).
    #[serde(default)]
    pub consumer_key: String,
    /// Endpoint name ("ovh-eu", ...) or base URL.
    #[serde(default = "default_endpoint")]
    #[zeroize(skip)]
    pub endpoint: String,
}

fn default_endpoint() -> String {
    "ovh-eu".to_string()
}

impl Credentials {
    pub fn new(
        application_key: impl Into<String>,
        application_secret: impl Into<String>,
        consumer_key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            application_key: application_key.into(),
            application_secret: application_secret.into(),
            consumer_key: consumer_key.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Fail with `MissingCredentials` unless all three keys are present.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.application_key.trim().is_empty()
            || self.application_secret.trim().is_empty()
            || self.consumer_key.trim().is_empty()
        {
            return Err(ConfigError::MissingCredentials);
        }
        Ok(())
    }
}

/// Keep the first four characters, mask the rest.
fn redact(value: &str) -> String {
    if value.is_empty() {
        return "<empty>".to_string();
    }
    let prefix: String = value.chars().take(4).collect();
    format!("{prefix}***")
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("application_key", &redact(&self.application_key))
            .field("application_secret", &"<redacted>")
            .field("consumer_key", &redact(&self.consumer_key))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

// ============================================================================
// Orders
// ============================================================================

/// Operator-chosen order parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderOptions {
    /// Commitment duration (ISO-8601 period, e.g. "P1M").
    #[serde(default = "default_duration")]
    pub duration: String,
    /// OS image label.
    #[serde(default = "default_os_image")]
    pub os_image: String,
    /// Additional plan options (bandwidth, memory, storage...).
    #[serde(default)]
    pub options: Vec<String>,
}

fn default_duration() -> String {
    "P1M".to_string()
}

fn default_os_image() -> String {
    "none_64.en".to_string()
}

impl Default for OrderOptions {
    fn default() -> Self {
        Self {
            duration: default_duration(),
            os_image: default_os_image(),
            options: Vec::new(),
        }
    }
}

/// A fully specified purchase request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRequest {
    pub plan_code: String,
    pub zone: String,
    pub duration: String,
    pub os_image: String,
    pub options: Vec<String>,
    pub datacenter: Option<String>,
}

impl OrderRequest {
    /// Derive an order from the watched resource and the operator's options.
    pub fn from_query(query: &ResourceQuery, options: &OrderOptions) -> Self {
        Self {
            plan_code: query.plan_code.clone(),
            zone: query.zone.clone(),
            duration: options.duration.clone(),
            os_image: options.os_image.clone(),
            options: options.options.clone(),
            datacenter: query.datacenter.clone(),
        }
    }

    /// Use the datacenter the inventory actually reported, when the query had none.
    #[must_use]
    pub fn for_status(mut self, status: &ServerStatus) -> Self {
        if self.datacenter.is_none() && !status.datacenter.is_empty() {
            self.datacenter = Some(status.datacenter.clone());
        }
        self
    }
}

/// Terminal outcome of one purchase attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OrderResult {
    pub fn succeeded(order_id: Option<String>, order_url: Option<String>) -> Self {
        Self {
            success: true,
            order_id,
            order_url,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: None,
            order_url: None,
            error: Some(error.into()),
        }
    }
}

// ============================================================================
// LoopState
// ============================================================================

/// Phase of the purchase state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    #[default]
    Idle,
    Attempting,
    WaitingRetry,
    Succeeded,
    Stopped,
}

impl std::fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Attempting => write!(f, "attempting"),
            Self::WaitingRetry => write!(f, "waiting_retry"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Purchase loop bookkeeping, owned by the orchestrator task.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoopState {
    pub active: bool,
    /// Attempts made since the loop was (re)started.
    pub attempt: u32,
    /// 0 = unbounded.
    pub max_attempts: u32,
    pub interval_seconds: u64,
    pub phase: LoopPhase,
    pub last_result: Option<OrderResult>,
}
