//! Signed REST client for the OVHcloud API.
//!
//! Every authenticated call goes through [`OvhClient::signed_request`]:
//! the body is serialized once, that exact string is signed together with
//! the full URL (query string included) and then sent as-is.

use std::time::{Duration, Instant};

use reqwest::{Client, Method, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use snipe_core::{Credentials, OrderRequest, OrderResult, ResourceQuery, ServerStatus};
use snipe_telemetry::Metrics;

use crate::clock::{ServerClock, SystemClock};
use crate::endpoint::resolve_endpoint;
use crate::error::{ApiError, ApiResult};
use crate::signer::RequestSigner;
use crate::vendor::{BoxFuture, VendorApi};

/// Per-call timeout for vendor requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const AVAILABILITY_PATH: &str = "/dedicated/server/supplierPlan/availability";
const ORDER_PATH: &str = "/order/dedicated/server";
const TIME_PATH: &str = "/auth/time";

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OrderBody<'a> {
    plan_code: &'a str,
    duration: &'a str,
    pricing_mode: &'static str,
    quantity: u32,
    configuration: Vec<ConfigurationItem<'a>>,
}

#[derive(Debug, Serialize)]
struct ConfigurationItem<'a> {
    label: &'static str,
    value: &'a str,
}

impl<'a> OrderBody<'a> {
    /// Order body: OS first, then plan options, then datacenter (when set).
    pub(crate) fn from_order(order: &'a OrderRequest) -> Self {
        let mut configuration = Vec::with_capacity(order.options.len() + 2);
        configuration.push(ConfigurationItem {
            label: "os",
            value: &order.os_image,
        });
        for option in &order.options {
            configuration.push(ConfigurationItem {
                label: "option",
                value: option,
            });
        }
        if let Some(dc) = &order.datacenter {
            configuration.push(ConfigurationItem {
                label: "datacenter",
                value: dc,
            });
        }

        Self {
            plan_code: &order.plan_code,
            duration: &order.duration,
            pricing_mode: "default",
            quantity: 1,
            configuration,
        }
    }
}

/// Nested inventory entry (`{fqn, datacenters: [{datacenter, availability}]}`).
#[derive(Debug, Deserialize)]
struct NestedEntry {
    #[serde(default)]
    fqn: String,
    datacenters: Vec<NestedDatacenter>,
}

#[derive(Debug, Deserialize)]
struct NestedDatacenter {
    #[serde(default)]
    datacenter: String,
    #[serde(default)]
    availability: String,
}

/// Parse an availability response.
///
/// Accepts both the flat shape (`[{fqn, datacenter, availability}]`) and the
/// nested per-datacenter shape, flattened in order.
pub(crate) fn parse_availability(body: serde_json::Value) -> ApiResult<Vec<ServerStatus>> {
    let entries = match body {
        serde_json::Value::Array(entries) => entries,
        other => {
            return Err(ApiError::Protocol(format!(
                "availability response is not an array: {other}"
            )))
        }
    };

    let mut statuses = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.get("datacenters").is_some() {
            let nested: NestedEntry = serde_json::from_value(entry)
                .map_err(|e| ApiError::Protocol(format!("bad availability entry: {e}")))?;
            statuses.extend(nested.datacenters.into_iter().map(|dc| ServerStatus {
                fqn: nested.fqn.clone(),
                datacenter: dc.datacenter,
                availability: dc.availability,
            }));
        } else {
            let status: ServerStatus = serde_json::from_value(entry)
                .map_err(|e| ApiError::Protocol(format!("bad availability entry: {e}")))?;
            statuses.push(status);
        }
    }
    Ok(statuses)
}

/// Extract `orderId` (number or string) and `url` from an order response.
pub(crate) fn parse_order(body: &serde_json::Value) -> ApiResult<OrderResult> {
    if !body.is_object() {
        return Err(ApiError::Protocol(format!(
            "order response is not an object: {body}"
        )));
    }

    let order_id = match body.get("orderId") {
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        _ => None,
    };
    let order_url = body
        .get("url")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Ok(OrderResult::succeeded(order_id, order_url))
}

/// Turn a non-2xx body into a vendor error, preferring its `message` field.
fn vendor_error(status: u16, body: &str) -> ApiError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| {
            if body.is_empty() {
                "empty response".to_string()
            } else {
                body.to_string()
            }
        });
    ApiError::Vendor { status, message }
}

fn transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Transport(format!("request timed out: {e}"))
    } else {
        ApiError::Transport(format!("HTTP request failed: {e}"))
    }
}

// ============================================================================
// OvhClient
// ============================================================================

/// Client for the vendor's REST API.
pub struct OvhClient {
    client: Client,
    base_url: String,
    signer: RequestSigner,
    clock: ServerClock<SystemClock>,
}

impl OvhClient {
    /// Create a client for `credentials.endpoint`.
    ///
    /// Fails with a config error when credentials are incomplete or the
    /// endpoint is unknown.
    pub fn new(credentials: &Credentials) -> ApiResult<Self> {
        Self::with_timeout(credentials, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(credentials: &Credentials, timeout: Duration) -> ApiResult<Self> {
        credentials.validate()?;
        let base_url = resolve_endpoint(&credentials.endpoint)?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            signer: RequestSigner::new(credentials),
            clock: ServerClock::new(SystemClock),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn clock(&self) -> &ServerClock<SystemClock> {
        &self.clock
    }

    fn url(&self, path: &str) -> ApiResult<Url> {
        let raw = format!("{}{}", self.base_url, path);
        Url::parse(&raw).map_err(|e| ApiError::Protocol(format!("invalid URL {raw}: {e}")))
    }

    /// Fetch vendor time (unauthenticated) and store the clock offset.
    ///
    /// Returns the offset in seconds (positive = vendor ahead).
    pub async fn sync_time(&self) -> ApiResult<i64> {
        let url = self.url(TIME_PATH)?;
        let started = Instant::now();

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;
        Metrics::vendor_latency("time", started.elapsed().as_secs_f64());

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(vendor_error(status.as_u16(), &text));
        }

        let server_time: u64 = text
            .trim()
            .parse()
            .map_err(|e| ApiError::Protocol(format!("bad /auth/time body {text:?}: {e}")))?;

        let offset = self.clock.sync_with_server(server_time);
        info!(offset_secs = offset, base = %self.base_url, "Vendor clock synced");
        Ok(offset)
    }

    /// Send one signed request and return the 2xx JSON body.
    async fn signed_request<B: Serialize + ?Sized>(
        &self,
        operation: &'static str,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> ApiResult<serde_json::Value> {
        let timestamp = self.clock.now_secs();
        let signed = self
            .signer
            .sign_request(method.as_str(), url.as_str(), body, timestamp)?;

        debug!(%method, url = %url, timestamp, "Sending signed vendor request");

        let mut request = self
            .client
            .request(method, url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in signed.headers.pairs() {
            request = request.header(name, value);
        }
        if body.is_some() {
            request = request.body(signed.body);
        }

        let started = Instant::now();
        let result = request.send().await;
        Metrics::vendor_latency(operation, started.elapsed().as_secs_f64());

        let response = result.map_err(|e| {
            let err = transport_error(e);
            Metrics::vendor_error(operation, err.kind());
            err
        })?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            let err = vendor_error(status.as_u16(), &text);
            Metrics::vendor_error(operation, err.kind());
            warn!(operation, status = status.as_u16(), error = %err, "Vendor rejected request");
            return Err(err);
        }

        serde_json::from_str(&text).map_err(|e| {
            Metrics::vendor_error(operation, "protocol");
            ApiError::Protocol(format!("Failed to parse response: {e}"))
        })
    }

    /// `GET /dedicated/server/supplierPlan/availability?planCode=..&zone=..`
    pub async fn fetch_availability(&self, query: &ResourceQuery) -> ApiResult<Vec<ServerStatus>> {
        let mut url = self.url(AVAILABILITY_PATH)?;
        url.query_pairs_mut()
            .append_pair("planCode", &query.plan_code)
            .append_pair("zone", &query.zone);

        let body = self
            .signed_request::<()>("availability", Method::GET, url, None)
            .await?;
        parse_availability(body)
    }

    /// `POST /order/dedicated/server/{zone}`
    pub async fn submit_order(&self, order: &OrderRequest) -> ApiResult<OrderResult> {
        let url = self.url(&format!("{ORDER_PATH}/{}", order.zone))?;
        let body = OrderBody::from_order(order);

        info!(
            plan = %order.plan_code,
            zone = %order.zone,
            datacenter = ?order.datacenter,
            "Submitting order"
        );

        let response = self
            .signed_request("order", Method::POST, url, Some(&body))
            .await?;
        parse_order(&response)
    }
}

impl std::fmt::Debug for OvhClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OvhClient")
            .field("base_url", &self.base_url)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl VendorApi for OvhClient {
    fn check_availability<'a>(
        &'a self,
        query: &'a ResourceQuery,
    ) -> BoxFuture<'a, ApiResult<Vec<ServerStatus>>> {
        Box::pin(self.fetch_availability(query))
    }

    fn place_order<'a>(&'a self, order: &'a OrderRequest) -> BoxFuture<'a, ApiResult<OrderResult>> {
        Box::pin(self.submit_order(order))
    }
}
