//! Vendor API seam.
//!
//! The poller and the orchestrator only see [`VendorApi`]. Production uses
//! [`crate::OvhClient`]; tests use [`MockVendor`], which replays scripted
//! responses and records every call.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use snipe_core::{OrderRequest, OrderResult, ResourceQuery, ServerStatus};

use crate::error::ApiResult;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// The two vendor operations the core needs.
pub trait VendorApi: Send + Sync {
    /// Inventory entries for a plan in a zone.
    fn check_availability<'a>(
        &'a self,
        query: &'a ResourceQuery,
    ) -> BoxFuture<'a, ApiResult<Vec<ServerStatus>>>;

    /// Submit one order.
    ///
    /// `Ok` with `success == false` never happens for the real client: vendor
    /// rejections come back as `Err(ApiError::Vendor)`.
    fn place_order<'a>(&'a self, order: &'a OrderRequest) -> BoxFuture<'a, ApiResult<OrderResult>>;
}

/// Shared handle used by the session tasks.
pub type DynVendor = Arc<dyn VendorApi>;

// ============================================================================
// MockVendor
// ============================================================================

/// One recorded `place_order` call.
#[derive(Debug, Clone)]
pub struct MockOrderCall {
    pub order: OrderRequest,
    /// Number of availability checks that had started before this order.
    pub checks_before: usize,
}

/// Scripted vendor for tests.
///
/// Queued responses are consumed in order; once a queue is empty the default
/// response for that operation is returned forever.
#[derive(Debug)]
pub struct MockVendor {
    availability: Mutex<VecDeque<ApiResult<Vec<ServerStatus>>>>,
    default_availability: Mutex<ApiResult<Vec<ServerStatus>>>,
    orders: Mutex<VecDeque<ApiResult<OrderResult>>>,
    default_order: Mutex<ApiResult<OrderResult>>,
    check_delay: Mutex<Duration>,
    order_delay: Mutex<Duration>,
    check_calls: AtomicUsize,
    order_calls: Mutex<Vec<MockOrderCall>>,
}

impl Default for MockVendor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVendor {
    pub fn new() -> Self {
        Self {
            availability: Mutex::new(VecDeque::new()),
            default_availability: Mutex::new(Ok(Vec::new())),
            orders: Mutex::new(VecDeque::new()),
            default_order: Mutex::new(Ok(OrderResult::succeeded(
                Some("mock-order".to_string()),
                None,
            ))),
            check_delay: Mutex::new(Duration::ZERO),
            order_delay: Mutex::new(Duration::ZERO),
            check_calls: AtomicUsize::new(0),
            order_calls: Mutex::new(Vec::new()),
        }
    }

    /// A single inventory entry with the given availability string.
    pub fn status(datacenter: &str, availability: &str) -> Vec<ServerStatus> {
        vec![ServerStatus {
            fqn: format!("mock.{datacenter}"),
            datacenter: datacenter.to_string(),
            availability: availability.to_string(),
        }]
    }

    pub fn push_availability(&self, result: ApiResult<Vec<ServerStatus>>) {
        self.availability.lock().push_back(result);
    }

    pub fn set_default_availability(&self, result: ApiResult<Vec<ServerStatus>>) {
        *self.default_availability.lock() = result;
    }

    pub fn push_order(&self, result: ApiResult<OrderResult>) {
        self.orders.lock().push_back(result);
    }

    pub fn set_default_order(&self, result: ApiResult<OrderResult>) {
        *self.default_order.lock() = result;
    }

    /// Delay every availability response (virtual time under `start_paused`).
    pub fn set_check_delay(&self, delay: Duration) {
        *self.check_delay.lock() = delay;
    }

    pub fn set_order_delay(&self, delay: Duration) {
        *self.order_delay.lock() = delay;
    }

    #[must_use]
    pub fn check_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn order_count(&self) -> usize {
        self.order_calls.lock().len()
    }

    pub fn order_calls(&self) -> Vec<MockOrderCall> {
        self.order_calls.lock().clone()
    }
}

impl VendorApi for MockVendor {
    fn check_availability<'a>(
        &'a self,
        _query: &'a ResourceQuery,
    ) -> BoxFuture<'a, ApiResult<Vec<ServerStatus>>> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        let response = self
            .availability
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_availability.lock().clone());
        let delay = *self.check_delay.lock();

        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            response
        })
    }

    fn place_order<'a>(&'a self, order: &'a OrderRequest) -> BoxFuture<'a, ApiResult<OrderResult>> {
        self.order_calls.lock().push(MockOrderCall {
            order: order.clone(),
            checks_before: self.check_calls(),
        });
        let response = self
            .orders
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_order.lock().clone());
        let delay = *self.order_delay.lock();

        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            response
        })
    }
}
