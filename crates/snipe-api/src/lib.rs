//! Vendor API access for the dedicated-server sniper.
//!
//! # Key Components
//!
//! - [`sign`], [`RequestSigner`]: `$1$` SHA-1 request signatures
//! - [`ServerClock`]: signing timestamps corrected by vendor time
//! - [`resolve_endpoint`]: endpoint name to base URL
//! - [`OvhClient`]: signed REST client (availability, orders, time)
//! - [`VendorApi`]: the seam the monitor depends on, with [`MockVendor`] for tests

pub mod client;
pub mod clock;
pub mod endpoint;
pub mod error;
pub mod signer;
pub mod vendor;

pub use client::{OvhClient, DEFAULT_TIMEOUT};
pub use clock::{Clock, ServerClock, SystemClock};
pub use endpoint::{resolve_endpoint, ENDPOINTS};
pub use error::{ApiError, ApiResult};
pub use signer::{
    canonical_body, sign, RequestSigner, SignatureHeaders, SignedRequest, SignerError,
    SIGNATURE_PREFIX,
};
pub use vendor::{BoxFuture, DynVendor, MockOrderCall, MockVendor, VendorApi};
