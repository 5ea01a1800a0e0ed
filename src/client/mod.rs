//! HTTP access to the simulation platform.
//!
//! - **QuotaAwareClient**: rate-limit windows, retry and backoff around `reqwest`
//! - **PlatformClient**: typed simulation endpoints on top of it
//!
//! Each worker owns its own `PlatformClient`, so every worker is an
//! independent quota domain.

pub mod platform;
pub mod quota_client;
pub mod rate_limit;

pub use platform::{
    PlatformClient, SimulationHandle, SimulationOutcome, SimulationProgress,
};
pub use quota_client::{
    ApiRequest, ClientConfig, QuotaAwareClient, RawResponse, RequestOutcome, DEFAULT_BASE_URL,
};
pub use rate_limit::{Acquire, RateLimitTable, RateLimitWindow};
