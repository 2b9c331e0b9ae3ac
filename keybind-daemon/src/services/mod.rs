//! Request handling for the enrollment and redemption endpoints.
//!
//! The services here are transport-agnostic: they take the raw body and the
//! presented application secret and return a typed response or an
//! [`ApiError`]. [`crate::http`] does the axum wiring.

mod enrollment;
mod error;
mod rate_limit;
mod redemption;
mod request;

pub use enrollment::{EnrollmentResponse, EnrollmentService};
pub use error::ApiError;
pub use rate_limit::{
    enforce as enforce_rate_limit, RateLimitGate, RequestRateLimiter, DEFAULT_BURST,
};
pub use redemption::{RedemptionPolicy, RedemptionResponse, RedemptionService};
pub use request::{presented_secret, SharedSecret, SIGNATURE_HEADER};
