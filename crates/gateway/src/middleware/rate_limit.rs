//! Rate limiting middleware using token bucket algorithm

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use followup_common::errors::{AppError, Result};
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter using governor crate
pub type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// Limiter plus the configured rate, for the rejection message
pub struct RateLimit {
    limiter: GlobalRateLimiter,
    requests_per_second: u32,
}

/// Create a new rate limiter
pub fn create_rate_limiter(requests_per_second: u32, burst: u32) -> Result<Arc<RateLimit>> {
    let per_second = NonZeroU32::new(requests_per_second).ok_or_else(|| AppError::Configuration {
        message: "rate_limit.requests_per_second must be positive".to_string(),
    })?;
    let burst = NonZeroU32::new(burst).ok_or_else(|| AppError::Configuration {
        message: "rate_limit.burst must be positive".to_string(),
    })?;

    let quota = Quota::per_second(per_second).allow_burst(burst);

    Ok(Arc::new(RateLimit {
        limiter: RateLimiter::direct(quota),
        requests_per_second,
    }))
}

/// Rate limiting middleware
pub async fn rate_limit(
    State(limit): State<Arc<RateLimit>>,
    request: Request,
    next: Next,
) -> Result<Response> {
    match limit.limiter.check() {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            tracing::warn!("Rate limit exceeded");
            Err(AppError::RateLimited {
                limit: limit.requests_per_second,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_creation() {
        let limit = create_rate_limiter(100, 200).unwrap();
        assert!(limit.limiter.check().is_ok());
    }

    #[test]
    fn test_burst_is_enforced() {
        let limit = create_rate_limiter(1, 2).unwrap();
        assert!(limit.limiter.check().is_ok());
        assert!(limit.limiter.check().is_ok());
        assert!(limit.limiter.check().is_err());
    }

    #[test]
    fn test_zero_rate_is_a_configuration_error() {
        assert!(matches!(
            create_rate_limiter(0, 10),
            Err(AppError::Configuration { .. })
        ));
    }
}
