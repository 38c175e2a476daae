//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Paddle intents per second per connection (key repeat runs well under this)
pub const INTENT_RATE_LIMIT: u32 = 120;

/// Matchmaking control actions per second per connection
pub const MATCHMAKING_RATE_LIMIT: u32 = 5;

/// Per-connection rate limiter state
#[derive(Clone)]
pub struct ConnectionRateLimiter {
    intent_limiter: Arc<Limiter>,
    action_limiter: Arc<Limiter>,
}

impl ConnectionRateLimiter {
    pub fn new() -> Self {
        Self {
            intent_limiter: create_limiter(INTENT_RATE_LIMIT),
            action_limiter: create_limiter(MATCHMAKING_RATE_LIMIT),
        }
    }

    /// Check if a paddle intent is allowed (returns true if allowed)
    pub fn check_intent(&self) -> bool {
        self.intent_limiter.check().is_ok()
    }

    /// Check if a matchmaking action is allowed
    pub fn check_action(&self) -> bool {
        self.action_limiter.check().is_ok()
    }
}

impl Default for ConnectionRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_burst_is_capped() {
        let limiter = ConnectionRateLimiter::new();
        let allowed = (0..20).filter(|_| limiter.check_action()).count();
        assert_eq!(allowed, MATCHMAKING_RATE_LIMIT as usize);
        assert!(limiter.check_intent());
    }
}
