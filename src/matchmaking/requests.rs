//! Direct game requests between two named players

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::game::PlayerRef;

/// Default time a target has to answer a request
pub const DEFAULT_REQUEST_TTL: Duration = Duration::from_secs(10);

/// A pending challenge from `requester` to `target`
#[derive(Debug, Clone)]
pub struct GameRequest {
    pub request_id: Uuid,
    pub requester: PlayerRef,
    pub target: PlayerRef,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    /// Monotonic issue time; expiry is judged against this, not `created_at`
    issued_at: Instant,
}

impl GameRequest {
    pub fn new(requester: PlayerRef, target: PlayerRef, ttl: Duration, now: Instant) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            requester,
            target,
            created_at: Utc::now(),
            ttl,
            issued_at: now,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.issued_at) >= self.ttl
    }

    /// Whole seconds left, as shown to the target
    pub fn expires_in(&self, now: Instant) -> u64 {
        self.ttl
            .saturating_sub(now.saturating_duration_since(self.issued_at))
            .as_secs()
    }

    /// Same two players regardless of who asked whom
    pub fn pairs(&self, a: Uuid, b: Uuid) -> bool {
        let (r, t) = (self.requester.id, self.target.id);
        (r == a && t == b) || (r == b && t == a)
    }

    pub fn involves(&self, player_id: Uuid) -> bool {
        self.requester.id == player_id || self.target.id == player_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_monotonic_and_pair_is_unordered() {
        let amy = PlayerRef::new(Uuid::new_v4(), "amy");
        let bob = PlayerRef::new(Uuid::new_v4(), "bob");
        let now = Instant::now();
        let request = GameRequest::new(amy.clone(), bob.clone(), DEFAULT_REQUEST_TTL, now);

        assert_eq!(request.expires_in(now), 10);
        assert!(!request.is_expired(now + Duration::from_millis(9_999)));
        assert!(request.is_expired(now + DEFAULT_REQUEST_TTL));
        assert_eq!(request.expires_in(now + Duration::from_secs(30)), 0);

        assert!(request.pairs(bob.id, amy.id));
        assert!(!request.pairs(amy.id, Uuid::new_v4()));
    }
}
