//! Matchmaking queue implementation
//!
//! Pure pairing state: the FIFO ticket queue, pending direct requests and the
//! set of players currently seated in a live match. Callers hold one lock
//! around every operation; nothing here awaits.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::game::PlayerRef;

use super::requests::GameRequest;

/// A player waiting for any opponent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub ticket_id: Uuid,
    pub player: PlayerRef,
    pub queued_at: Instant,
}

impl Ticket {
    pub fn new(player: PlayerRef, now: Instant) -> Self {
        Self {
            ticket_id: Uuid::new_v4(),
            player,
            queued_at: now,
        }
    }
}

/// Matchmaking rejections, reported to the caller synchronously
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Already waiting for a match")]
    AlreadyQueued,

    #[error("Already playing a match")]
    AlreadyInMatch,

    #[error("A request between these players is already pending")]
    DuplicateRequest,

    #[error("Cannot challenge yourself")]
    SelfRequest,

    #[error("Game request not found")]
    RequestNotFound,

    #[error("Game request expired")]
    RequestExpired,

    #[error("Only the challenged player can answer this request")]
    NotRequestTarget,
}

/// The matchmaking queue
pub struct MatchmakingQueue {
    tickets: VecDeque<Ticket>,
    requests: HashMap<Uuid, GameRequest>,
    in_match: HashSet<Uuid>,
    request_ttl: Duration,
}

impl MatchmakingQueue {
    pub fn new(request_ttl: Duration) -> Self {
        Self {
            tickets: VecDeque::new(),
            requests: HashMap::new(),
            in_match: HashSet::new(),
            request_ttl,
        }
    }

    /// Add a player to the queue
    pub fn enqueue(&mut self, player: PlayerRef, now: Instant) -> Result<Ticket, MatchmakingError> {
        if self.in_match.contains(&player.id) {
            return Err(MatchmakingError::AlreadyInMatch);
        }
        if self.contains(&player.id) {
            return Err(MatchmakingError::AlreadyQueued);
        }

        let ticket = Ticket::new(player, now);
        self.tickets.push_back(ticket.clone());
        Ok(ticket)
    }

    /// Remove a player's ticket
    pub fn cancel(&mut self, player_id: Uuid) -> Option<Ticket> {
        let pos = self.tickets.iter().position(|t| t.player.id == player_id)?;
        self.tickets.remove(pos)
    }

    /// Pop the two oldest tickets and seat both players
    pub fn try_pair(&mut self) -> Option<[PlayerRef; 2]> {
        if self.tickets.len() < 2 {
            return None;
        }
        let first = self.tickets.pop_front()?.player;
        let second = self.tickets.pop_front()?.player;
        Some(self.seat([first, second]))
    }

    /// Open a direct request, at most one per unordered pair
    pub fn direct_request(
        &mut self,
        requester: PlayerRef,
        target: PlayerRef,
        now: Instant,
    ) -> Result<GameRequest, MatchmakingError> {
        if requester.id == target.id {
            return Err(MatchmakingError::SelfRequest);
        }
        if self.in_match.contains(&requester.id) || self.in_match.contains(&target.id) {
            return Err(MatchmakingError::AlreadyInMatch);
        }
        if self
            .requests
            .values()
            .any(|r| r.pairs(requester.id, target.id) && !r.is_expired(now))
        {
            return Err(MatchmakingError::DuplicateRequest);
        }

        let request = GameRequest::new(requester, target, self.request_ttl, now);
        self.requests.insert(request.request_id, request.clone());
        Ok(request)
    }

    /// Target accepts; both players are pulled out of the ticket queue and seated.
    /// An expired request stays put so `expire` can hand it to both sides.
    pub fn accept(
        &mut self,
        request_id: Uuid,
        by: Uuid,
        now: Instant,
    ) -> Result<(GameRequest, [PlayerRef; 2]), MatchmakingError> {
        let request = self
            .requests
            .get(&request_id)
            .ok_or(MatchmakingError::RequestNotFound)?;
        if request.target.id != by {
            return Err(MatchmakingError::NotRequestTarget);
        }
        if request.is_expired(now) {
            return Err(MatchmakingError::RequestExpired);
        }

        let Some(request) = self.requests.remove(&request_id) else {
            return Err(MatchmakingError::RequestNotFound);
        };
        if self.in_match.contains(&request.requester.id) || self.in_match.contains(&by) {
            return Err(MatchmakingError::AlreadyInMatch);
        }

        self.cancel(request.requester.id);
        self.cancel(request.target.id);
        let players = self.seat([request.requester.clone(), request.target.clone()]);
        Ok((request, players))
    }

    /// Target refuses
    pub fn decline(&mut self, request_id: Uuid, by: Uuid) -> Result<GameRequest, MatchmakingError> {
        let request = self
            .requests
            .get(&request_id)
            .ok_or(MatchmakingError::RequestNotFound)?;
        if request.target.id != by {
            return Err(MatchmakingError::NotRequestTarget);
        }
        self.requests
            .remove(&request_id)
            .ok_or(MatchmakingError::RequestNotFound)
    }

    /// Drop every request past its TTL and hand them back for notification
    pub fn expire(&mut self, now: Instant) -> Vec<GameRequest> {
        let expired: Vec<Uuid> = self
            .requests
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.request_id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.requests.remove(&id))
            .collect()
    }

    /// Drop everything a player left behind when their connection goes away
    pub fn forget(&mut self, player_id: Uuid) -> Vec<GameRequest> {
        self.cancel(player_id);
        let orphaned: Vec<Uuid> = self
            .requests
            .values()
            .filter(|r| r.involves(player_id))
            .map(|r| r.request_id)
            .collect();

        orphaned
            .into_iter()
            .filter_map(|id| self.requests.remove(&id))
            .collect()
    }

    /// Seat players paired outside the queue (tournament entrants). All or nothing.
    pub fn reserve(&mut self, players: &[PlayerRef]) -> Result<(), MatchmakingError> {
        if players.iter().any(|p| self.in_match.contains(&p.id)) {
            return Err(MatchmakingError::AlreadyInMatch);
        }
        for player in players {
            self.cancel(player.id);
            self.in_match.insert(player.id);
        }
        Ok(())
    }

    /// Players whose session has ended may queue again
    pub fn release(&mut self, players: &[PlayerRef]) {
        for player in players {
            self.in_match.remove(&player.id);
        }
    }

    fn seat(&mut self, players: [PlayerRef; 2]) -> [PlayerRef; 2] {
        for player in &players {
            self.in_match.insert(player.id);
        }
        players
    }

    /// Check if a player is in the queue
    pub fn contains(&self, player_id: &Uuid) -> bool {
        self.tickets.iter().any(|t| &t.player.id == player_id)
    }

    pub fn is_in_match(&self, player_id: &Uuid) -> bool {
        self.in_match.contains(player_id)
    }

    /// Get queue length
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }
}

impl Default for MatchmakingQueue {
    fn default() -> Self {
        Self::new(super::requests::DEFAULT_REQUEST_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(name: &str) -> PlayerRef {
        PlayerRef::new(Uuid::new_v4(), name)
    }

    #[test]
    fn pairs_first_two_in_fifo_order() {
        let mut queue = MatchmakingQueue::default();
        let now = Instant::now();
        let (a, b, c) = (player("a"), player("b"), player("c"));

        queue.enqueue(a.clone(), now).unwrap();
        assert!(queue.try_pair().is_none());
        queue.enqueue(b.clone(), now).unwrap();
        queue.enqueue(c.clone(), now).unwrap();

        assert_eq!(queue.try_pair(), Some([a.clone(), b.clone()]));
        assert!(queue.try_pair().is_none());
        assert_eq!(queue.len(), 1);
        assert!(queue.is_in_match(&a.id));

        assert_eq!(queue.enqueue(a.clone(), now), Err(MatchmakingError::AlreadyInMatch));
        assert_eq!(queue.enqueue(c.clone(), now), Err(MatchmakingError::AlreadyQueued));

        queue.release(&[a.clone(), b]);
        assert!(queue.enqueue(a, now).is_ok());
    }

    #[test]
    fn cancel_removes_ticket() {
        let mut queue = MatchmakingQueue::default();
        let a = player("a");
        queue.enqueue(a.clone(), Instant::now()).unwrap();
        assert_eq!(queue.cancel(a.id).map(|t| t.player), Some(a.clone()));
        assert!(queue.cancel(a.id).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn one_request_per_unordered_pair() {
        let mut queue = MatchmakingQueue::default();
        let now = Instant::now();
        let (a, b) = (player("a"), player("b"));

        assert_eq!(
            queue.direct_request(a.clone(), a.clone(), now).unwrap_err(),
            MatchmakingError::SelfRequest
        );
        queue.direct_request(a.clone(), b.clone(), now).unwrap();
        assert_eq!(
            queue.direct_request(b.clone(), a.clone(), now).unwrap_err(),
            MatchmakingError::DuplicateRequest
        );
        assert_eq!(queue.pending_requests(), 1);
    }

    #[test]
    fn accept_seats_both_and_clears_tickets() {
        let mut queue = MatchmakingQueue::default();
        let now = Instant::now();
        let (a, b) = (player("a"), player("b"));
        queue.enqueue(b.clone(), now).unwrap();
        let request = queue.direct_request(a.clone(), b.clone(), now).unwrap();

        assert_eq!(
            queue.accept(request.request_id, a.id, now).unwrap_err(),
            MatchmakingError::NotRequestTarget
        );
        let (_, players) = queue.accept(request.request_id, b.id, now).unwrap();
        assert_eq!(players, [a.clone(), b.clone()]);
        assert!(queue.is_empty());
        assert!(queue.is_in_match(&a.id) && queue.is_in_match(&b.id));
        assert_eq!(
            queue.accept(request.request_id, b.id, now).unwrap_err(),
            MatchmakingError::RequestNotFound
        );
    }

    #[test]
    fn late_accept_is_rejected_and_sweep_expires() {
        let mut queue = MatchmakingQueue::default();
        let now = Instant::now();
        let (a, b, c) = (player("a"), player("b"), player("c"));
        let first = queue.direct_request(a.clone(), b.clone(), now).unwrap();
        let second = queue.direct_request(c.clone(), b.clone(), now).unwrap();

        let later = now + Duration::from_secs(11);
        assert_eq!(
            queue.accept(first.request_id, b.id, later).unwrap_err(),
            MatchmakingError::RequestExpired
        );
        assert_eq!(queue.pending_requests(), 2);

        let mut expired: Vec<_> = queue.expire(later).into_iter().map(|r| r.request_id).collect();
        expired.sort();
        let mut expected = vec![first.request_id, second.request_id];
        expected.sort();
        assert_eq!(expired, expected);
        assert_eq!(queue.pending_requests(), 0);
        assert!(!queue.is_in_match(&b.id));
    }

    #[test]
    fn reserve_is_all_or_nothing() {
        let mut queue = MatchmakingQueue::default();
        let now = Instant::now();
        let (a, b, c, d) = (player("a"), player("b"), player("c"), player("d"));
        queue.enqueue(a.clone(), now).unwrap();
        queue.enqueue(b.clone(), now).unwrap();
        queue.try_pair().unwrap();
        queue.enqueue(c.clone(), now).unwrap();

        assert_eq!(
            queue.reserve(&[c.clone(), d.clone(), a.clone()]),
            Err(MatchmakingError::AlreadyInMatch)
        );
        assert!(!queue.is_in_match(&c.id) && !queue.is_in_match(&d.id));
        assert!(queue.contains(&c.id));

        queue.reserve(&[c.clone(), d.clone()]).unwrap();
        assert!(queue.is_empty());
        assert_eq!(queue.enqueue(d.clone(), now), Err(MatchmakingError::AlreadyInMatch));
        assert_eq!(
            queue.direct_request(a.clone(), c.clone(), now).unwrap_err(),
            MatchmakingError::AlreadyInMatch
        );

        queue.release(&[c, d.clone()]);
        assert!(queue.enqueue(d, now).is_ok());
    }

    #[test]
    fn decline_only_by_target() {
        let mut queue = MatchmakingQueue::default();
        let (a, b) = (player("a"), player("b"));
        let request = queue.direct_request(a.clone(), b.clone(), Instant::now()).unwrap();
        assert_eq!(
            queue.decline(request.request_id, a.id).unwrap_err(),
            MatchmakingError::NotRequestTarget
        );
        let declined = queue.decline(request.request_id, b.id).unwrap();
        assert_eq!(declined.requester, a);
        assert_eq!(queue.pending_requests(), 0);
    }

    #[test]
    fn forget_drops_tickets_and_requests() {
        let mut queue = MatchmakingQueue::default();
        let now = Instant::now();
        let (a, b) = (player("a"), player("b"));
        queue.enqueue(a.clone(), now).unwrap();
        queue.direct_request(b, a.clone(), now).unwrap();

        assert_eq!(queue.forget(a.id).len(), 1);
        assert!(queue.is_empty());
        assert_eq!(queue.pending_requests(), 0);
    }
}
