//! Matchmaking service - manages queue, direct requests and match creation

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::{MatchOutcome, MatchRegistry, PlayerRef, SessionSettings};
use crate::store::{ResultReport, ResultReporter};
use crate::ws::protocol::ControlEvent;
use crate::ws::transport::SessionTransport;

use super::queue::{MatchmakingError, MatchmakingQueue};
use super::requests::GameRequest;

/// How often the sweeper looks for expired requests
const SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// A freshly created standalone match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchCreated {
    pub game_id: Uuid,
    pub players: [PlayerRef; 2],
}

/// Matchmaking service
pub struct MatchmakingService {
    queue: Mutex<MatchmakingQueue>,
    registry: Arc<MatchRegistry>,
    settings: SessionSettings,
    reporter: ResultReporter,
    /// Players connected on the matchmaking channel
    notifiers: DashMap<Uuid, SessionTransport>,
}

impl MatchmakingService {
    pub fn new(
        registry: Arc<MatchRegistry>,
        settings: SessionSettings,
        request_ttl: Duration,
        reporter: ResultReporter,
    ) -> Self {
        Self {
            queue: Mutex::new(MatchmakingQueue::new(request_ttl)),
            registry,
            settings,
            reporter,
            notifiers: DashMap::new(),
        }
    }

    /// Register a matchmaking channel connection (called when WebSocket connects)
    pub fn register_player(&self, transport: SessionTransport) {
        self.notifiers.insert(transport.player_id(), transport);
    }

    /// Unregister a player (called when WebSocket disconnects).
    /// Their ticket and any requests they were part of are dropped.
    pub fn unregister_player(&self, player_id: Uuid) {
        self.notifiers.remove(&player_id);

        let orphaned = self.queue.lock().forget(player_id);
        for request in orphaned {
            if request.requester.id != player_id {
                self.notify(
                    request.requester.id,
                    ControlEvent::RequestDeclined {
                        request_id: request.request_id,
                    },
                );
            }
        }

        info!(player_id = %player_id, "Player unregistered from matchmaking");
    }

    /// Join the queue. Pairs immediately when someone is already waiting.
    pub fn join_queue(
        self: &Arc<Self>,
        player: PlayerRef,
    ) -> Result<Option<MatchCreated>, MatchmakingError> {
        let player_id = player.id;

        let pairing = {
            let mut queue = self.queue.lock();
            queue.enqueue(player, Instant::now())?;
            info!(player_id = %player_id, queue_size = queue.len(), "Player joined matchmaking queue");
            queue.try_pair()
        };

        Ok(pairing.map(|players| self.create_match(players)))
    }

    /// Leave the queue; returns whether a ticket was removed
    pub fn leave_queue(&self, player_id: Uuid) -> bool {
        let removed = self.queue.lock().cancel(player_id).is_some();
        if removed {
            info!(player_id = %player_id, "Player left matchmaking queue");
        }
        removed
    }

    /// Challenge a specific player
    pub fn request_game(
        &self,
        requester: PlayerRef,
        target: PlayerRef,
    ) -> Result<GameRequest, MatchmakingError> {
        let now = Instant::now();
        let request = self.queue.lock().direct_request(requester, target, now)?;

        info!(
            request_id = %request.request_id,
            requester = %request.requester.username,
            target = %request.target.username,
            "Game request created"
        );

        self.notify(
            request.target.id,
            ControlEvent::GameRequest {
                request_id: request.request_id,
                requester: request.requester.clone(),
                expires_in: request.expires_in(now),
            },
        );

        Ok(request)
    }

    /// Target accepts a pending request; a match is created for both
    pub fn accept_request(
        self: &Arc<Self>,
        request_id: Uuid,
        by: Uuid,
    ) -> Result<MatchCreated, MatchmakingError> {
        let now = Instant::now();
        let result = self.queue.lock().accept(request_id, by, now);

        match result {
            Ok((request, players)) => {
                info!(request_id = %request.request_id, "Game request accepted");
                Ok(self.create_match(players))
            }
            Err(MatchmakingError::RequestExpired) => {
                // Expire it now so requester and target hear about it together
                self.sweep_at(now);
                Err(MatchmakingError::RequestExpired)
            }
            Err(e) => Err(e),
        }
    }

    /// Target declines; the requester is told
    pub fn decline_request(&self, request_id: Uuid, by: Uuid) -> Result<(), MatchmakingError> {
        let request = self.queue.lock().decline(request_id, by)?;

        info!(request_id = %request_id, "Game request declined");
        self.notify(
            request.requester.id,
            ControlEvent::RequestDeclined { request_id },
        );
        Ok(())
    }

    /// Mark players busy for a session this service did not pair (tournaments).
    /// Their tickets are dropped; nothing else can seat them until `release`.
    pub fn reserve(&self, players: &[PlayerRef]) -> Result<(), MatchmakingError> {
        self.queue.lock().reserve(players)?;
        debug!(players = players.len(), "Players reserved outside the queue");
        Ok(())
    }

    pub fn release(&self, players: &[PlayerRef]) {
        self.queue.lock().release(players);
    }

    /// Create a session for two seated players and tell them where to connect
    fn create_match(self: &Arc<Self>, players: [PlayerRef; 2]) -> MatchCreated {
        let seed = rand::random::<u64>();
        let (handle, outcome_rx) = self
            .registry
            .launch(players.clone(), self.settings.clone(), seed);

        info!(
            match_id = %handle.id,
            player1 = %players[0].username,
            player2 = %players[1].username,
            "Created new match"
        );

        for player in &players {
            self.notify(player.id, ControlEvent::Matched { game_id: handle.id });
        }

        let service = self.clone();
        let seated = players.clone();
        tokio::spawn(async move {
            service.await_outcome(handle.id, seated, outcome_rx).await;
        });

        MatchCreated {
            game_id: handle.id,
            players,
        }
    }

    /// Release the players once their session ends and forward the result
    async fn await_outcome(
        &self,
        match_id: Uuid,
        players: [PlayerRef; 2],
        outcome_rx: oneshot::Receiver<MatchOutcome>,
    ) {
        let outcome = outcome_rx.await;
        self.queue.lock().release(&players);

        match outcome {
            Ok(MatchOutcome::Completed(result)) => {
                self.reporter.report(ResultReport::Match(result));
            }
            Ok(MatchOutcome::Abandoned { .. }) => {
                info!(match_id = %match_id, "Match abandoned, nothing to report");
            }
            Err(_) => {
                warn!(match_id = %match_id, "Match task ended without an outcome");
            }
        }
    }

    /// Expire stale requests once
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let expired = self.queue.lock().expire(now);
        for request in &expired {
            debug!(request_id = %request.request_id, "Game request expired");
            let event = ControlEvent::RequestExpired {
                request_id: request.request_id,
            };
            self.notify(request.requester.id, event.clone());
            self.notify(request.target.id, event);
        }
        expired.len()
    }

    /// Run the matchmaking service (periodic request expiry)
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            interval.tick().await;
            self.sweep();
        }
    }

    /// Push a control event to a player's matchmaking channel, if connected
    fn notify(&self, player_id: Uuid, event: ControlEvent) {
        let Some(transport) = self.notifiers.get(&player_id).map(|t| t.clone()) else {
            return;
        };
        match transport.send_control(event) {
            Ok(true) => {}
            Ok(false) => warn!(player_id = %player_id, "Matchmaking channel backlogged, event dropped"),
            Err(_) => {
                self.notifiers.remove(&player_id);
            }
        }
    }

    /// Get current queue size
    pub fn queue_size(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn pending_requests(&self) -> usize {
        self.queue.lock().pending_requests()
    }

    pub fn is_in_match(&self, player_id: &Uuid) -> bool {
        self.queue.lock().is_in_match(player_id)
    }
}
