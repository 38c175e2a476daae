//! Tournament lobby and the registry of running tournaments

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::game::{Intent, PlayerRef};
use crate::matchmaking::{MatchmakingError, MatchmakingService};
use crate::store::ResultReporter;
use crate::ws::protocol::ControlEvent;
use crate::ws::transport::SessionTransport;

use super::bracket::{TournamentError, BRACKET_SIZE};
use super::orchestrator::{MatchLauncher, TournamentHandle, TournamentOrchestrator};

/// Lobby membership after a join
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyJoin {
    Waiting { participants: usize },
    Started { tournament_id: Uuid },
}

pub struct TournamentService<L> {
    launcher: Arc<L>,
    /// Owner of the busy-player set shared with standalone matches
    matchmaking: Arc<MatchmakingService>,
    reporter: ResultReporter,
    lobby: Mutex<Vec<PlayerRef>>,
    connections: Arc<DashMap<Uuid, SessionTransport>>,
    tournaments: Arc<DashMap<Uuid, TournamentHandle>>,
    /// Player -> tournament they are entered in
    entries: Arc<DashMap<Uuid, Uuid>>,
}

impl<L: MatchLauncher> TournamentService<L> {
    pub fn new(
        launcher: Arc<L>,
        matchmaking: Arc<MatchmakingService>,
        reporter: ResultReporter,
    ) -> Self {
        Self {
            launcher,
            matchmaking,
            reporter,
            lobby: Mutex::new(Vec::new()),
            connections: Arc::new(DashMap::new()),
            tournaments: Arc::new(DashMap::new()),
            entries: Arc::new(DashMap::new()),
        }
    }

    /// A tournament channel socket opened. A reconnect replaces the old transport.
    pub fn connect(&self, transport: SessionTransport) {
        self.connections.insert(transport.player_id(), transport);
    }

    /// A tournament channel socket closed. Only the player's current
    /// connection counts; a socket already replaced by a reconnect is ignored.
    pub fn disconnect(&self, transport: &SessionTransport) {
        let player_id = transport.player_id();
        let current = self
            .connections
            .remove_if(&player_id, |_, t| t.same_channel(transport))
            .is_some();

        if current {
            self.leave(player_id);
        } else {
            debug!(player_id = %player_id, "Stale tournament socket closed");
        }
    }

    /// Enter the lobby; the fourth player starts a tournament in join order
    pub fn join_lobby(&self, player: PlayerRef) -> Result<LobbyJoin, TournamentError> {
        if self.entries.contains_key(&player.id) {
            return Err(TournamentError::AlreadyEntered(player.id));
        }
        if self.matchmaking.is_in_match(&player.id) {
            return Err(MatchmakingError::AlreadyInMatch.into());
        }

        let (participants, full) = {
            let mut lobby = self.lobby.lock();
            if !lobby.iter().any(|p| p.id == player.id) {
                lobby.push(player.clone());
                info!(player_id = %player.id, lobby_size = lobby.len(), "Player joined tournament lobby");
            }
            let full = if lobby.len() >= BRACKET_SIZE {
                Some(lobby.drain(..BRACKET_SIZE).collect::<Vec<_>>())
            } else {
                None
            };
            (lobby.clone(), full)
        };

        let Some(players) = full else {
            self.broadcast_status(&participants, participants.clone());
            return Ok(LobbyJoin::Waiting {
                participants: participants.len(),
            });
        };

        match self.start(players.clone()) {
            Ok(tournament_id) => {
                self.broadcast_status(&players, players.clone());
                Ok(LobbyJoin::Started { tournament_id })
            }
            Err(e) => {
                warn!(error = %e, "Lobby could not start a tournament");
                let participants = self.readmit(players);
                self.broadcast_status(&participants, participants.clone());
                if participants.iter().any(|p| p.id == player.id) {
                    Ok(LobbyJoin::Waiting {
                        participants: participants.len(),
                    })
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Start a tournament for exactly four players in seeding order
    pub fn start(&self, players: Vec<PlayerRef>) -> Result<Uuid, TournamentError> {
        if let Some(entered) = players.iter().find(|p| self.entries.contains_key(&p.id)) {
            return Err(TournamentError::AlreadyEntered(entered.id));
        }

        let tournament_id = Uuid::new_v4();
        let (orchestrator, handle) = TournamentOrchestrator::new(
            tournament_id,
            players.clone(),
            self.launcher.clone(),
            self.connections.clone(),
            self.reporter.clone(),
        )?;

        // Entrants stay busy for the whole tournament, between matches too
        self.matchmaking.reserve(&players)?;

        for player in &players {
            self.entries.insert(player.id, tournament_id);
        }
        self.tournaments.insert(tournament_id, handle);

        let tournaments = self.tournaments.clone();
        let entries = self.entries.clone();
        let connections = self.connections.clone();
        let matchmaking = self.matchmaking.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.run().await {
                error!(tournament_id = %tournament_id, error = %e, "Tournament failed");
                for player in &players {
                    if let Some(transport) = connections.get(&player.id) {
                        let _ = transport.send_control(ControlEvent::QueueError {
                            message: e.to_string(),
                        });
                    }
                }
            }
            tournaments.remove(&tournament_id);
            for player in &players {
                entries.remove_if(&player.id, |_, t| *t == tournament_id);
            }
            matchmaking.release(&players);
        });

        Ok(tournament_id)
    }

    /// Leave the lobby, or withdraw from a running tournament
    pub fn leave(&self, player_id: Uuid) {
        let remaining = {
            let mut lobby = self.lobby.lock();
            let before = lobby.len();
            lobby.retain(|p| p.id != player_id);
            (lobby.len() != before).then(|| lobby.clone())
        };
        if let Some(participants) = remaining {
            info!(player_id = %player_id, "Player left tournament lobby");
            self.broadcast_status(&participants, participants.clone());
            return;
        }

        if let Some(handle) = self.tournament_of(player_id) {
            info!(tournament_id = %handle.id, player_id = %player_id, "Player withdrew from tournament");
            handle.withdraw(player_id);
        }
    }

    /// Forward an intent from the tournament channel to the player's live match
    pub fn route_intent(&self, player_id: Uuid, intent: Intent) -> bool {
        self.tournament_of(player_id)
            .is_some_and(|handle| handle.route_intent(player_id, intent))
    }

    pub fn tournament_of(&self, player_id: Uuid) -> Option<TournamentHandle> {
        let tournament_id = *self.entries.get(&player_id)?;
        self.tournaments.get(&tournament_id).map(|h| h.clone())
    }

    pub fn lobby_size(&self) -> usize {
        self.lobby.lock().len()
    }

    pub fn active_tournaments(&self) -> usize {
        self.tournaments.len()
    }

    /// Put players from a failed start back at the head of the lobby,
    /// minus anyone who got seated elsewhere in the meantime
    fn readmit(&self, players: Vec<PlayerRef>) -> Vec<PlayerRef> {
        let mut lobby = self.lobby.lock();
        let eligible: Vec<_> = players
            .into_iter()
            .filter(|p| {
                !self.entries.contains_key(&p.id)
                    && !self.matchmaking.is_in_match(&p.id)
                    && !lobby.iter().any(|q| q.id == p.id)
            })
            .collect();
        lobby.splice(0..0, eligible);
        lobby.clone()
    }

    fn broadcast_status(&self, recipients: &[PlayerRef], participants: Vec<PlayerRef>) {
        let event = ControlEvent::TournamentStatus { participants };
        for player in recipients {
            if let Some(transport) = self.connections.get(&player.id) {
                let _ = transport.send_control(event.clone());
            }
        }
    }
}
