//! Drives one bracket from the first semi-final to the champion

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

use crate::game::{Intent, MatchHandle, MatchOutcome, MatchRegistry, PlayerRef, SessionSettings};
use crate::store::{ResultReport, ResultReporter};
use crate::ws::protocol::ControlEvent;
use crate::ws::transport::SessionTransport;

use super::bracket::{Pairing, Round, TournamentBracket, TournamentError, TournamentResult};

/// A match started on behalf of a tournament
pub struct LaunchedMatch {
    pub game_id: Uuid,
    /// Live session handle, absent for launchers that do not run real sessions
    pub handle: Option<MatchHandle>,
    pub outcome: oneshot::Receiver<MatchOutcome>,
}

/// Starts the matches a bracket asks for
pub trait MatchLauncher: Send + Sync + 'static {
    fn launch(
        &self,
        players: [PlayerRef; 2],
        transports: [Option<SessionTransport>; 2],
    ) -> impl Future<Output = LaunchedMatch> + Send;
}

/// Launches real match sessions through the shared registry
pub struct SessionLauncher {
    registry: Arc<MatchRegistry>,
    settings: SessionSettings,
}

impl SessionLauncher {
    pub fn new(registry: Arc<MatchRegistry>, settings: SessionSettings) -> Self {
        Self { registry, settings }
    }
}

impl MatchLauncher for SessionLauncher {
    async fn launch(
        &self,
        players: [PlayerRef; 2],
        transports: [Option<SessionTransport>; 2],
    ) -> LaunchedMatch {
        let (handle, outcome) =
            self.registry
                .launch(players.clone(), self.settings.clone(), rand::random::<u64>());

        for (player, transport) in players.iter().zip(transports) {
            let Some(transport) = transport else {
                continue;
            };
            if let Err(e) = handle.attach(player.id, transport).await {
                warn!(player_id = %player.id, error = %e, "Could not attach tournament player");
            }
        }

        LaunchedMatch {
            game_id: handle.id,
            handle: Some(handle),
            outcome,
        }
    }
}

#[derive(Debug)]
pub enum TournamentCommand {
    /// The player left the tournament channel
    Withdraw { player_id: Uuid },
}

/// Cheap handle to a running tournament
#[derive(Clone)]
pub struct TournamentHandle {
    pub id: Uuid,
    current: Arc<RwLock<Option<MatchHandle>>>,
    command_tx: mpsc::Sender<TournamentCommand>,
}

impl TournamentHandle {
    /// Forward a paddle intent to the player's live match, if they are in it
    pub fn route_intent(&self, player_id: Uuid, intent: Intent) -> bool {
        self.current
            .read()
            .as_ref()
            .is_some_and(|handle| handle.submit_intent(player_id, intent))
    }

    pub fn current_game(&self) -> Option<Uuid> {
        self.current.read().as_ref().map(|h| h.id)
    }

    pub fn withdraw(&self, player_id: Uuid) {
        if self
            .command_tx
            .try_send(TournamentCommand::Withdraw { player_id })
            .is_err()
        {
            warn!(tournament_id = %self.id, player_id = %player_id, "Tournament not accepting commands");
        }
    }
}

pub struct TournamentOrchestrator<L> {
    bracket: TournamentBracket,
    launcher: Arc<L>,
    /// Tournament channel connections, looked up fresh for every match
    connections: Arc<DashMap<Uuid, SessionTransport>>,
    reporter: ResultReporter,
    current: Arc<RwLock<Option<MatchHandle>>>,
    command_rx: mpsc::Receiver<TournamentCommand>,
    withdrawn: HashSet<Uuid>,
}

impl<L: MatchLauncher> TournamentOrchestrator<L> {
    pub fn new(
        tournament_id: Uuid,
        players: Vec<PlayerRef>,
        launcher: Arc<L>,
        connections: Arc<DashMap<Uuid, SessionTransport>>,
        reporter: ResultReporter,
    ) -> Result<(Self, TournamentHandle), TournamentError> {
        let bracket = TournamentBracket::new(tournament_id, players)?;
        let (command_tx, command_rx) = mpsc::channel(16);
        let current = Arc::new(RwLock::new(None));

        let handle = TournamentHandle {
            id: tournament_id,
            current: current.clone(),
            command_tx,
        };

        let orchestrator = Self {
            bracket,
            launcher,
            connections,
            reporter,
            current,
            command_rx,
            withdrawn: HashSet::new(),
        };

        Ok((orchestrator, handle))
    }

    pub fn id(&self) -> Uuid {
        self.bracket.tournament_id
    }

    /// Play every round in order and report the champion
    pub async fn run(mut self) -> Result<TournamentResult, TournamentError> {
        let tournament_id = self.id();
        info!(
            tournament_id = %tournament_id,
            players = ?self.bracket.players().iter().map(|p| p.username.as_str()).collect::<Vec<_>>(),
            "Tournament started"
        );

        while self.bracket.round() != Round::Complete {
            self.drain_commands();

            if let Some(walkover) = self.bracket.settle_withdrawals(&self.withdrawn)? {
                info!(
                    tournament_id = %tournament_id,
                    winner = %walkover.winner.username,
                    loser = %walkover.loser().username,
                    "Walkover after withdrawal"
                );
                continue;
            }

            let Some(pairing) = self.bracket.next_pairing() else {
                break;
            };
            let result = self.play(pairing).await?;
            self.bracket.record(result)?;
        }

        let result = self
            .bracket
            .result()
            .ok_or(TournamentError::AlreadyComplete)?;

        for player in self.bracket.players() {
            self.notify(
                player.id,
                ControlEvent::TournamentEnd {
                    winner: result.champion.username.clone(),
                },
            );
        }
        self.reporter.report(ResultReport::Tournament(result.clone()));

        info!(
            tournament_id = %tournament_id,
            champion = %result.champion.username,
            "Tournament complete"
        );
        Ok(result)
    }

    async fn play(&mut self, pairing: Pairing) -> Result<crate::game::MatchResult, TournamentError> {
        let transports = [&pairing.players[0], &pairing.players[1]]
            .map(|p| self.connections.get(&p.id).map(|t| t.clone()));

        let launched = self.launcher.launch(pairing.players.clone(), transports).await;
        let game_id = launched.game_id;
        *self.current.write() = launched.handle.clone();

        info!(
            tournament_id = %self.id(),
            game_id = %game_id,
            stage = pairing.stage.label(),
            player1 = %pairing.players[0].username,
            player2 = %pairing.players[1].username,
            "Tournament match started"
        );

        for (player, opponent) in [
            (&pairing.players[0], &pairing.players[1]),
            (&pairing.players[1], &pairing.players[0]),
        ] {
            self.notify(
                player.id,
                ControlEvent::MatchStarted {
                    game_id,
                    opponent: opponent.clone(),
                },
            );
        }

        let mut outcome_rx = launched.outcome;
        let outcome = loop {
            tokio::select! {
                outcome = &mut outcome_rx => break outcome,
                Some(command) = self.command_rx.recv() => {
                    self.apply(command, launched.handle.as_ref()).await;
                }
            }
        };
        *self.current.write() = None;

        match outcome {
            Ok(MatchOutcome::Completed(result)) => Ok(result),
            Ok(MatchOutcome::Abandoned { match_id }) => Err(TournamentError::MatchAbandoned(match_id)),
            Err(_) => Err(TournamentError::SessionLost(game_id)),
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(TournamentCommand::Withdraw { player_id }) = self.command_rx.try_recv() {
            self.withdrawn.insert(player_id);
        }
    }

    async fn apply(&mut self, command: TournamentCommand, live: Option<&MatchHandle>) {
        match command {
            TournamentCommand::Withdraw { player_id } => {
                self.withdrawn.insert(player_id);
                let Some(handle) = live.filter(|h| h.side_of(player_id).is_some()) else {
                    return;
                };
                info!(tournament_id = %self.id(), player_id = %player_id, "Player withdrew mid-match");
                if handle.disconnect(player_id).await.is_err() {
                    warn!(game_id = %handle.id, "Session already gone");
                }
            }
        }
    }

    fn notify(&self, player_id: Uuid, event: ControlEvent) {
        if let Some(transport) = self.connections.get(&player_id) {
            let _ = transport.send_control(event);
        }
    }
}
