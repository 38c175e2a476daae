//! Match session state machine and authoritative tick loop

use dashmap::DashMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::util::time::{tick_delta, tick_duration, ticks_for, DEFAULT_TICK_RATE};
use crate::ws::protocol::{ControlEvent, GameOverReason, PlayerCard, PlayerInfoData};
use crate::ws::transport::{ServerFrame, SessionTransport};

use super::physics::{FixedStep, PhysicsConfig, PhysicsEngine};
use super::snapshot::{self, SnapshotStats};
use super::state::{
    Intent, MatchEndReason, MatchOutcome, MatchResult, MatchState, PlayerRef, Side,
};

/// Most fixed steps simulated in one wake-up when the loop falls behind
const MAX_CATCH_UP_STEPS: u32 = 5;

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Waiting for both transports to attach
    WaitingForPlayers,
    /// Both present, short delay before the first serve
    Starting,
    /// Ball in play
    InProgress,
    /// Brief pause after a point, ball held at centre
    PointScored,
    /// Someone reached the win threshold
    Finished,
    /// Ended by disconnection or an empty seat
    Aborted,
}

impl MatchPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, MatchPhase::Finished | MatchPhase::Aborted)
    }
}

/// Scoring and timing for one session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub physics: PhysicsConfig,
    pub tick_rate: u32,
    /// First to this many points wins
    pub win_threshold: u32,
    /// Time between both players attaching and the first serve
    pub start_delay: Duration,
    /// Pause after each point
    pub serve_delay: Duration,
    /// How long a seat may stay empty before the session gives up
    pub join_grace: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            physics: PhysicsConfig::default(),
            tick_rate: DEFAULT_TICK_RATE,
            win_threshold: 11,
            start_delay: Duration::from_secs(3),
            serve_delay: Duration::from_secs(1),
            join_grace: Duration::from_secs(30),
        }
    }
}

impl SessionSettings {
    pub fn with_win_threshold(mut self, win_threshold: u32) -> Self {
        self.win_threshold = win_threshold.max(1);
        self
    }
}

/// Latest paddle intent per player. Written by socket tasks, read once per tick.
#[derive(Debug, Default)]
pub struct IntentSlots {
    slots: [AtomicU8; 2],
}

impl IntentSlots {
    pub fn store(&self, side: Side, intent: Intent) {
        self.slots[side.index()].store(intent.as_u8(), Ordering::Relaxed);
    }

    pub fn load(&self, side: Side) -> Intent {
        Intent::from_u8(self.slots[side.index()].load(Ordering::Relaxed))
    }
}

/// Connection lifecycle commands, drained at the top of every tick
#[derive(Debug)]
pub enum SessionCommand {
    Attach {
        player_id: Uuid,
        transport: SessionTransport,
    },
    Disconnect {
        player_id: Uuid,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("match session {0} is no longer running")]
pub struct SessionGone(pub Uuid);

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub players: [PlayerRef; 2],
    intents: Arc<IntentSlots>,
    command_tx: mpsc::Sender<SessionCommand>,
}

impl MatchHandle {
    pub fn side_of(&self, player_id: Uuid) -> Option<Side> {
        if self.players[0].id == player_id {
            Some(Side::Player1)
        } else if self.players[1].id == player_id {
            Some(Side::Player2)
        } else {
            None
        }
    }

    /// Overwrite the player's intent slot. Never blocks; returns false for strangers.
    pub fn submit_intent(&self, player_id: Uuid, intent: Intent) -> bool {
        match self.side_of(player_id) {
            Some(side) => {
                self.intents.store(side, intent);
                true
            }
            None => false,
        }
    }

    pub async fn attach(
        &self,
        player_id: Uuid,
        transport: SessionTransport,
    ) -> Result<(), SessionGone> {
        self.command_tx
            .send(SessionCommand::Attach {
                player_id,
                transport,
            })
            .await
            .map_err(|_| SessionGone(self.id))
    }

    pub async fn disconnect(&self, player_id: Uuid) -> Result<(), SessionGone> {
        self.command_tx
            .send(SessionCommand::Disconnect { player_id })
            .await
            .map_err(|_| SessionGone(self.id))
    }
}

/// Registry of all active matches, used to route sockets and intents
pub struct MatchRegistry {
    matches: DashMap<Uuid, MatchHandle>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn insert(&self, handle: MatchHandle) {
        self.matches.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.remove(id).map(|(_, h)| h)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    /// Create a session, register it and spawn its tick loop.
    /// The receiver resolves once the session has ended and left the registry.
    pub fn launch(
        self: &Arc<Self>,
        players: [PlayerRef; 2],
        settings: SessionSettings,
        seed: u64,
    ) -> (MatchHandle, oneshot::Receiver<MatchOutcome>) {
        let match_id = Uuid::new_v4();
        let (session, handle) = MatchSession::new(match_id, players, settings, seed);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        self.insert(handle.clone());

        let registry = self.clone();
        tokio::spawn(async move {
            let outcome = session.run().await;
            registry.remove(&match_id);
            debug!(match_id = %match_id, "Match removed from registry");
            let _ = outcome_tx.send(outcome);
        });

        (handle, outcome_rx)
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative match between two players
pub struct MatchSession {
    id: Uuid,
    players: [PlayerRef; 2],
    settings: SessionSettings,
    engine: PhysicsEngine,
    rng: ChaCha8Rng,
    state: MatchState,
    phase: MatchPhase,
    intents: Arc<IntentSlots>,
    command_rx: mpsc::Receiver<SessionCommand>,
    transports: [Option<SessionTransport>; 2],
    tick: u64,
    phase_ticks: u32,
    waiting_ticks: u32,
    outcome: Option<MatchOutcome>,
    stats: SnapshotStats,
}

impl MatchSession {
    /// Create a new session in `WaitingForPlayers`
    pub fn new(
        id: Uuid,
        players: [PlayerRef; 2],
        settings: SessionSettings,
        seed: u64,
    ) -> (Self, MatchHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let intents = Arc::new(IntentSlots::default());
        let engine = PhysicsEngine::new(settings.physics);

        let handle = MatchHandle {
            id,
            players: players.clone(),
            intents: intents.clone(),
            command_tx,
        };

        let session = Self {
            id,
            players,
            state: engine.initial_state(),
            engine,
            settings,
            rng: ChaCha8Rng::seed_from_u64(seed),
            phase: MatchPhase::WaitingForPlayers,
            intents,
            command_rx,
            transports: [None, None],
            tick: 0,
            phase_ticks: 0,
            waiting_ticks: 0,
            outcome: None,
            stats: SnapshotStats::default(),
        };

        (session, handle)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn state(&self) -> &MatchState {
        &self.state
    }

    pub fn outcome(&self) -> Option<&MatchOutcome> {
        self.outcome.as_ref()
    }

    /// Ticks simulated so far
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    fn side_of(&self, player_id: Uuid) -> Option<Side> {
        if self.players[0].id == player_id {
            Some(Side::Player1)
        } else if self.players[1].id == player_id {
            Some(Side::Player2)
        } else {
            None
        }
    }

    fn player(&self, side: Side) -> &PlayerRef {
        &self.players[side.index()]
    }

    pub fn submit_intent(&self, player_id: Uuid, intent: Intent) {
        if let Some(side) = self.side_of(player_id) {
            self.intents.store(side, intent);
        }
    }

    /// Run the authoritative tick loop until the match ends
    pub async fn run(mut self) -> MatchOutcome {
        info!(
            match_id = %self.id,
            player1 = %self.players[0].username,
            player2 = %self.players[1].username,
            win_threshold = self.settings.win_threshold,
            "Match session started"
        );

        let step = tick_duration(self.settings.tick_rate);
        let mut tick_interval = interval(step);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut fixed_step = FixedStep::new(step, MAX_CATCH_UP_STEPS);
        let mut last_wake = Instant::now();

        while !self.phase.is_terminal() {
            tick_interval.tick().await;

            let now = Instant::now();
            let due = fixed_step.advance(now.duration_since(last_wake));
            last_wake = now;

            for _ in 0..due {
                self.tick();
                if self.phase.is_terminal() {
                    break;
                }
            }
        }

        info!(
            match_id = %self.id,
            phase = ?self.phase,
            ticks = self.tick,
            snapshots_sent = self.stats.sent,
            snapshots_dropped = self.stats.dropped,
            "Match session ended"
        );

        match self.outcome.take() {
            Some(outcome) => outcome,
            None => {
                error!(match_id = %self.id, "Session ended without an outcome");
                MatchOutcome::Abandoned { match_id: self.id }
            }
        }
    }

    /// Advance the session by one fixed step
    pub fn tick(&mut self) {
        self.process_commands();
        if self.phase.is_terminal() {
            return;
        }

        self.tick += 1;
        match self.phase {
            MatchPhase::WaitingForPlayers => self.tick_waiting(),
            MatchPhase::Starting => self.tick_starting(),
            MatchPhase::InProgress => self.tick_in_progress(),
            MatchPhase::PointScored => self.tick_point_scored(),
            MatchPhase::Finished | MatchPhase::Aborted => {}
        }
    }

    fn process_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                SessionCommand::Attach {
                    player_id,
                    transport,
                } => self.attach(player_id, transport),
                SessionCommand::Disconnect { player_id } => self.handle_disconnect(player_id),
            }
        }
    }

    /// Bind a player's outbound transport. Reattaching replaces the old one.
    pub fn attach(&mut self, player_id: Uuid, transport: SessionTransport) {
        let Some(side) = self.side_of(player_id) else {
            warn!(match_id = %self.id, player_id = %player_id, "Attach from non-participant");
            return;
        };
        if self.phase.is_terminal() {
            debug!(match_id = %self.id, player_id = %player_id, "Attach after match end ignored");
            return;
        }

        self.transports[side.index()] = Some(transport);
        info!(match_id = %self.id, player_id = %player_id, side = ?side, "Player attached");
    }

    /// A player's connection went away
    pub fn handle_disconnect(&mut self, player_id: Uuid) {
        let Some(side) = self.side_of(player_id) else {
            return;
        };

        match self.phase {
            MatchPhase::InProgress | MatchPhase::PointScored => {
                self.transports[side.index()] = None;
                info!(
                    match_id = %self.id,
                    player_id = %player_id,
                    score1 = self.state.score.player1,
                    score2 = self.state.score.player2,
                    "Player disconnected mid-match"
                );
                self.conclude(
                    side.opponent(),
                    MatchEndReason::OpponentDisconnected,
                    MatchPhase::Aborted,
                );
            }
            MatchPhase::Starting => {
                self.transports[side.index()] = None;
                self.phase = MatchPhase::WaitingForPlayers;
                self.phase_ticks = 0;
                info!(match_id = %self.id, player_id = %player_id, "Player left before serve");
            }
            MatchPhase::WaitingForPlayers => {
                self.transports[side.index()] = None;
            }
            MatchPhase::Finished | MatchPhase::Aborted => {}
        }
    }

    fn tick_waiting(&mut self) {
        self.waiting_ticks += 1;

        if self.transports.iter().all(Option::is_some) {
            self.phase = MatchPhase::Starting;
            self.phase_ticks = 0;
            for side in [Side::Player1, Side::Player2] {
                let event = ControlEvent::PlayerInfo {
                    data: PlayerInfoData {
                        current_player: self.card(side),
                        opponent: self.card(side.opponent()),
                    },
                };
                self.send_to(side, event);
            }
            info!(match_id = %self.id, "Both players present, starting");
            return;
        }

        if self.waiting_ticks >= ticks_for(self.settings.join_grace, self.settings.tick_rate) {
            self.abort_unattended();
        }
    }

    fn tick_starting(&mut self) {
        let (intent1, intent2) = self.read_intents();
        self.state = self
            .engine
            .advance_paddles(&self.state, intent1, intent2, self.dt());
        self.broadcast_snapshot();

        // A closed transport during the countdown sends us back to waiting
        if self.phase != MatchPhase::Starting {
            return;
        }
        self.phase_ticks += 1;
        if self.phase_ticks >= ticks_for(self.settings.start_delay, self.settings.tick_rate) {
            self.engine.serve(&mut self.state.ball, &mut self.rng);
            self.phase = MatchPhase::InProgress;
            self.phase_ticks = 0;
            self.broadcast_control(ControlEvent::GameStart { game_id: self.id });
            info!(match_id = %self.id, "Ball served, match in progress");
        }
    }

    fn tick_in_progress(&mut self) {
        let (intent1, intent2) = self.read_intents();
        let points_before = self.state.score.total();
        self.state = self
            .engine
            .advance(&self.state, intent1, intent2, self.dt(), &mut self.rng);
        self.broadcast_snapshot();

        if self.phase.is_terminal() || self.state.score.total() == points_before {
            return;
        }

        debug!(
            match_id = %self.id,
            score1 = self.state.score.player1,
            score2 = self.state.score.player2,
            "Point scored"
        );

        if self.state.score.leader() >= self.settings.win_threshold {
            let winner = if self.state.score.player1 > self.state.score.player2 {
                Side::Player1
            } else {
                Side::Player2
            };
            self.conclude(winner, MatchEndReason::NormalCompletion, MatchPhase::Finished);
        } else {
            self.phase = MatchPhase::PointScored;
            self.phase_ticks = 0;
        }
    }

    fn tick_point_scored(&mut self) {
        let (intent1, intent2) = self.read_intents();
        self.state = self
            .engine
            .advance_paddles(&self.state, intent1, intent2, self.dt());
        self.broadcast_snapshot();

        self.phase_ticks += 1;
        if !self.phase.is_terminal()
            && self.phase_ticks >= ticks_for(self.settings.serve_delay, self.settings.tick_rate)
        {
            self.phase = MatchPhase::InProgress;
            self.phase_ticks = 0;
        }
    }

    /// Grace period ran out with at most one player attached
    fn abort_unattended(&mut self) {
        let present = [Side::Player1, Side::Player2]
            .into_iter()
            .find(|side| self.transports[side.index()].is_some());

        match present {
            Some(side) => {
                warn!(
                    match_id = %self.id,
                    winner = %self.player(side).username,
                    "Opponent never joined, awarding match"
                );
                self.conclude(side, MatchEndReason::OpponentDisconnected, MatchPhase::Aborted);
            }
            None => {
                warn!(match_id = %self.id, "Nobody joined, abandoning match");
                self.phase = MatchPhase::Aborted;
                self.outcome = Some(MatchOutcome::Abandoned { match_id: self.id });
            }
        }
    }

    /// Record the single result of this session and tell whoever is still connected
    fn conclude(&mut self, winner: Side, reason: MatchEndReason, phase: MatchPhase) {
        debug_assert!(self.outcome.is_none(), "match concluded twice");
        if self.outcome.is_some() {
            return;
        }

        let result = MatchResult {
            match_id: self.id,
            players: self.players.clone(),
            winner: self.player(winner).clone(),
            score: self.state.score,
            reason,
        };

        self.phase = phase;
        self.outcome = Some(MatchOutcome::Completed(result));

        let reason = match reason {
            MatchEndReason::NormalCompletion => None,
            MatchEndReason::OpponentDisconnected | MatchEndReason::Forfeit => {
                Some(GameOverReason::Disconnection)
            }
        };
        self.broadcast_control(ControlEvent::GameOver {
            winner: Some(self.player(winner).username.clone()),
            reason,
        });

        info!(
            match_id = %self.id,
            winner = %self.player(winner).username,
            score1 = self.state.score.player1,
            score2 = self.state.score.player2,
            phase = ?self.phase,
            "Match concluded"
        );
    }

    fn read_intents(&self) -> (Intent, Intent) {
        (
            self.intents.load(Side::Player1),
            self.intents.load(Side::Player2),
        )
    }

    fn dt(&self) -> f32 {
        tick_delta(self.settings.tick_rate)
    }

    fn card(&self, side: Side) -> PlayerCard {
        let player = self.player(side);
        PlayerCard {
            id: player.id,
            username: player.username.clone(),
            role: side.role().to_string(),
        }
    }

    fn broadcast_snapshot(&mut self) {
        let frame = snapshot::encode(&self.state);
        self.broadcast(ServerFrame::Snapshot(frame));
    }

    fn broadcast_control(&mut self, event: ControlEvent) {
        self.broadcast(ServerFrame::Control(event));
    }

    fn send_to(&mut self, side: Side, event: ControlEvent) {
        if self.deliver(side, ServerFrame::Control(event)) {
            let player_id = self.player(side).id;
            self.handle_disconnect(player_id);
        }
    }

    fn broadcast(&mut self, frame: ServerFrame) {
        let mut gone = Vec::new();
        for side in [Side::Player1, Side::Player2] {
            if self.deliver(side, frame.clone()) {
                gone.push(self.player(side).id);
            }
        }
        for player_id in gone {
            self.handle_disconnect(player_id);
        }
    }

    /// Push a frame to one side; returns true if that transport turned out closed
    fn deliver(&mut self, side: Side, frame: ServerFrame) -> bool {
        let Some(transport) = &self.transports[side.index()] else {
            return false;
        };
        let is_snapshot = matches!(frame, ServerFrame::Snapshot(_));

        match transport.send(frame) {
            Ok(delivered) => {
                if is_snapshot {
                    self.stats.record(delivered);
                } else if !delivered {
                    warn!(match_id = %self.id, side = ?side, "Control frame dropped, client backlogged");
                }
                false
            }
            Err(_) => {
                self.transports[side.index()] = None;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::snapshot::SnapshotFrame;
    use crate::game::state::Score;
    use tokio::sync::mpsc::Receiver;

    fn players() -> [PlayerRef; 2] {
        [
            PlayerRef::new(Uuid::new_v4(), "amy"),
            PlayerRef::new(Uuid::new_v4(), "bob"),
        ]
    }

    fn settings(win_threshold: u32) -> SessionSettings {
        SessionSettings {
            start_delay: Duration::from_millis(50),
            serve_delay: Duration::from_millis(50),
            join_grace: Duration::from_secs(1),
            ..SessionSettings::default()
        }
        .with_win_threshold(win_threshold)
    }

    fn attach_both(session: &mut MatchSession) -> [Receiver<ServerFrame>; 2] {
        let players = session.players.clone();
        let (t1, rx1) = SessionTransport::channel(players[0].id, 8192);
        let (t2, rx2) = SessionTransport::channel(players[1].id, 8192);
        session.attach(players[0].id, t1);
        session.attach(players[1].id, t2);
        [rx1, rx2]
    }

    fn controls(rx: &mut Receiver<ServerFrame>) -> Vec<ControlEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let ServerFrame::Control(event) = frame {
                events.push(event);
            }
        }
        events
    }

    fn tick_until_live(session: &mut MatchSession) {
        for _ in 0..100 {
            session.tick();
            if session.phase() == MatchPhase::InProgress {
                return;
            }
        }
        panic!("session never went live: {:?}", session.phase());
    }

    #[test]
    fn both_players_get_info_then_game_start() {
        let (mut session, _handle) = MatchSession::new(Uuid::new_v4(), players(), settings(5), 1);
        let [mut rx1, mut rx2] = attach_both(&mut session);

        session.tick();
        assert_eq!(session.phase(), MatchPhase::Starting);
        tick_until_live(&mut session);

        let first = controls(&mut rx1);
        let ControlEvent::PlayerInfo { data } = &first[0] else {
            panic!("expected player_info, got {:?}", first[0]);
        };
        assert_eq!(data.current_player.username, "amy");
        assert_eq!(data.current_player.role, "player1");
        assert_eq!(data.opponent.username, "bob");
        assert_eq!(first[1], ControlEvent::GameStart { game_id: session.id() });

        let second = controls(&mut rx2);
        let ControlEvent::PlayerInfo { data } = &second[0] else {
            panic!("expected player_info");
        };
        assert_eq!(data.current_player.username, "bob");
        assert_eq!(data.opponent.role, "player1");
        assert!(session.state().ball.is_served());
    }

    #[test]
    fn finishes_exactly_at_threshold() {
        let (mut session, handle) = MatchSession::new(Uuid::new_v4(), players(), settings(5), 11);
        let [mut rx1, mut rx2] = attach_both(&mut session);
        // Both paddles parked at the top: every serve from centre misses them
        for player in &handle.players {
            assert!(handle.submit_intent(player.id, Intent::Up));
        }

        let mut previous_total = 0;
        for _ in 0..20_000 {
            session.tick();
            let score = session.state().score;
            assert!(score.total() - previous_total <= 1);
            previous_total = score.total();
            if score.leader() >= 5 {
                assert_eq!(session.phase(), MatchPhase::Finished);
                break;
            }
            assert!(!session.phase().is_terminal());
            controls(&mut rx1);
            controls(&mut rx2);
        }

        assert_eq!(session.state().score.leader(), 5);
        let Some(MatchOutcome::Completed(result)) = session.outcome().cloned() else {
            panic!("no result");
        };
        assert_eq!(result.reason, MatchEndReason::NormalCompletion);
        let winner_side = if result.score.player1 == 5 { 0 } else { 1 };
        assert_eq!(result.winner, session.players[winner_side]);

        let over = controls(&mut rx1);
        assert_eq!(
            over.last(),
            Some(&ControlEvent::GameOver {
                winner: Some(result.winner.username.clone()),
                reason: None
            })
        );

        let ticks = session.tick_count();
        session.tick();
        assert_eq!(session.tick_count(), ticks);
    }

    #[test]
    fn disconnect_mid_match_awards_opponent() {
        let (mut session, _handle) = MatchSession::new(Uuid::new_v4(), players(), settings(5), 3);
        let [_rx1, mut rx2] = attach_both(&mut session);
        tick_until_live(&mut session);
        session.state.score = Score { player1: 3, player2: 2 };

        let p1 = session.players[0].clone();
        let p2 = session.players[1].clone();
        session.handle_disconnect(p1.id);

        assert_eq!(session.phase(), MatchPhase::Aborted);
        let Some(MatchOutcome::Completed(result)) = session.outcome().cloned() else {
            panic!("no result");
        };
        assert_eq!(result.winner, p2);
        assert_eq!(result.reason, MatchEndReason::OpponentDisconnected);
        assert_eq!(result.score, Score { player1: 3, player2: 2 });

        let ticks = session.tick_count();
        let frozen = *session.state();
        for _ in 0..10 {
            session.tick();
        }
        assert_eq!(session.tick_count(), ticks);
        assert_eq!(*session.state(), frozen);

        assert_eq!(
            controls(&mut rx2).last(),
            Some(&ControlEvent::GameOver {
                winner: Some("bob".into()),
                reason: Some(GameOverReason::Disconnection)
            })
        );
    }

    #[test]
    fn closed_transport_counts_as_disconnect() {
        let (mut session, _handle) = MatchSession::new(Uuid::new_v4(), players(), settings(5), 3);
        let [rx1, _rx2] = attach_both(&mut session);
        tick_until_live(&mut session);

        drop(rx1);
        session.tick();

        let Some(MatchOutcome::Completed(result)) = session.outcome().cloned() else {
            panic!("no result");
        };
        assert_eq!(result.winner.username, "bob");
        assert_eq!(result.reason, MatchEndReason::OpponentDisconnected);
    }

    #[test]
    fn leaving_before_serve_returns_to_waiting() {
        let (mut session, _handle) = MatchSession::new(Uuid::new_v4(), players(), settings(5), 3);
        let _rx = attach_both(&mut session);
        session.tick();
        assert_eq!(session.phase(), MatchPhase::Starting);

        let p2 = session.players[1].id;
        session.handle_disconnect(p2);
        assert_eq!(session.phase(), MatchPhase::WaitingForPlayers);
        assert!(session.outcome().is_none());
    }

    #[test]
    fn lone_player_wins_after_grace_period() {
        let (mut session, _handle) = MatchSession::new(Uuid::new_v4(), players(), settings(5), 3);
        let amy = session.players[0].clone();
        let (transport, _rx) = SessionTransport::channel(amy.id, 16);
        session.attach(amy.id, transport);

        for _ in 0..59 {
            session.tick();
        }
        assert_eq!(session.phase(), MatchPhase::WaitingForPlayers);
        session.tick();
        assert_eq!(session.phase(), MatchPhase::Aborted);

        let Some(MatchOutcome::Completed(result)) = session.outcome().cloned() else {
            panic!("no result");
        };
        assert_eq!(result.winner, amy);
        assert_eq!(result.reason, MatchEndReason::OpponentDisconnected);
    }

    #[test]
    fn empty_session_is_abandoned() {
        let id = Uuid::new_v4();
        let (mut session, _handle) = MatchSession::new(id, players(), settings(5), 3);
        for _ in 0..60 {
            session.tick();
        }
        assert_eq!(session.outcome(), Some(&MatchOutcome::Abandoned { match_id: id }));
    }

    #[test]
    fn same_seed_same_inputs_same_snapshots() {
        fn record(seed: u64, players: [PlayerRef; 2]) -> Vec<SnapshotFrame> {
            let (mut session, handle) =
                MatchSession::new(Uuid::nil(), players.clone(), settings(3), seed);
            let [mut rx1, _rx2] = attach_both(&mut session);
            let mut frames = Vec::new();
            for step in 0..3_000 {
                let intent = match (step / 20) % 3 {
                    0 => Intent::Up,
                    1 => Intent::Down,
                    _ => Intent::Idle,
                };
                handle.submit_intent(players[0].id, intent);
                handle.submit_intent(players[1].id, Intent::Up);
                session.tick();
                while let Ok(frame) = rx1.try_recv() {
                    if let ServerFrame::Snapshot(bytes) = frame {
                        frames.push(SnapshotFrame::decode(&bytes).unwrap());
                    }
                }
            }
            frames
        }

        let players = players();
        let first = record(42, players.clone());
        let second = record(42, players);
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn strangers_cannot_steer() {
        let (_session, handle) = MatchSession::new(Uuid::new_v4(), players(), settings(5), 3);
        assert!(!handle.submit_intent(Uuid::new_v4(), Intent::Down));
        assert_eq!(handle.side_of(handle.players[1].id), Some(Side::Player2));
    }

    #[tokio::test(start_paused = true)]
    async fn launched_session_reports_and_unregisters() {
        let registry = Arc::new(MatchRegistry::new());
        let players = players();
        let (handle, outcome_rx) = registry.launch(players.clone(), settings(2), 5);
        assert_eq!(registry.active_matches(), 1);

        let (t1, _rx1) = SessionTransport::channel(players[0].id, 100_000);
        let (t2, _rx2) = SessionTransport::channel(players[1].id, 100_000);
        handle.attach(players[0].id, t1).await.unwrap();
        handle.attach(players[1].id, t2).await.unwrap();
        handle.submit_intent(players[0].id, Intent::Up);
        handle.submit_intent(players[1].id, Intent::Up);

        let outcome = outcome_rx.await.unwrap();
        let result = outcome.result().cloned().unwrap();
        assert_eq!(result.score.leader(), 2);
        assert_eq!(result.reason, MatchEndReason::NormalCompletion);
        assert_eq!(registry.active_matches(), 0);
        assert!(registry.get(&handle.id).is_none());
    }
}
