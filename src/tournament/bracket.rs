//! Four-player single-elimination bracket
//!
//! Semi-finals are (p0 vs p1) then (p2 vs p3), played one after the other,
//! then a final between the two winners. The round only ever moves forward.

use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

use crate::game::{MatchEndReason, MatchResult, PlayerRef, Score};
use crate::matchmaking::MatchmakingError;

pub const BRACKET_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Round {
    SemiFinal,
    Final,
    Complete,
}

/// Which match of the bracket a pairing is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SemiFinal(usize),
    Final,
}

impl Stage {
    /// Label used in the persisted report
    pub fn label(self) -> &'static str {
        match self {
            Stage::SemiFinal(0) => "semi_final_1",
            Stage::SemiFinal(_) => "semi_final_2",
            Stage::Final => "final",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pairing {
    pub stage: Stage,
    pub players: [PlayerRef; 2],
}

/// Final record of a completed tournament
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TournamentResult {
    pub tournament_id: Uuid,
    pub champion: PlayerRef,
    /// Semi-final 1, semi-final 2, final
    pub per_round: Vec<MatchResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TournamentError {
    #[error("A tournament needs exactly {BRACKET_SIZE} players, got {0}")]
    NotEnoughPlayers(usize),

    #[error("Player {0} entered twice")]
    DuplicatePlayer(Uuid),

    #[error("Player {0} is already in a tournament")]
    AlreadyEntered(Uuid),

    #[error(transparent)]
    Unavailable(#[from] MatchmakingError),

    #[error("Both players of the {0} withdrew")]
    BracketCollapsed(&'static str),

    #[error("Match {0} was abandoned by both players")]
    MatchAbandoned(Uuid),

    #[error("Match session {0} stopped without reporting")]
    SessionLost(Uuid),

    #[error("Result for match {0} does not belong to the current pairing")]
    UnexpectedResult(Uuid),

    #[error("Tournament already complete")]
    AlreadyComplete,
}

#[derive(Debug, Clone)]
pub struct TournamentBracket {
    pub tournament_id: Uuid,
    players: [PlayerRef; BRACKET_SIZE],
    round: Round,
    semi_results: [Option<MatchResult>; 2],
    final_result: Option<MatchResult>,
}

impl TournamentBracket {
    /// Seed a bracket in entry order
    pub fn new(tournament_id: Uuid, players: Vec<PlayerRef>) -> Result<Self, TournamentError> {
        let mut seen = HashSet::new();
        for player in &players {
            if !seen.insert(player.id) {
                return Err(TournamentError::DuplicatePlayer(player.id));
            }
        }

        let count = players.len();
        let players: [PlayerRef; BRACKET_SIZE] = players
            .try_into()
            .map_err(|_| TournamentError::NotEnoughPlayers(count))?;

        Ok(Self {
            tournament_id,
            players,
            round: Round::SemiFinal,
            semi_results: [None, None],
            final_result: None,
        })
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn players(&self) -> &[PlayerRef; BRACKET_SIZE] {
        &self.players
    }

    /// The match that must be played next, if any
    pub fn next_pairing(&self) -> Option<Pairing> {
        match self.round {
            Round::SemiFinal => {
                let index = self.semi_results.iter().position(Option::is_none)?;
                Some(Pairing {
                    stage: Stage::SemiFinal(index),
                    players: [
                        self.players[index * 2].clone(),
                        self.players[index * 2 + 1].clone(),
                    ],
                })
            }
            Round::Final => {
                let [Some(first), Some(second)] = &self.semi_results else {
                    return None;
                };
                Some(Pairing {
                    stage: Stage::Final,
                    players: [first.winner.clone(), second.winner.clone()],
                })
            }
            Round::Complete => None,
        }
    }

    /// Store the result of the current pairing and advance
    pub fn record(&mut self, result: MatchResult) -> Result<Round, TournamentError> {
        let pairing = self.next_pairing().ok_or(TournamentError::AlreadyComplete)?;
        let expected: HashSet<Uuid> = pairing.players.iter().map(|p| p.id).collect();
        let got: HashSet<Uuid> = result.players.iter().map(|p| p.id).collect();
        if expected != got || !result.involves(result.winner.id) {
            return Err(TournamentError::UnexpectedResult(result.match_id));
        }

        match pairing.stage {
            Stage::SemiFinal(index) => {
                self.semi_results[index] = Some(result);
                if self.semi_results.iter().all(Option::is_some) {
                    self.round = Round::Final;
                }
            }
            Stage::Final => {
                self.final_result = Some(result);
                self.round = Round::Complete;
            }
        }
        Ok(self.round)
    }

    /// Settle the current pairing without playing it if anyone in it has withdrawn.
    /// Returns the walkover result when one was recorded.
    pub fn settle_withdrawals(
        &mut self,
        withdrawn: &HashSet<Uuid>,
    ) -> Result<Option<MatchResult>, TournamentError> {
        let Some(pairing) = self.next_pairing() else {
            return Ok(None);
        };
        let [first, second] = pairing.players;

        let winner = match (withdrawn.contains(&first.id), withdrawn.contains(&second.id)) {
            (false, false) => return Ok(None),
            (true, true) => return Err(TournamentError::BracketCollapsed(pairing.stage.label())),
            (true, false) => second.clone(),
            (false, true) => first.clone(),
        };

        let result = MatchResult {
            match_id: Uuid::new_v4(),
            players: [first, second],
            winner,
            score: Score::default(),
            reason: MatchEndReason::Forfeit,
        };
        self.record(result.clone())?;
        Ok(Some(result))
    }

    pub fn champion(&self) -> Option<&PlayerRef> {
        self.final_result.as_ref().map(|r| &r.winner)
    }

    /// Results in play order so far
    pub fn results(&self) -> Vec<MatchResult> {
        self.semi_results
            .iter()
            .chain(std::iter::once(&self.final_result))
            .flatten()
            .cloned()
            .collect()
    }

    /// The tournament result, once the final is recorded
    pub fn result(&self) -> Option<TournamentResult> {
        Some(TournamentResult {
            tournament_id: self.tournament_id,
            champion: self.champion()?.clone(),
            per_round: self.results(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entrants() -> Vec<PlayerRef> {
        ["p1", "p2", "p3", "p4"]
            .into_iter()
            .map(|name| PlayerRef::new(Uuid::new_v4(), name))
            .collect()
    }

    fn won(pairing: &Pairing, winner: usize) -> MatchResult {
        MatchResult {
            match_id: Uuid::new_v4(),
            players: pairing.players.clone(),
            winner: pairing.players[winner].clone(),
            score: if winner == 0 {
                Score { player1: 5, player2: 1 }
            } else {
                Score { player1: 2, player2: 5 }
            },
            reason: MatchEndReason::NormalCompletion,
        }
    }

    #[test]
    fn rejects_wrong_size_and_duplicates() {
        let mut players = entrants();
        players.pop();
        assert_eq!(
            TournamentBracket::new(Uuid::new_v4(), players.clone()).unwrap_err(),
            TournamentError::NotEnoughPlayers(3)
        );

        players.push(players[0].clone());
        assert_eq!(
            TournamentBracket::new(Uuid::new_v4(), players.clone()).unwrap_err(),
            TournamentError::DuplicatePlayer(players[0].id)
        );
    }

    #[test]
    fn semis_in_order_then_final_between_winners() {
        let players = entrants();
        let mut bracket = TournamentBracket::new(Uuid::new_v4(), players.clone()).unwrap();

        let semi1 = bracket.next_pairing().unwrap();
        assert_eq!(semi1.stage, Stage::SemiFinal(0));
        assert_eq!(semi1.players, [players[0].clone(), players[1].clone()]);
        assert_eq!(bracket.record(won(&semi1, 1)).unwrap(), Round::SemiFinal);

        let semi2 = bracket.next_pairing().unwrap();
        assert_eq!(semi2.players, [players[2].clone(), players[3].clone()]);
        assert_eq!(bracket.record(won(&semi2, 0)).unwrap(), Round::Final);

        let final_pairing = bracket.next_pairing().unwrap();
        assert_eq!(final_pairing.stage, Stage::Final);
        assert_eq!(final_pairing.players, [players[1].clone(), players[2].clone()]);
        assert_eq!(bracket.record(won(&final_pairing, 1)).unwrap(), Round::Complete);

        let result = bracket.result().unwrap();
        assert_eq!(result.champion, players[2]);
        assert_eq!(result.per_round.len(), 3);
        assert_eq!(result.per_round[2].winner, result.champion);
        assert!(bracket.next_pairing().is_none());
        assert_eq!(
            bracket.record(won(&final_pairing, 0)).unwrap_err(),
            TournamentError::AlreadyComplete
        );
    }

    #[test]
    fn result_for_another_pairing_is_refused() {
        let mut bracket = TournamentBracket::new(Uuid::new_v4(), entrants()).unwrap();
        let semi1 = bracket.next_pairing().unwrap();
        let stray = MatchResult {
            players: [semi1.players[0].clone(), bracket.players()[3].clone()],
            ..won(&semi1, 0)
        };
        assert!(matches!(
            bracket.record(stray),
            Err(TournamentError::UnexpectedResult(_))
        ));
        assert_eq!(bracket.round(), Round::SemiFinal);
    }

    #[test]
    fn withdrawal_is_a_walkover() {
        let players = entrants();
        let mut bracket = TournamentBracket::new(Uuid::new_v4(), players.clone()).unwrap();
        let withdrawn: HashSet<Uuid> = [players[0].id].into_iter().collect();

        let walkover = bracket.settle_withdrawals(&withdrawn).unwrap().unwrap();
        assert_eq!(walkover.winner, players[1]);
        assert_eq!(walkover.reason, MatchEndReason::Forfeit);
        assert_eq!(walkover.score, Score::default());

        // p3 vs p4 is unaffected
        assert_eq!(bracket.settle_withdrawals(&withdrawn).unwrap(), None);
    }

    #[test]
    fn both_withdrawn_collapses_bracket() {
        let players = entrants();
        let mut bracket = TournamentBracket::new(Uuid::new_v4(), players.clone()).unwrap();
        let withdrawn: HashSet<Uuid> = [players[2].id, players[3].id].into_iter().collect();

        let semi1 = bracket.next_pairing().unwrap();
        bracket.record(won(&semi1, 0)).unwrap();
        assert_eq!(
            bracket.settle_withdrawals(&withdrawn).unwrap_err(),
            TournamentError::BracketCollapsed("semi_final_2")
        );
    }
}
