//! Result reporting to the external persistence service
//!
//! Sessions and tournaments hand finished results to a `ResultReporter`
//! without waiting; a background task posts them with retries.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::game::{MatchEndReason, MatchResult, PlayerRef, Score};
use crate::tournament::bracket::{Stage, TournamentResult};

const REPORT_BUFFER: usize = 256;
const MAX_ATTEMPTS: u32 = 4;

/// Something finished that the persistence service should know about
#[derive(Debug, Clone)]
pub enum ResultReport {
    Match(MatchResult),
    Tournament(TournamentResult),
}

/// One round inside the tournament report
#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    pub round: &'static str,
    pub players: [String; 2],
    pub score: Score,
    pub winner: String,
}

/// Body of `POST /tournaments`
#[derive(Debug, Clone, Serialize)]
pub struct TournamentReport {
    pub tournament_id: Uuid,
    pub results: Vec<RoundReport>,
    pub champion: String,
}

impl From<&TournamentResult> for TournamentReport {
    fn from(result: &TournamentResult) -> Self {
        let stages = [Stage::SemiFinal(0), Stage::SemiFinal(1), Stage::Final];
        let results = result
            .per_round
            .iter()
            .zip(stages)
            .map(|(m, stage)| RoundReport {
                round: stage.label(),
                players: [m.players[0].username.clone(), m.players[1].username.clone()],
                score: m.score,
                winner: m.winner.username.clone(),
            })
            .collect();

        Self {
            tournament_id: result.tournament_id,
            results,
            champion: result.champion.username.clone(),
        }
    }
}

/// Body of `POST /matches`
#[derive(Debug, Clone, Serialize)]
pub struct MatchReport {
    pub match_id: Uuid,
    pub players: [PlayerRef; 2],
    pub winner: PlayerRef,
    pub score: Score,
    pub reason: MatchEndReason,
    pub finished_at: DateTime<Utc>,
}

impl From<&MatchResult> for MatchReport {
    fn from(result: &MatchResult) -> Self {
        Self {
            match_id: result.match_id,
            players: result.players.clone(),
            winner: result.winner.clone(),
            score: result.score,
            reason: result.reason,
            finished_at: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },
}

impl ReportError {
    /// 4xx other than 408/429 will not get better by retrying
    fn is_retryable(&self) -> bool {
        match self {
            ReportError::Request(_) => true,
            ReportError::Api { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
        }
    }
}

/// REST client for the results service
#[derive(Clone)]
pub struct ResultsClient {
    client: Client,
    base_url: String,
    backoff: Duration,
}

impl ResultsClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            backoff: Duration::from_millis(500),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Deliver one report. The idempotency key is stable across retries.
    pub async fn submit(&self, report: &ResultReport) -> Result<(), ReportError> {
        match report {
            ResultReport::Match(result) => {
                self.post_with_retry("matches", result.match_id, &MatchReport::from(result))
                    .await
            }
            ResultReport::Tournament(result) => {
                self.post_with_retry(
                    "tournaments",
                    result.tournament_id,
                    &TournamentReport::from(result),
                )
                .await
            }
        }
    }

    async fn post_with_retry<T: Serialize>(
        &self,
        resource: &str,
        key: Uuid,
        body: &T,
    ) -> Result<(), ReportError> {
        let mut attempt = 1;
        loop {
            match self.post(resource, key, body).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < MAX_ATTEMPTS && e.is_retryable() => {
                    let delay = self.backoff * 2u32.pow(attempt - 1);
                    warn!(
                        resource,
                        key = %key,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Result post failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post<T: Serialize>(&self, resource: &str, key: Uuid, body: &T) -> Result<(), ReportError> {
        let url = format!("{}/{}", self.base_url, resource);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Idempotency-Key", key.to_string())
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// Fire-and-forget handle given to sessions and tournaments
#[derive(Clone)]
pub struct ResultReporter {
    tx: mpsc::Sender<ResultReport>,
}

impl ResultReporter {
    pub fn channel() -> (Self, mpsc::Receiver<ResultReport>) {
        let (tx, rx) = mpsc::channel(REPORT_BUFFER);
        (Self { tx }, rx)
    }

    pub fn report(&self, report: ResultReport) {
        if let Err(e) = self.tx.try_send(report) {
            error!(error = %e, "Result report queue unavailable, report lost");
        }
    }
}

/// Drain reports until every reporter handle is gone
pub async fn run_reporter(mut rx: mpsc::Receiver<ResultReport>, client: Option<ResultsClient>) {
    while let Some(report) = rx.recv().await {
        let Some(client) = &client else {
            log_report(&report);
            continue;
        };

        match client.submit(&report).await {
            Ok(()) => log_report(&report),
            Err(e) => error!(error = %e, report = ?report, "Giving up on result report"),
        }
    }
    info!("Result reporter stopped");
}

fn log_report(report: &ResultReport) {
    match report {
        ResultReport::Match(result) => info!(
            match_id = %result.match_id,
            winner = %result.winner.username,
            score1 = result.score.player1,
            score2 = result.score.player2,
            reason = ?result.reason,
            "Match result recorded"
        ),
        ResultReport::Tournament(result) => info!(
            tournament_id = %result.tournament_id,
            champion = %result.champion.username,
            rounds = result.per_round.len(),
            "Tournament result recorded"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn player(name: &str) -> PlayerRef {
        PlayerRef::new(Uuid::new_v4(), name)
    }

    fn tournament() -> TournamentResult {
        let (p1, p2, p3, p4) = (player("p1"), player("p2"), player("p3"), player("p4"));
        let game = |a: &PlayerRef, b: &PlayerRef, winner: &PlayerRef, score: Score| MatchResult {
            match_id: Uuid::new_v4(),
            players: [a.clone(), b.clone()],
            winner: winner.clone(),
            score,
            reason: MatchEndReason::NormalCompletion,
        };
        TournamentResult {
            tournament_id: Uuid::new_v4(),
            champion: p3.clone(),
            per_round: vec![
                game(&p1, &p2, &p1, Score { player1: 5, player2: 3 }),
                game(&p3, &p4, &p3, Score { player1: 5, player2: 0 }),
                game(&p1, &p3, &p3, Score { player1: 4, player2: 5 }),
            ],
        }
    }

    #[test]
    fn tournament_report_shape() {
        let result = tournament();
        let value = serde_json::to_value(TournamentReport::from(&result)).unwrap();

        assert_eq!(value["tournament_id"], json!(result.tournament_id));
        assert_eq!(value["champion"], "p3");
        assert_eq!(
            value["results"][0],
            json!({
                "round": "semi_final_1",
                "players": ["p1", "p2"],
                "score": { "player1": 5, "player2": 3 },
                "winner": "p1"
            })
        );
        assert_eq!(value["results"][2]["round"], "final");
        assert_eq!(value["results"].as_array().unwrap().len(), 3);
    }

    #[derive(Clone, Default)]
    struct Sink {
        hits: Arc<AtomicUsize>,
        keys: Arc<Mutex<Vec<String>>>,
    }

    async fn flaky(State(sink): State<Sink>, headers: HeaderMap) -> StatusCode {
        let key = headers
            .get("Idempotency-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        sink.keys.lock().unwrap().push(key);
        if sink.hits.fetch_add(1, Ordering::SeqCst) == 0 {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::CREATED
        }
    }

    #[tokio::test]
    async fn retries_with_same_idempotency_key() {
        let sink = Sink::default();
        let app = Router::new()
            .route("/tournaments", post(flaky))
            .with_state(sink.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = ResultsClient::new(format!("http://{addr}/"))
            .with_backoff(Duration::from_millis(10));
        let result = tournament();
        tokio_test::assert_ok!(client.submit(&ResultReport::Tournament(result.clone())).await);

        assert_eq!(sink.hits.load(Ordering::SeqCst), 2);
        let keys = sink.keys.lock().unwrap().clone();
        assert_eq!(keys, vec![result.tournament_id.to_string(); 2]);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/matches",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    StatusCode::UNPROCESSABLE_ENTITY
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = ResultsClient::new(format!("http://{addr}"));
        let report = ResultReport::Match(tournament().per_round[0].clone());
        let err = tokio_test::assert_err!(client.submit(&report).await);
        assert!(matches!(err, ReportError::Api { status: 422, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reporter_hands_off_without_blocking() {
        let (reporter, mut rx) = ResultReporter::channel();
        let result = tournament();
        reporter.report(ResultReport::Tournament(result.clone()));

        let Some(ResultReport::Tournament(received)) = rx.recv().await else {
            panic!("expected a tournament report");
        };
        assert_eq!(received, result);
    }
}
