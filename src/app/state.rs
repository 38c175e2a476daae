//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::MatchRegistry;
use crate::matchmaking::MatchmakingService;
use crate::store::ResultReporter;
use crate::tournament::{SessionLauncher, TournamentService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub matchmaking: Arc<MatchmakingService>,
    pub match_registry: Arc<MatchRegistry>,
    pub tournaments: Arc<TournamentService<SessionLauncher>>,
}

impl AppState {
    pub fn new(config: Config, reporter: ResultReporter) -> Self {
        let config = Arc::new(config);

        // Initialize match registry
        let match_registry = Arc::new(MatchRegistry::new());

        // Initialize matchmaking service (Arc for sharing across cloned AppState)
        let matchmaking = Arc::new(MatchmakingService::new(
            match_registry.clone(),
            config.game.match_settings(),
            config.game.request_ttl,
            reporter.clone(),
        ));

        // Tournament matches run in the same registry with their own threshold
        let launcher = Arc::new(SessionLauncher::new(
            match_registry.clone(),
            config.game.tournament_settings(),
        ));
        // Tournament entrants are seated through the same busy set as standalone players
        let tournaments = Arc::new(TournamentService::new(
            launcher,
            matchmaking.clone(),
            reporter,
        ));

        Self {
            config,
            matchmaking,
            match_registry,
            tournaments,
        }
    }
}
