//! Four-player single-elimination tournaments

pub mod bracket;
pub mod lobby;
pub mod orchestrator;

pub use bracket::TournamentError;
pub use lobby::TournamentService;
pub use orchestrator::SessionLauncher;
