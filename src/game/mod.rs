//! Game simulation modules

pub mod r#match;
pub mod physics;
pub mod snapshot;
pub mod state;

pub use r#match::{MatchHandle, MatchRegistry, SessionSettings};
pub use state::{Intent, MatchEndReason, MatchOutcome, MatchResult, PlayerRef, Score};
