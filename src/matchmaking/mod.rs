//! Matchmaking: FIFO queue pairing and direct game requests

pub mod queue;
pub mod requests;
pub mod service;

pub use queue::MatchmakingError;
pub use service::MatchmakingService;
