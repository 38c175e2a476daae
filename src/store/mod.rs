//! Outbound persistence: finished matches and tournaments

pub mod results;

pub use results::{run_reporter, ResultReport, ResultReporter, ResultsClient};
