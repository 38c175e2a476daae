//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::SessionSettings;
use crate::util::time::DEFAULT_TICK_RATE;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origin for CORS; any origin when unset
    pub client_origin: Option<String>,
    /// Base URL of the results service; results are only logged when unset
    pub results_url: Option<String>,

    pub game: GameConfig,
}

/// Match and matchmaking tuning
#[derive(Clone, Debug, PartialEq)]
pub struct GameConfig {
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Points to win a standalone match
    pub win_threshold: u32,
    /// Points to win a tournament match
    pub tournament_win_threshold: u32,
    /// How long a match waits for both players to connect
    pub join_grace: Duration,
    /// How long a direct game request stays open
    pub request_ttl: Duration,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            win_threshold: 11,
            tournament_win_threshold: 5,
            join_grace: Duration::from_secs(30),
            request_ttl: Duration::from_secs(10),
        }
    }
}

impl GameConfig {
    /// Session settings for standalone matches
    pub fn match_settings(&self) -> SessionSettings {
        self.session_settings(self.win_threshold)
    }

    /// Session settings for tournament matches
    pub fn tournament_settings(&self) -> SessionSettings {
        self.session_settings(self.tournament_win_threshold)
    }

    fn session_settings(&self, win_threshold: u32) -> SessionSettings {
        SessionSettings {
            tick_rate: self.tick_rate,
            join_grace: self.join_grace,
            ..SessionSettings::default()
        }
        .with_win_threshold(win_threshold)
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let defaults = GameConfig::default();
        let game = GameConfig {
            tick_rate: parse_or(&lookup, "TICK_RATE", defaults.tick_rate)?,
            win_threshold: parse_or(&lookup, "WIN_THRESHOLD", defaults.win_threshold)?,
            tournament_win_threshold: parse_or(
                &lookup,
                "TOURNAMENT_WIN_THRESHOLD",
                defaults.tournament_win_threshold,
            )?,
            join_grace: Duration::from_secs(parse_or(
                &lookup,
                "JOIN_GRACE_SECS",
                defaults.join_grace.as_secs(),
            )?),
            request_ttl: Duration::from_secs(parse_or(
                &lookup,
                "REQUEST_TTL_SECS",
                defaults.request_ttl.as_secs(),
            )?),
        };

        if game.tick_rate == 0 {
            return Err(ConfigError::Invalid("TICK_RATE"));
        }
        if game.win_threshold == 0 {
            return Err(ConfigError::Invalid("WIN_THRESHOLD"));
        }
        if game.tournament_win_threshold == 0 {
            return Err(ConfigError::Invalid("TOURNAMENT_WIN_THRESHOLD"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            client_origin: lookup("CLIENT_ORIGIN").filter(|s| !s.is_empty()),
            results_url: lookup("RESULTS_URL").filter(|s| !s.is_empty()),

            game,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.server_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.log_level, "info");
        assert!(config.results_url.is_none());
        assert_eq!(config.game, GameConfig::default());
        assert_eq!(config.game.match_settings().win_threshold, 11);
        assert_eq!(config.game.tournament_settings().win_threshold, 5);
    }

    #[test]
    fn port_wins_over_server_addr() {
        let config = config(&[("PORT", "9000"), ("SERVER_ADDR", "127.0.0.1:1")]).unwrap();
        assert_eq!(config.server_addr.port(), 9000);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("TICK_RATE", "120"),
            ("WIN_THRESHOLD", "7"),
            ("JOIN_GRACE_SECS", "5"),
            ("RESULTS_URL", "http://results.internal"),
        ])
        .unwrap();
        assert_eq!(config.game.tick_rate, 120);
        assert_eq!(config.game.match_settings().tick_rate, 120);
        assert_eq!(config.game.win_threshold, 7);
        assert_eq!(config.game.join_grace, Duration::from_secs(5));
        assert_eq!(config.results_url.as_deref(), Some("http://results.internal"));
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(matches!(
            config(&[("WIN_THRESHOLD", "eleven")]),
            Err(ConfigError::Invalid("WIN_THRESHOLD"))
        ));
        assert!(matches!(
            config(&[("TICK_RATE", "0")]),
            Err(ConfigError::Invalid("TICK_RATE"))
        ));
        assert!(matches!(
            config(&[("SERVER_ADDR", "nowhere")]),
            Err(ConfigError::InvalidAddress)
        ));
    }
}
