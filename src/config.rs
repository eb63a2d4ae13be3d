//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::proto::DEFAULT_PORT;

/// Options accepted at session construction.
///
/// The library never consults site configuration itself; front-ends resolve
/// the server host and hand it in. `apply_env_overrides` exists for their
/// convenience.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or address.
    pub server: String,
    /// Server TCP port.
    pub port: u16,
    /// Skip the initial connect at construction.
    pub no_connect: bool,
    /// Deadline in seconds for blocking waits.
    pub timeout_secs: u64,
    /// Chattier logging from the front-end.
    pub verbose: bool,
    /// Raw-frame logging in the router plus a persistent log file.
    pub debug: bool,
    /// Prefix received lines with a timestamp on read.
    pub timestamp_data: bool,
    /// Format description for those prefixes (`time` syntax).
    pub timestamp_fmt: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            no_connect: false,
            timeout_secs: 5,
            verbose: false,
            debug: false,
            timestamp_data: false,
            timestamp_fmt: "[hour]:[minute]:[second] ".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Apply `CONSOLED_*` environment overrides. Unparseable values are ignored.
pub fn apply_env_overrides(config: &mut ClientConfig) {
    if let Ok(server) = std::env::var("CONSOLED_SERVER")
        && !server.trim().is_empty()
    {
        config.server = server;
    }
    if let Ok(raw) = std::env::var("CONSOLED_PORT")
        && let Ok(port) = raw.parse()
    {
        config.port = port;
    }
    if let Ok(raw) = std::env::var("CONSOLED_TIMEOUT_SECS")
        && let Ok(secs) = raw.parse()
    {
        config.timeout_secs = secs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol() {
        let config = ClientConfig::default();
        assert_eq!(config.server, "127.0.0.1");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert!(!config.no_connect);
        assert!(!config.timestamp_data);
    }

    #[test]
    fn config_round_trips_through_json() {
        let mut config = ClientConfig::default();
        config.server = "consoles.example.net".to_string();
        config.timestamp_data = true;
        let raw = serde_json::to_string(&config).expect("serialize");
        let back: ClientConfig = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(back.server, config.server);
        assert_eq!(back.timeout_secs, config.timeout_secs);
        assert!(back.timestamp_data);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let back: ClientConfig = serde_json::from_str(r#"{"server":"cons1"}"#).expect("parse");
        assert_eq!(back.server, "cons1");
        assert_eq!(back.port, DEFAULT_PORT);
        assert_eq!(back.timeout_secs, 5);
    }
}
