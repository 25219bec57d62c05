use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

use crate::blockchain::consensus::{DEFAULT_MAX_CONCURRENT_PEERS, DEFAULT_PEER_TIMEOUT};
use crate::blockchain::LedgerConfig;

/// Process-level settings, read from the environment (and `.env` if present)
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub mining_reward: f64,
    pub peer_timeout: Duration,
    pub max_concurrent_peers: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            host: "127.0.0.1".to_string(),
            port: 5001,
            data_dir: PathBuf::from("data/ledger"),
            mining_reward: 1.0,
            peer_timeout: DEFAULT_PEER_TIMEOUT,
            max_concurrent_peers: DEFAULT_MAX_CONCURRENT_PEERS,
        }
    }
}

impl NodeConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup. Missing or unparsable values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = NodeConfig::default();

        let mining_reward = parse_or(&lookup, "MINING_REWARD", defaults.mining_reward);
        let mining_reward = if mining_reward.is_finite() && mining_reward > 0.0 {
            mining_reward
        } else {
            warn!("MINING_REWARD must be positive, using {}", defaults.mining_reward);
            defaults.mining_reward
        };

        NodeConfig {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "PORT", defaults.port),
            data_dir: lookup("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            mining_reward,
            peer_timeout: Duration::from_secs(parse_or(
                &lookup,
                "PEER_TIMEOUT_SECS",
                defaults.peer_timeout.as_secs(),
            )),
            max_concurrent_peers: parse_or(
                &lookup,
                "MAX_CONCURRENT_PEERS",
                defaults.max_concurrent_peers,
            )
            .max(1),
        }
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            mining_reward: self.mining_reward,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}, using {}", key, raw, default);
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> NodeConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        NodeConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 5001);
        assert_eq!(config.mining_reward, 1.0);
        assert_eq!(config.peer_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_overrides_and_fallbacks() {
        let config = config_from(&[
            ("HOST", "0.0.0.0"),
            ("PORT", "not-a-port"),
            ("MINING_REWARD", "2.5"),
            ("MAX_CONCURRENT_PEERS", "0"),
            ("DATA_DIR", "/tmp/ledger"),
        ]);

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 5001);
        assert_eq!(config.ledger_config().mining_reward, 2.5);
        assert_eq!(config.max_concurrent_peers, 1);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/ledger"));
    }

    #[test]
    fn test_negative_reward_rejected() {
        let config = config_from(&[("MINING_REWARD", "-3")]);
        assert_eq!(config.mining_reward, 1.0);
    }
}
