//! Daemon configuration.

use std::path::PathBuf;
use std::time::Duration;

use keychain_store::StoreConfig;
use serde::{Deserialize, Serialize};

/// The configuration values that dictate the behavior of the keychain
/// daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Config {
    /// The address the JSON-RPC server listens on.
    pub rpc_addr: String,

    /// Deadline applied to every request; an elapsed deadline surfaces a
    /// deadline-exceeded error and persists nothing.
    pub request_timeout: Duration,

    /// Lookahead size applied when a create request does not carry one.
    /// The engine falls back to the BIP-44 default of 20 when unset.
    pub default_lookahead: Option<u32>,

    /// The store backend keychain records live in.
    pub store: StoreSettings,
}

/// Which store backend to run on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub(crate) enum StoreSettings {
    /// Process-local storage. State does not survive a restart.
    Memory,

    /// SQLite file storage.
    Sqlite {
        /// Path of the database file; created if missing.
        path: PathBuf,

        /// Driver retry configuration.
        #[serde(default)]
        retry: StoreConfig,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_serde_toml() {
        let config = r#"
            rpc_addr = "127.0.0.1:50052"
            request_timeout = { secs = 5, nanos = 0 }
            default_lookahead = 20

            [store]
            backend = "sqlite"
            path = "keychain.db"

            [store.retry]
            max_retry_count = 3
            backoff_period = { secs = 1, nanos = 0 }
        "#;

        let config = toml::from_str::<Config>(config);
        assert!(
            config.is_ok(),
            "must be able to deserialize config from toml but got: {}",
            config.unwrap_err()
        );

        let config = config.unwrap();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized = toml::from_str::<Config>(&serialized).unwrap();
        assert_eq!(
            deserialized, config,
            "must be able to serialize and deserialize config to toml"
        );
    }

    #[test]
    fn memory_backend_needs_no_settings() {
        let config = r#"
            rpc_addr = "127.0.0.1:50052"
            request_timeout = { secs = 5, nanos = 0 }

            [store]
            backend = "memory"
        "#;

        let config = toml::from_str::<Config>(config).unwrap();
        assert_eq!(config.store, StoreSettings::Memory);
        assert_eq!(config.default_lookahead, None);
    }
}
