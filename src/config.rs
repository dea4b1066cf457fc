//! Configuration loading and validation.
//!
//! Loaded from a TOML file, then overridden by environment variables.
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::client::poller::PollStrategy;
use crate::types::{Nanos, Principal, ValidationMode};
use crate::wallet::store::DEFAULT_EXPIRY_PERIOD;
use crate::wallet::WalletSettings;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Wallet identity and policy.
    #[serde(default)]
    pub wallet: WalletConfig,

    /// Client-side polling.
    #[serde(default)]
    pub poll: PollConfig,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Wallet identity and policy defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// The wallet's own principal.
    #[serde(default = "default_wallet_id")]
    pub id: String,

    /// Initial owner principals.
    #[serde(default)]
    pub owners: Vec<String>,

    /// Default grant period in nanoseconds.
    #[serde(default = "default_expiry_period_ns")]
    pub expiry_period_ns: Nanos,

    /// Which calls are checked against the allow-list.
    #[serde(default)]
    pub validate_type: ValidationMode,

    /// Initial cycle balance.
    #[serde(default)]
    pub initial_balance: u128,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            id: default_wallet_id(),
            owners: Vec::new(),
            expiry_period_ns: default_expiry_period_ns(),
            validate_type: ValidationMode::default(),
            initial_balance: 0,
        }
    }
}

impl WalletConfig {
    /// Wallet construction parameters.
    pub fn settings(&self) -> WalletSettings {
        WalletSettings {
            id: Principal::from_text(self.id.clone()),
            owners: self.owners.iter().map(|o| Principal::from_text(o.clone())).collect(),
            expiry_period: self.expiry_period_ns,
            validate_type: self.validate_type,
            initial_balance: self.initial_balance,
        }
    }
}

/// Poll loop budget.
#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Maximum reads per deferred call.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between reads in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
        }
    }
}

impl PollConfig {
    /// Poll strategy for clients.
    pub fn strategy(&self) -> PollStrategy {
        PollStrategy::new(self.max_attempts, Duration::from_millis(self.interval_ms))
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Directory for rotated JSON logs; console only when unset.
    #[serde(default)]
    pub logs_dir: Option<PathBuf>,
}

// Default value functions for serde

fn default_wallet_id() -> String {
    "wallet".to_owned()
}
fn default_expiry_period_ns() -> Nanos {
    DEFAULT_EXPIRY_PERIOD
}
fn default_max_attempts() -> u32 {
    3
}
fn default_interval_ms() -> u64 {
    3000
}

impl Config {
    /// Parse a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Apply environment overrides through `env`.
    ///
    /// Takes a resolver so tests need not mutate the process environment.
    /// Invalid values are ignored with a warning.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("PROXY_WALLET_EXPIRY_PERIOD_NS") {
            match v.parse() {
                Ok(n) => self.wallet.expiry_period_ns = n,
                Err(_) => warn_invalid("PROXY_WALLET_EXPIRY_PERIOD_NS", &v),
            }
        }
        if let Some(v) = env("PROXY_WALLET_VALIDATE_TYPE") {
            match v.parse() {
                Ok(mode) => self.wallet.validate_type = mode,
                Err(_) => warn_invalid("PROXY_WALLET_VALIDATE_TYPE", &v),
            }
        }
        if let Some(v) = env("PROXY_WALLET_POLL_ATTEMPTS") {
            match v.parse() {
                Ok(n) => self.poll.max_attempts = n,
                Err(_) => warn_invalid("PROXY_WALLET_POLL_ATTEMPTS", &v),
            }
        }
        if let Some(v) = env("PROXY_WALLET_POLL_INTERVAL_MS") {
            match v.parse() {
                Ok(n) => self.poll.interval_ms = n,
                Err(_) => warn_invalid("PROXY_WALLET_POLL_INTERVAL_MS", &v),
            }
        }
    }

    /// Check invariants the types cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.wallet.id.trim().is_empty() {
            anyhow::bail!("wallet.id must not be empty");
        }
        if self.wallet.owners.is_empty() {
            anyhow::bail!("wallet.owners must list at least one owner");
        }
        if self.wallet.owners.iter().any(|o| o == &self.wallet.id) {
            anyhow::bail!("the wallet cannot own itself");
        }
        if self.wallet.expiry_period_ns == 0 {
            anyhow::bail!("wallet.expiry_period_ns must be positive");
        }
        if self.poll.max_attempts == 0 {
            anyhow::bail!("poll.max_attempts must be positive");
        }
        Ok(())
    }
}

fn warn_invalid(var: &str, value: &str) {
    tracing::warn!(var, value, "ignoring invalid env override");
}

/// Load config from a TOML file and apply environment overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let mut config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    config.apply_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

/// Resolve the default config directory (`~/.proxy-wallet/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".proxy-wallet"))
}

/// Config file used when none is given: `~/.proxy-wallet/config.toml`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}
