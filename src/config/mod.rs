//! # Configuration Management Module
//!
//! All tunables of the game backend live in one TOML file, loaded into
//! [`Config`] and checked by [`Config::validate`] before any service starts.
//!
//! ## Configuration Structure
//!
//! - [`GameConfig`] - shard list and default shard
//! - [`StorageConfig`] - sled location, operation timeout, declared composite indexes
//! - [`CacheConfig`] - per-family cache windows
//! - [`LeaderboardConfig`] - default page size and username denylist
//! - [`CrimeConfig`] - crime index constants
//! - [`CasinoConfig`] - play limits, bets and jackpot
//! - [`EconomyConfig`] - currency conversion
//! - [`WorkConfig`] - work shift pay
//! - [`AdminConfig`] - batch job sizing
//! - [`SchedulerConfig`] - background sweep loop
//! - [`LoggingConfig`] - log level and optional file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use politsei::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("politsei.toml").await?;
//!     let config = Config::load("politsei.toml").await?;
//!     config.validate()?;
//!     println!("default shard: {}", config.game.default_shard);
//!     Ok(())
//! }
//! ```
//!
//! ## File Format
//!
//! ```toml
//! [game]
//! default_shard = "main"
//! shards = ["main", "alpha"]
//!
//! [storage]
//! data_dir = "./data"
//! operation_timeout_ms = 5000
//! indexes = ["players:shard,completed_courses,level,reputation"]
//!
//! [leaderboard]
//! default_limit = 250
//! denylist = ["admin"]
//! ```
//!
//! Every section except `[game]` and `[storage]` may be omitted and falls
//! back to its defaults.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

use crate::store::IndexSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub game: GameConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub leaderboard: LeaderboardConfig,
    #[serde(default)]
    pub crime: CrimeConfig,
    #[serde(default)]
    pub casino: CasinoConfig,
    #[serde(default)]
    pub economy: EconomyConfig,
    #[serde(default)]
    pub work: WorkConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Shard whose player ids are stored unqualified.
    pub default_shard: String,
    /// Every shard the scheduler sweeps.
    pub shards: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Optional override for the sled path; defaults to `<data_dir>/store`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
    /// Deadline for a single blocking store call issued from async code.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Composite indexes, each `collection:field,field,...`.
    #[serde(default = "default_indexes")]
    pub indexes: Vec<String>,
}

fn default_operation_timeout_ms() -> u64 {
    5000
}

fn default_indexes() -> Vec<String> {
    vec![
        "players:shard,completed_courses,level,reputation".to_string(),
        "players:shard,casino.total_winnings".to_string(),
    ]
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        match &self.db_path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.data_dir).join("store"),
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn index_specs(&self) -> Result<Vec<IndexSpec>> {
        self.indexes
            .iter()
            .map(|raw| {
                raw.parse::<IndexSpec>()
                    .map_err(|e| anyhow!("Invalid index '{}': {}", raw, e))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub leaderboard_ttl_secs: i64,
    pub aggregates_ttl_minutes: i64,
    pub casino_leaderboard_ttl_minutes: i64,
    pub shop_ttl_minutes: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            leaderboard_ttl_secs: 120,
            aggregates_ttl_minutes: 30,
            casino_leaderboard_ttl_minutes: 5,
            shop_ttl_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardConfig {
    pub default_limit: usize,
    /// Usernames never shown on any leaderboard (staff and test accounts).
    #[serde(default)]
    pub denylist: Vec<String>,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            default_limit: 250,
            denylist: vec!["admin".to_string(), "testija".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrimeConfig {
    pub initial_level: f64,
    pub daily_increase: f64,
    /// Reduction of one reference shift by a reference-sized department.
    pub base_reduction: f64,
    pub reference_hours: f64,
    pub reference_headcount: f64,
}

impl Default for CrimeConfig {
    fn default() -> Self {
        Self {
            initial_level: 50.0,
            daily_increase: 5.0,
            base_reduction: 1.0,
            reference_hours: 12.0,
            reference_headcount: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasinoConfig {
    pub hourly_limit: u32,
    pub vip_hourly_limit: u32,
    pub min_bet: i64,
    pub max_bet: i64,
    pub jackpot_seed: i64,
    /// Share of every losing bet added to the progressive jackpot, in percent.
    pub jackpot_contribution_percent: u8,
}

impl Default for CasinoConfig {
    fn default() -> Self {
        Self {
            hourly_limit: 5,
            vip_hourly_limit: 10,
            min_bet: 10,
            max_bet: 1000,
            jackpot_seed: 5000,
            jackpot_contribution_percent: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomyConfig {
    /// Money granted per converted pollid.
    pub pollid_rate: i64,
    /// Price multiplier paid to players supplying crafted items, in percent.
    pub crafted_buyback_percent: u8,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            pollid_rate: 100,
            crafted_buyback_percent: 70,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkConfig {
    pub max_hours: u32,
    pub wage_per_hour: i64,
    pub exp_per_hour: u64,
    pub reputation_per_hour: i64,
}

impl Default for WorkConfig {
    fn default() -> Self {
        Self {
            max_hours: 12,
            wage_per_hour: 15,
            exp_per_hour: 10,
            reputation_per_hour: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Operations per write batch; capped at the store limit of 500.
    pub batch_size: usize,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self { batch_size: 450 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// How often the loop checks for a new UTC day or month.
    pub check_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("politsei.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let content = toml::to_string_pretty(&Config::default())
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject values the services cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.game.default_shard.trim().is_empty() {
            bail!("game.default_shard must not be empty");
        }
        if !self.game.shards.contains(&self.game.default_shard) {
            bail!(
                "game.shards must contain the default shard '{}'",
                self.game.default_shard
            );
        }
        if let Some(bad) = self
            .game
            .shards
            .iter()
            .find(|s| s.is_empty() || s.contains('_') || s.contains('/'))
        {
            bail!("shard id '{}' may not be empty or contain '_' or '/'", bad);
        }
        self.storage.index_specs()?;
        if self.storage.operation_timeout_ms == 0 {
            bail!("storage.operation_timeout_ms must be positive");
        }
        if self.leaderboard.default_limit == 0 {
            bail!("leaderboard.default_limit must be positive");
        }
        if self.cache.leaderboard_ttl_secs <= 0
            || self.cache.aggregates_ttl_minutes <= 0
            || self.cache.casino_leaderboard_ttl_minutes <= 0
            || self.cache.shop_ttl_minutes <= 0
        {
            bail!("cache windows must be positive");
        }
        let crime = &self.crime;
        if !(0.0..=100.0).contains(&crime.initial_level) {
            bail!("crime.initial_level must be within 0..=100");
        }
        if crime.reference_hours <= 0.0 || crime.reference_headcount <= 0.0 {
            bail!("crime reference hours and headcount must be positive");
        }
        if self.casino.min_bet <= 0 || self.casino.max_bet < self.casino.min_bet {
            bail!("casino bets must satisfy 0 < min_bet <= max_bet");
        }
        if self.casino.jackpot_contribution_percent > 100 {
            bail!("casino.jackpot_contribution_percent must be at most 100");
        }
        if self.economy.pollid_rate <= 0 {
            bail!("economy.pollid_rate must be positive");
        }
        if self.work.max_hours == 0 {
            bail!("work.max_hours must be positive");
        }
        if self.admin.batch_size == 0 || self.admin.batch_size > crate::store::MAX_BATCH_OPERATIONS {
            bail!(
                "admin.batch_size must be within 1..={}",
                crate::store::MAX_BATCH_OPERATIONS
            );
        }
        if self.scheduler.check_interval_secs == 0 {
            bail!("scheduler.check_interval_secs must be positive");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            game: GameConfig {
                default_shard: "main".to_string(),
                shards: vec!["main".to_string()],
            },
            storage: StorageConfig {
                data_dir: "./data".to_string(),
                db_path: None,
                operation_timeout_ms: default_operation_timeout_ms(),
                indexes: default_indexes(),
            },
            cache: CacheConfig::default(),
            leaderboard: LeaderboardConfig::default(),
            crime: CrimeConfig::default(),
            casino: CasinoConfig::default(),
            economy: EconomyConfig::default(),
            work: WorkConfig::default(),
            admin: AdminConfig::default(),
            scheduler: SchedulerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
