//! Session context: one store handle, one cache, one active shard.
//!
//! Services are cheap views built on demand from the context, so they always
//! see the current shard and share the same cache instance.

use std::sync::Arc;

use anyhow::Result;
use log::info;

use super::aggregation::AggregationService;
use super::casino::CasinoService;
use super::crime::CrimeIndex;
use super::currency::CurrencyService;
use super::shard::ShardId;
use super::shop::ShopService;
use super::work::WorkService;
use super::GameError;
use crate::cache::TimedCache;
use crate::config::Config;
use crate::store::{DocumentStore, SledStore, SledStoreBuilder};

pub struct GameContext<S: DocumentStore = SledStore> {
    config: Config,
    store: Arc<S>,
    cache: TimedCache,
    shard: ShardId,
}

impl GameContext<SledStore> {
    /// Open the configured sled store with its declared indexes, on the default shard.
    pub fn open(config: Config) -> Result<Self> {
        let store = SledStoreBuilder::new(config.storage.db_path())
            .with_indexes(config.storage.index_specs()?)
            .open()?;
        info!("opened store at {}", config.storage.db_path().display());
        Ok(Self::with_store(config, Arc::new(store)))
    }
}

impl<S: DocumentStore> GameContext<S> {
    pub fn with_store(config: Config, store: Arc<S>) -> Self {
        let shard = ShardId::new(&config.game.default_shard, &config.game.default_shard);
        Self {
            config,
            store,
            cache: TimedCache::new(),
            shard,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn cache(&self) -> &TimedCache {
        &self.cache
    }

    pub fn shard(&self) -> &ShardId {
        &self.shard
    }

    /// Every configured shard.
    pub fn shards(&self) -> Vec<ShardId> {
        self.config
            .game
            .shards
            .iter()
            .map(|id| ShardId::new(id, &self.config.game.default_shard))
            .collect()
    }

    /// Move the session to another shard. Cached views of the old shard are dropped.
    pub fn switch_shard(&mut self, shard_id: &str) -> Result<(), GameError> {
        if !self.config.game.shards.iter().any(|s| s == shard_id) {
            return Err(GameError::NotFound(format!("shard {shard_id}")));
        }
        if self.shard.as_str() != shard_id {
            self.cache.clear_all();
            self.shard = ShardId::new(shard_id, &self.config.game.default_shard);
            info!("switched to shard {}", self.shard);
        }
        Ok(())
    }

    /// End the session. The cache belongs to the session and goes with it.
    pub fn close(self) {
        self.cache.clear_all();
    }

    pub fn crime(&self) -> CrimeIndex<S> {
        CrimeIndex::new(
            Arc::clone(&self.store),
            self.cache.clone(),
            self.shard.clone(),
            self.config.crime.clone(),
        )
    }

    pub fn aggregation(&self) -> AggregationService<S> {
        AggregationService::new(
            Arc::clone(&self.store),
            self.cache.clone(),
            self.shard.clone(),
            self.config.leaderboard.clone(),
            self.config.cache.clone(),
            self.crime(),
        )
    }

    pub fn shop(&self) -> ShopService<S> {
        ShopService::new(
            Arc::clone(&self.store),
            self.cache.clone(),
            self.shard.clone(),
            self.config.economy.clone(),
            self.config.cache.clone(),
        )
    }

    pub fn currency(&self) -> CurrencyService<S> {
        CurrencyService::new(Arc::clone(&self.store), self.shard.clone(), self.config.economy.clone())
    }

    pub fn casino(&self) -> CasinoService<S> {
        CasinoService::new(
            Arc::clone(&self.store),
            self.cache.clone(),
            self.shard.clone(),
            self.config.casino.clone(),
            self.config.cache.clone(),
        )
    }

    pub fn work(&self) -> WorkService<S> {
        WorkService::new(
            Arc::clone(&self.store),
            self.cache.clone(),
            self.shard.clone(),
            self.config.work.clone(),
            self.crime(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> GameContext {
        let mut config = Config::default();
        config.game.shards.push("test".to_string());
        config.storage.data_dir = dir.path().to_string_lossy().into_owned();
        GameContext::open(config).expect("open")
    }

    #[test]
    fn switching_shard_clears_cache() {
        let dir = TempDir::new().expect("tempdir");
        let mut ctx = context(&dir);
        ctx.cache().set("leaderboard_main_250", 1u8);

        ctx.switch_shard("main").expect("same shard");
        assert_eq!(ctx.cache().len(), 1);

        ctx.switch_shard("test").expect("switch");
        assert!(ctx.cache().is_empty());
        assert_eq!(ctx.shard().qualify("u1"), "u1_test");
    }

    #[test]
    fn unknown_shard_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let mut ctx = context(&dir);
        assert!(matches!(ctx.switch_shard("nope"), Err(GameError::NotFound(_))));
        assert_eq!(ctx.shard().as_str(), "main");
    }
}
