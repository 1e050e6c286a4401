//! # Politsei - crime index and aggregation core of a police role-playing game
//!
//! Players of the game serve in Estonian police departments. Every department
//! carries a crime level that rises daily and falls as its officers complete
//! work shifts; leaderboards and reputation rollups summarise the roster. This
//! crate owns that simulation plus the currency-moving actions that feed it,
//! on top of a document store.
//!
//! ## Features
//!
//! - **Crime index**: lazily created per-department state with daily increase,
//!   headcount-weighted work reduction and a monthly reset.
//! - **Aggregated views**: leaderboard, unit/department/prefecture reputation
//!   rollups and the crime ranking, cached with time windows and served stale
//!   when the store is down.
//! - **Transactional actions**: pollid conversion, casino spins, shop purchases
//!   and work shift pay, each validated again inside its transaction.
//! - **Admin batch jobs**: level recompute and shop restock in write batches of
//!   at most 500 operations.
//! - **Sled-backed document store** with composite index rules and change
//!   subscriptions.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use politsei::config::Config;
//! use politsei::game::GameContext;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let ctx = GameContext::open(config)?;
//!
//!     let views = ctx.aggregation().aggregate_views(false);
//!     for row in &views.crime {
//!         println!("{}. {} {:.2}%", row.rank, row.department, row.crime_level);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - document store contract, queries, batches and the sled backend
//! - [`cache`] - time-windowed in-memory cache
//! - [`game`] - crime index, aggregation, admin jobs and gameplay services
//! - [`config`] - configuration management and validation
//! - [`metrics`] - process-wide counters
//! - [`logutil`] - log formatting helpers

pub mod cache;
pub mod config;
pub mod game;
pub mod logutil;
pub mod metrics;
pub mod store;
