//! # Aggregation service
//!
//! Read-optimised views over the graduated roster and the crime states:
//!
//! 1. the leaderboard (level, then reputation, both descending)
//! 2. reputation rollups by department × unit, by department and by prefecture
//! 3. the crime display, lowest crime level first
//!
//! [`AggregationService::leaderboard`] answers from a dedicated store query
//! with a short cache window. [`AggregationService::aggregate_views`] computes
//! everything from one roster fetch and caches the bundle per shard for much
//! longer. Neither view is transactional; staleness up to the cache window is
//! accepted.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};

use super::crime::CrimeIndex;
use super::organization::{self, UNITS};
use super::roster;
use super::shard::ShardId;
use super::types::{DepartmentCrimeState, PlayerRecord, Position};
use super::GameError;
use crate::cache::{MaxAge, TimedCache};
use crate::config::{CacheConfig, LeaderboardConfig};
use crate::logutil::escape_log;
use crate::metrics;
use crate::store::{decode, Direction, DocumentStore, StoreError, Query};

pub const LEADERBOARD_FAMILY: &str = "leaderboard";
pub const AGGREGATES_FAMILY: &str = "department_aggregates";

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: String,
    pub username: String,
    pub level: u32,
    pub reputation: i64,
    pub department: Option<String>,
    pub position: Option<Position>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardPage {
    pub entries: Vec<LeaderboardEntry>,
    /// Built from an unordered page because the composite index is missing;
    /// the true global top-N is not guaranteed.
    pub degraded: bool,
    /// Served from an expired cache entry after a failed fetch.
    pub stale: bool,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitScore {
    pub department: String,
    pub unit: String,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepartmentScore {
    pub department: String,
    pub prefecture: String,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrefectureScore {
    pub prefecture: String,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrimeDisplay {
    pub rank: usize,
    pub department: String,
    pub prefecture: String,
    pub crime_level: f64,
    pub headcount: usize,
    pub work_hours_this_cycle: f64,
}

/// All views of one shard, computed together from one roster fetch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregateViews {
    pub leaderboard: Vec<LeaderboardEntry>,
    pub unit_scores: Vec<UnitScore>,
    pub department_scores: Vec<DepartmentScore>,
    pub prefecture_scores: Vec<PrefectureScore>,
    pub crime: Vec<CrimeDisplay>,
    pub generated_at: Option<DateTime<Utc>>,
    /// Player documents skipped as malformed during the roster fetch.
    pub skipped_documents: usize,
    pub stale: bool,
}

/// The ordered leaderboard query. Needs the
/// `players:shard,completed_courses,level,reputation` composite index.
pub fn leaderboard_query(shard: &ShardId, limit: usize) -> Query {
    roster::graduated_query(shard)
        .order_by("level", Direction::Descending)
        .order_by("reputation", Direction::Descending)
        .limit(limit)
}

fn is_listed(player: &PlayerRecord, denylist: &HashSet<&str>) -> bool {
    !player.exclude_from_leaderboard && !denylist.contains(player.username.as_str())
}

/// Rank eligible players: level desc, reputation desc, username asc.
pub fn rank_players(players: &[PlayerRecord], denylist: &[String], limit: usize) -> Vec<LeaderboardEntry> {
    let denied: HashSet<&str> = denylist.iter().map(String::as_str).collect();
    let mut eligible: Vec<&PlayerRecord> = players
        .iter()
        .filter(|p| p.is_graduated() && is_listed(p, &denied))
        .collect();
    eligible.sort_by(|a, b| {
        b.level
            .cmp(&a.level)
            .then(b.reputation.cmp(&a.reputation))
            .then(a.username.cmp(&b.username))
    });
    eligible
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, p)| LeaderboardEntry {
            rank: i + 1,
            user_id: p.user_id.clone(),
            username: p.username.clone(),
            level: p.level,
            reputation: p.reputation,
            department: p.department.clone(),
            position: p.position,
        })
        .collect()
}

fn sorted_scores<K: Ord, T>(scores: BTreeMap<K, i64>, build: impl Fn(K, i64) -> T, score_of: impl Fn(&T) -> i64) -> Vec<T> {
    let mut rows: Vec<T> = scores
        .into_iter()
        .filter(|(_, score)| *score != 0)
        .map(|(key, score)| build(key, score))
        .collect();
    // Stable sort keeps the key order for equal scores.
    rows.sort_by_key(|row| std::cmp::Reverse(score_of(row)));
    rows
}

/// Compute every view from a roster and the crime states of the same shard.
pub fn compute_views(
    players: &[PlayerRecord],
    states: &[DepartmentCrimeState],
    denylist: &[String],
    leaderboard_limit: usize,
    now: DateTime<Utc>,
) -> AggregateViews {
    let mut by_unit: BTreeMap<(String, String), i64> = BTreeMap::new();
    let mut by_department: BTreeMap<String, i64> = BTreeMap::new();
    let mut by_prefecture: BTreeMap<String, i64> = BTreeMap::new();
    let mut prefecture_names: BTreeMap<String, String> = BTreeMap::new();

    for (department, prefecture) in organization::departments() {
        for unit in UNITS {
            by_unit.insert((department.to_string(), unit.to_string()), 0);
        }
        by_department.insert(department.to_string(), 0);
        by_prefecture.insert(prefecture.to_string(), 0);
        prefecture_names.insert(department.to_string(), prefecture.to_string());
    }

    for player in players.iter().filter(|p| p.is_department_staff()) {
        let Some(department) = player.department.as_deref() else {
            continue;
        };
        let prefecture = organization::prefecture_of(department)
            .map(str::to_string)
            .or_else(|| player.prefecture.clone());
        *by_department.entry(department.to_string()).or_insert(0) += player.reputation;
        if let Some(unit) = &player.unit {
            *by_unit
                .entry((department.to_string(), unit.clone()))
                .or_insert(0) += player.reputation;
        }
        if let Some(prefecture) = prefecture {
            prefecture_names
                .entry(department.to_string())
                .or_insert_with(|| prefecture.clone());
            *by_prefecture.entry(prefecture).or_insert(0) += player.reputation;
        }
    }

    let unit_scores = sorted_scores(
        by_unit,
        |(department, unit), score| UnitScore {
            department,
            unit,
            score,
        },
        |row| row.score,
    );
    let department_scores = sorted_scores(
        by_department,
        |department, score| DepartmentScore {
            prefecture: prefecture_names.get(&department).cloned().unwrap_or_default(),
            department,
            score,
        },
        |row| row.score,
    );
    let prefecture_scores = sorted_scores(
        by_prefecture,
        |prefecture, score| PrefectureScore { prefecture, score },
        |row| row.score,
    );

    let staff = roster::headcounts(players);
    let mut crime: Vec<CrimeDisplay> = states
        .iter()
        .map(|s| CrimeDisplay {
            rank: 0,
            department: s.department.clone(),
            prefecture: s.prefecture.clone(),
            crime_level: s.crime_level,
            headcount: staff.get(&s.department).copied().unwrap_or(0),
            work_hours_this_cycle: s.work_hours_this_cycle,
        })
        .collect();
    crime.sort_by(|a, b| {
        a.crime_level
            .total_cmp(&b.crime_level)
            .then_with(|| a.department.cmp(&b.department))
    });
    for (i, row) in crime.iter_mut().enumerate() {
        row.rank = i + 1;
    }

    AggregateViews {
        leaderboard: rank_players(players, denylist, leaderboard_limit),
        unit_scores,
        department_scores,
        prefecture_scores,
        crime,
        generated_at: Some(now),
        skipped_documents: 0,
        stale: false,
    }
}

pub struct AggregationService<S: DocumentStore> {
    store: Arc<S>,
    cache: TimedCache,
    shard: ShardId,
    leaderboard: LeaderboardConfig,
    windows: CacheConfig,
    crime: CrimeIndex<S>,
}

impl<S: DocumentStore> AggregationService<S> {
    pub fn new(
        store: Arc<S>,
        cache: TimedCache,
        shard: ShardId,
        leaderboard: LeaderboardConfig,
        windows: CacheConfig,
        crime: CrimeIndex<S>,
    ) -> Self {
        Self {
            store,
            cache,
            shard,
            leaderboard,
            windows,
            crime,
        }
    }

    fn leaderboard_key(&self, limit: usize) -> String {
        format!("{}_{}_{}", LEADERBOARD_FAMILY, self.shard, limit)
    }

    /// Drop every cached leaderboard page and the aggregate bundle of this shard.
    pub fn invalidate(&self) {
        let cleared = self
            .cache
            .clear_by_prefix(&format!("{}_{}_", LEADERBOARD_FAMILY, self.shard));
        self.cache.remove(&self.shard.cache_key(AGGREGATES_FAMILY));
        debug!("invalidated {} leaderboard pages on {}", cleared, self.shard);
    }

    pub fn leaderboard(&self, limit: Option<usize>, force_refresh: bool) -> Result<LeaderboardPage, GameError> {
        self.leaderboard_at(limit, force_refresh, Utc::now())
    }

    pub fn leaderboard_at(
        &self,
        limit: Option<usize>,
        force_refresh: bool,
        now: DateTime<Utc>,
    ) -> Result<LeaderboardPage, GameError> {
        let limit = limit.unwrap_or(self.leaderboard.default_limit);
        let key = self.leaderboard_key(limit);
        let window = MaxAge::Within(Duration::seconds(self.windows.leaderboard_ttl_secs));
        if !force_refresh {
            if let Some(page) = self.cache.get_at::<LeaderboardPage>(&key, window, now) {
                return Ok(page);
            }
        }

        match self.fetch_leaderboard(limit, now) {
            Ok(page) => {
                self.cache.set_at(&key, page.clone(), now);
                Ok(page)
            }
            Err(e) if e.is_transient() => {
                if let Some(mut page) = self.cache.get_at::<LeaderboardPage>(&key, MaxAge::Unbounded, now) {
                    warn!("leaderboard fetch on {} failed ({}), serving cached page", self.shard, e);
                    metrics::inc_stale_fallbacks();
                    page.stale = true;
                    return Ok(page);
                }
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn fetch_leaderboard(&self, limit: usize, now: DateTime<Utc>) -> Result<LeaderboardPage, StoreError> {
        // Denylisted names may occupy slots of the ordered page.
        let query = leaderboard_query(&self.shard, limit + self.leaderboard.denylist.len());
        let (docs, degraded) = match self.store.query(&query) {
            Ok(docs) => (docs, false),
            Err(StoreError::MissingIndex { collection, fields }) => {
                warn!(
                    "leaderboard on {} running degraded: missing index {}:{}; results sorted from an unordered page",
                    self.shard, collection, fields
                );
                metrics::inc_degraded_queries();
                (self.store.query(&query.unordered())?, true)
            }
            Err(e) => return Err(e),
        };
        let mut players = Vec::with_capacity(docs.len());
        for doc in &docs {
            match decode::<PlayerRecord>(doc) {
                Ok(player) => players.push(player),
                Err(e) => {
                    warn!("leaderboard skipping {}: {}", escape_log(&doc.id), e);
                    metrics::inc_malformed_documents();
                }
            }
        }
        Ok(LeaderboardPage {
            entries: rank_players(&players, &self.leaderboard.denylist, limit),
            degraded,
            stale: false,
            generated_at: now,
        })
    }

    pub fn aggregate_views(&self, force_refresh: bool) -> AggregateViews {
        self.aggregate_views_at(force_refresh, Utc::now())
    }

    /// All views of the shard. Never fails: a failed fetch falls back to the
    /// last cached bundle of any age, then to empty views.
    pub fn aggregate_views_at(&self, force_refresh: bool, now: DateTime<Utc>) -> AggregateViews {
        let key = self.shard.cache_key(AGGREGATES_FAMILY);
        let window = MaxAge::Within(Duration::minutes(self.windows.aggregates_ttl_minutes));
        if !force_refresh {
            if let Some(views) = self.cache.get_at::<AggregateViews>(&key, window, now) {
                return views;
            }
        }

        match self.compute_at(now) {
            Ok(views) => {
                info!(
                    "aggregated {} leaderboard rows, {} departments, {} crime rows on {}",
                    views.leaderboard.len(),
                    views.department_scores.len(),
                    views.crime.len(),
                    self.shard
                );
                self.cache.set_at(&key, views.clone(), now);
                views
            }
            Err(e) => {
                warn!("aggregation on {} failed: {}", self.shard, e);
                match self.cache.get_at::<AggregateViews>(&key, MaxAge::Unbounded, now) {
                    Some(mut views) => {
                        metrics::inc_stale_fallbacks();
                        views.stale = true;
                        views
                    }
                    None => AggregateViews {
                        stale: true,
                        ..AggregateViews::default()
                    },
                }
            }
        }
    }

    fn compute_at(&self, now: DateTime<Utc>) -> Result<AggregateViews, GameError> {
        let scan = roster::graduated_roster(self.store.as_ref(), &self.shard)?;
        let states = self.crime.all_states_at(now)?;
        let mut views = compute_views(
            &scan.players,
            &states,
            &self.leaderboard.denylist,
            self.leaderboard.default_limit,
            now,
        );
        views.skipped_documents = scan.skipped;
        Ok(views)
    }

    pub fn crime(&self) -> &CrimeIndex<S> {
        &self.crime
    }
}
