//! Slot machine: hourly allowance, bets, jackpot bookkeeping and leaderboard.
mod common;

use chrono::{Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;

use common::{bare_store, indexed_store, main_shard, officer, seed_player, shared};
use politsei::cache::TimedCache;
use politsei::config::{CacheConfig, CasinoConfig};
use politsei::game::casino::CasinoService;
use politsei::game::types::LedgerEntry;
use politsei::game::{load_player, GameError};
use politsei::store::{DocumentStore, Record, SledStore};

fn casino(store: std::sync::Arc<SledStore>) -> CasinoService<SledStore> {
    CasinoService::new(
        store,
        TimedCache::new(),
        main_shard(),
        CasinoConfig::default(),
        CacheConfig::default(),
    )
}

#[test]
fn hourly_limit_resets_next_hour() {
    let (_dir, store) = bare_store();
    let mut player = officer("mari", "Tartu", 3, 0, Utc::now());
    player.money = 100_000;
    seed_player(&store, &player);
    let casino = casino(shared(store));
    let mut rng = StdRng::seed_from_u64(11);
    let hour = Utc.with_ymd_and_hms(2026, 7, 1, 14, 5, 0).unwrap();

    for expected_left in (0..5).rev() {
        let outcome = casino.spin_at("mari", 10, &mut rng, hour).expect("spin");
        assert_eq!(outcome.plays_left, expected_left);
    }
    assert!(matches!(
        casino.spin_at("mari", 10, &mut rng, hour + Duration::minutes(50)),
        Err(GameError::RateLimitExceeded { used: 5, limit: 5 })
    ));
    assert_eq!(casino.plays_left_at("mari", hour).expect("left"), 0);

    let next_hour = Utc.with_ymd_and_hms(2026, 7, 1, 15, 0, 0).unwrap();
    assert_eq!(casino.plays_left_at("mari", next_hour).expect("left"), 5);
    casino.spin_at("mari", 10, &mut rng, next_hour).expect("spin after reset");

    // Same hour on another day is a fresh window too.
    let next_day = Utc.with_ymd_and_hms(2026, 7, 2, 15, 10, 0).unwrap();
    assert_eq!(casino.plays_left_at("mari", next_day).expect("left"), 5);
}

#[test]
fn vip_players_get_the_higher_limit() {
    let (_dir, store) = bare_store();
    let mut player = officer("vip", "Tartu", 3, 0, Utc::now());
    player.money = 100_000;
    player.is_vip = true;
    seed_player(&store, &player);
    let casino = casino(shared(store));
    let mut rng = StdRng::seed_from_u64(5);
    let now = Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).unwrap();

    for _ in 0..10 {
        casino.spin_at("vip", 10, &mut rng, now).expect("spin");
    }
    assert!(matches!(
        casino.spin_at("vip", 10, &mut rng, now),
        Err(GameError::RateLimitExceeded { limit: 10, .. })
    ));
}

#[test]
fn bets_are_validated_before_playing() {
    let (_dir, store) = bare_store();
    let mut player = officer("mari", "Tartu", 3, 0, Utc::now());
    player.money = 50;
    seed_player(&store, &player);
    let store = shared(store);
    let casino = casino(store.clone());
    let mut rng = StdRng::seed_from_u64(1);
    let now = Utc::now();

    assert!(matches!(casino.spin_at("mari", 5, &mut rng, now), Err(GameError::InvalidAmount(_))));
    assert!(matches!(casino.spin_at("mari", 5000, &mut rng, now), Err(GameError::InvalidAmount(_))));
    assert!(matches!(
        casino.spin_at("mari", 100, &mut rng, now),
        Err(GameError::InsufficientFunds { needed: 100, available: 50, .. })
    ));
    assert_eq!(store.count(LedgerEntry::COLLECTION).expect("count"), 0);
    let stored = load_player(store.as_ref(), &main_shard(), "mari").expect("player");
    assert_eq!(stored.casino.total_spins, 0);
}

#[test]
fn spins_settle_money_stats_and_jackpot() {
    let (_dir, store) = bare_store();
    let mut player = officer("mari", "Tartu", 3, 0, Utc::now());
    player.money = 10_000;
    seed_player(&store, &player);
    let store = shared(store);
    let casino = casino(store.clone());
    let config = CasinoConfig::default();
    let mut rng = StdRng::seed_from_u64(2026);
    let now = Utc.with_ymd_and_hms(2026, 7, 3, 20, 0, 0).unwrap();

    let outcomes: Vec<_> = (0..5)
        .map(|_| casino.spin_at("mari", 100, &mut rng, now).expect("spin"))
        .collect();

    let net: i64 = outcomes.iter().map(|o| o.winnings - o.bet).sum();
    let stored = load_player(store.as_ref(), &main_shard(), "mari").expect("player");
    assert_eq!(stored.money, 10_000 + net);
    assert_eq!(stored.casino.total_spins, 5);
    assert_eq!(
        stored.casino.total_winnings,
        outcomes.iter().map(|o| o.winnings).sum::<i64>()
    );
    assert_eq!(
        stored.casino.biggest_win,
        outcomes.iter().map(|o| o.winnings).max().unwrap_or(0)
    );
    assert_eq!(store.count(LedgerEntry::COLLECTION).expect("count"), 5);

    if !outcomes.iter().any(|o| o.jackpot_won) {
        let losses = outcomes.iter().filter(|o| o.multiplier == 0).count() as i64;
        let expected = config.jackpot_seed + losses * 100 * config.jackpot_contribution_percent as i64 / 100;
        assert_eq!(casino.jackpot().expect("jackpot").amount, expected);
    }
}

#[test]
fn casino_leaderboard_ranks_by_winnings() {
    let now = Utc::now();
    let mut big = officer("big", "Tartu", 3, 0, now);
    big.casino.total_spins = 40;
    big.casino.total_winnings = 9_000;
    let mut small = officer("small", "Narva", 3, 0, now);
    small.casino.total_spins = 3;
    small.casino.total_winnings = 200;
    let mut hidden = officer("hidden", "Narva", 3, 0, now);
    hidden.casino.total_spins = 3;
    hidden.casino.total_winnings = 50_000;
    hidden.exclude_from_leaderboard = true;
    let never = officer("never", "Narva", 3, 0, now);

    for (indexed, (_dir, store)) in [(true, indexed_store()), (false, bare_store())] {
        for player in [&big, &small, &hidden, &never] {
            seed_player(&store, player);
        }
        let casino = casino(shared(store));
        let rows = casino.leaderboard_at(10, now).expect("leaderboard");
        let names: Vec<&str> = rows.iter().map(|r| r.username.as_str()).collect();
        assert_eq!(names, vec!["big", "small"], "indexed store: {indexed}");
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[0].total_spins, 40);
    }
}
