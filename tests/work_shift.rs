//! Work shifts pay the officer, level them up and feed the crime index.
mod common;

use chrono::{TimeZone, Utc};

use common::{bare_store, officer, seed_player, FlakyStore};
use politsei::config::Config;
use politsei::game::types::{LedgerEntry, PlayerRecord};
use politsei::game::{exp_for_level, load_player, GameContext, GameError};
use politsei::store::{DocumentStore, Record};

#[test]
fn shift_pays_levels_up_and_reduces_crime() {
    let (_dir, store) = bare_store();
    let now = Utc.with_ymd_and_hms(2026, 8, 12, 18, 0, 0).unwrap();
    let mut player = officer("mari", "Tartu", 1, 0, now);
    // Ten experience short of level 2.
    player.experience = exp_for_level(2) - 10;
    seed_player(&store, &player);
    for i in 0..9 {
        seed_player(&store, &officer(&format!("colleague{i}"), "Tartu", 2, 0, now));
    }
    let ctx = GameContext::with_store(Config::default(), std::sync::Arc::new(store));
    ctx.cache().set("leaderboard_main_250", 1u8);
    ctx.cache().set("department_aggregates_main", 1u8);
    ctx.cache().set("shop_listing_main", 1u8);

    let report = ctx.work().complete_work_shift_at("mari", 12, now).expect("shift");

    assert_eq!(report.wage, 180);
    assert_eq!(report.experience_gained, 120);
    assert_eq!(report.reputation_gained, 24);
    assert_eq!(report.level_before, 1);
    assert!(report.leveled_up());
    assert!(report.crime.success);
    assert_eq!(report.crime.headcount, 10);
    assert_eq!(report.crime.reduction, 1.0);
    assert_eq!(report.crime.new_level, 49.0);

    let stored = load_player(ctx.store().as_ref(), ctx.shard(), "mari").expect("player");
    assert_eq!(stored.money, 180);
    assert_eq!(stored.level, report.level_after);
    assert_eq!(stored.reputation, 24);
    assert_eq!(ctx.store().count(LedgerEntry::COLLECTION).expect("count"), 1);

    // Only the shop entry survives the invalidation.
    assert_eq!(ctx.cache().len(), 1);
}

#[test]
fn shift_rules_are_enforced() {
    let (_dir, store) = bare_store();
    let now = Utc::now();
    seed_player(&store, &officer("mari", "Tartu", 3, 0, now));
    seed_player(&store, &PlayerRecord::new("kadett", "kadett", "main", now));
    let ctx = GameContext::with_store(Config::default(), std::sync::Arc::new(store));
    let work = ctx.work();

    assert!(matches!(work.complete_work_shift_at("mari", 0, now), Err(GameError::InvalidAmount(_))));
    assert!(matches!(work.complete_work_shift_at("mari", 13, now), Err(GameError::InvalidAmount(_))));
    assert!(matches!(work.complete_work_shift_at("kadett", 4, now), Err(GameError::NotEligible(_))));
    assert!(matches!(work.complete_work_shift_at("ghost", 4, now), Err(GameError::NotFound(_))));

    let untouched = load_player(ctx.store().as_ref(), ctx.shard(), "mari").expect("player");
    assert_eq!(untouched.money, 0);
    assert_eq!(ctx.store().count("departmentCrime").expect("count"), 0);
}

#[test]
fn uncharted_department_is_rejected_before_paying() {
    let (_dir, store) = bare_store();
    let now = Utc::now();
    seed_player(&store, &officer("mari", "Atlantis", 3, 0, now));
    let ctx = GameContext::with_store(Config::default(), std::sync::Arc::new(store));
    ctx.cache().set("leaderboard_main_250", 1u8);

    assert!(matches!(
        ctx.work().complete_work_shift_at("mari", 12, now),
        Err(GameError::UnknownDepartment(_))
    ));

    let untouched = load_player(ctx.store().as_ref(), ctx.shard(), "mari").expect("player");
    assert_eq!((untouched.money, untouched.experience, untouched.reputation), (0, exp_for_level(3), 0));
    assert_eq!(ctx.store().count(LedgerEntry::COLLECTION).expect("count"), 0);
    assert_eq!(ctx.cache().len(), 1);
}

#[test]
fn wage_is_kept_when_crime_store_is_down() {
    let (_dir, store) = bare_store();
    let now = Utc.with_ymd_and_hms(2026, 8, 12, 18, 0, 0).unwrap();
    seed_player(&store, &officer("mari", "Tartu", 3, 0, now));
    let store = std::sync::Arc::new(FlakyStore::new(store));
    let ctx = GameContext::with_store(Config::default(), store.clone());
    ctx.cache().set("department_aggregates_main", 1u8);

    store.set_queries_failing(true);
    let report = ctx.work().complete_work_shift_at("mari", 4, now).expect("shift");
    store.set_queries_failing(false);

    assert_eq!(report.wage, 60);
    assert!(!report.crime.success);
    assert_eq!(report.crime.new_level, 0.0);
    assert_eq!(report.crime.headcount, 0);

    let stored = load_player(store.inner(), ctx.shard(), "mari").expect("player");
    assert_eq!(stored.money, 60);
    assert_eq!(store.inner().count(LedgerEntry::COLLECTION).expect("count"), 1);
    assert_eq!(store.inner().count("departmentCrime").expect("count"), 0);
    assert!(ctx.cache().is_empty());
}
