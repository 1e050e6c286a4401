//! Crime index lifecycle against a real sled store.
mod common;

use std::time::Duration as StdDuration;

use chrono::{Duration, TimeZone, Utc};

use common::{bare_store, main_shard, officer, seed_player, shared, FlakyStore};
use politsei::cache::TimedCache;
use politsei::config::CrimeConfig;
use politsei::game::crime::{CrimeChange, CrimeIndex, WorkReduction};
use politsei::game::organization::{self, ACADEMY_DEPARTMENT};
use politsei::game::types::DepartmentCrimeState;
use politsei::game::GameError;
use politsei::store::{encode, DocumentStore, Record};

fn crime_index(store: std::sync::Arc<politsei::store::SledStore>) -> CrimeIndex<politsei::store::SledStore> {
    CrimeIndex::new(store, TimedCache::new(), main_shard(), CrimeConfig::default())
}

#[test]
fn tartu_state_is_created_on_first_read() {
    let (_dir, store) = bare_store();
    let store = shared(store);
    let crime = crime_index(store.clone());
    let now = Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap();

    assert!(store
        .get(DepartmentCrimeState::COLLECTION, "Tartu")
        .expect("get")
        .is_none());

    let state = crime
        .department_stats_at("Tartu", "Lõuna prefektuur", now)
        .expect("stats");
    assert_eq!(state.crime_level, 50.0);
    assert_eq!(state.work_hours_this_cycle, 0.0);
    assert_eq!(state.last_daily_increase, now);
    assert_eq!(state.monthly_reset_at, now);
    assert!(store
        .get(DepartmentCrimeState::COLLECTION, "Tartu")
        .expect("get")
        .is_some());

    // Second read returns the persisted state instead of a new one.
    let later = now + Duration::hours(3);
    let again = crime
        .department_stats_at("Tartu", "Lõuna prefektuur", later)
        .expect("stats");
    assert_eq!(again.updated_at, now);
}

#[test]
fn twelve_hour_shift_with_five_staff_lowers_level_by_two() {
    let (_dir, store) = bare_store();
    let now = Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap();
    for i in 0..5 {
        seed_player(&store, &officer(&format!("tartu{i}"), "Tartu", 5, 10, now));
    }
    // Staff of other departments and cadets do not count.
    seed_player(&store, &officer("narva0", "Narva", 5, 10, now));
    let mut cadet = officer("cadet", "Tartu", 1, 0, now);
    cadet.position = Some(politsei::game::types::Position::Kadett);
    seed_player(&store, &cadet);

    let crime = crime_index(shared(store));
    let result = crime.apply_work_at("Tartu", 12.0, now).expect("work");
    assert!(result.success);
    assert_eq!(result.headcount, 5);
    assert_eq!(result.previous_level, 50.0);
    assert_eq!(result.reduction, 2.0);
    assert_eq!(result.new_level, 48.0);

    let state = crime
        .department_stats_at("Tartu", "Lõuna prefektuur", now)
        .expect("stats");
    assert_eq!(state.crime_level, 48.0);
    assert_eq!(state.work_hours_this_cycle, 12.0);
}

#[test]
fn academy_is_rejected_and_never_stored() {
    let (_dir, store) = bare_store();
    let store = shared(store);
    let crime = crime_index(store.clone());
    let now = Utc::now();

    assert!(matches!(
        crime.apply_work_at(ACADEMY_DEPARTMENT, 4.0, now),
        Err(GameError::AcademyExempt(_))
    ));
    assert!(matches!(
        crime.department_stats_at(ACADEMY_DEPARTMENT, ACADEMY_DEPARTMENT, now),
        Err(GameError::AcademyExempt(_))
    ));
    assert!(matches!(
        crime.apply_work_at("Atlantis", 4.0, now),
        Err(GameError::UnknownDepartment(_))
    ));
    assert_eq!(store.count(DepartmentCrimeState::COLLECTION).expect("count"), 0);
}

#[test]
fn invalid_hours_are_rejected() {
    let (_dir, store) = bare_store();
    let crime = crime_index(shared(store));
    for hours in [0.0, -3.0, f64::NAN] {
        assert!(matches!(
            crime.apply_work_at("Tartu", hours, Utc::now()),
            Err(GameError::InvalidAmount(_))
        ));
    }
}

#[test]
fn new_month_resets_on_next_access() {
    let (_dir, store) = bare_store();
    let crime = crime_index(shared(store));
    let march = Utc.with_ymd_and_hms(2026, 3, 28, 12, 0, 0).unwrap();
    crime.apply_work_at("Pärnu", 12.0, march).expect("work");
    let worked = crime
        .department_stats_at("Pärnu", "Lääne prefektuur", march)
        .expect("stats");
    assert!(worked.crime_level < 50.0);

    let april = Utc.with_ymd_and_hms(2026, 4, 1, 0, 5, 0).unwrap();
    let reset = crime
        .department_stats_at("Pärnu", "Lääne prefektuur", april)
        .expect("stats");
    assert_eq!(reset.crime_level, 50.0);
    assert_eq!(reset.work_hours_this_cycle, 0.0);
    assert_eq!(reset.monthly_reset_at, april);
}

#[test]
fn daily_sweep_runs_once_per_day_and_clamps() {
    let (_dir, store) = bare_store();
    let crime = crime_index(shared(store));
    let department_count = organization::departments().count();
    let day1 = Utc.with_ymd_and_hms(2026, 6, 1, 0, 1, 0).unwrap();

    let first = crime.daily_increase_sweep_at(day1);
    assert_eq!(first.examined, department_count);
    assert_eq!(first.created, department_count);
    assert_eq!(first.changed, 0);

    let repeat = crime.daily_increase_sweep_at(day1 + Duration::hours(2));
    assert_eq!(repeat.changed, 0);

    let mut day = day1;
    for _ in 0..12 {
        day += Duration::days(1);
        let report = crime.daily_increase_sweep_at(day);
        assert_eq!(report.changed, department_count);
        assert!(report.errors.is_empty());
    }
    for state in crime.all_states_at(day).expect("states") {
        assert_eq!(state.crime_level, 100.0, "{}", state.department);
    }
}

#[test]
fn reset_all_restores_initial_level() {
    let (_dir, store) = bare_store();
    let crime = crime_index(shared(store));
    let now = Utc.with_ymd_and_hms(2026, 6, 10, 8, 0, 0).unwrap();
    crime.apply_work_at("Narva", 12.0, now).expect("work");

    let report = crime.reset_all_at(now + Duration::minutes(1));
    assert!(report.errors.is_empty());
    let narva = crime
        .department_stats_at("Narva", "Ida prefektuur", now + Duration::minutes(2))
        .expect("stats");
    assert_eq!(narva.crime_level, 50.0);
    assert_eq!(narva.work_hours_this_cycle, 0.0);
}

#[test]
fn watchers_see_work_updates() {
    let (_dir, store) = bare_store();
    let crime = crime_index(shared(store));
    let now = Utc::now();
    crime
        .department_stats_at("Võru", "Lõuna prefektuur", now)
        .expect("create");

    let watch = crime.watch("Võru").expect("watch");
    crime.apply_work_at("Võru", 6.0, now).expect("work");

    match watch.next_timeout(StdDuration::from_secs(5)) {
        Some(CrimeChange::Updated(state)) => assert!(state.crime_level < 50.0),
        other => panic!("expected update, got {other:?}"),
    }
    watch.unsubscribe();
    assert!(crime.watch(ACADEMY_DEPARTMENT).is_err());
}

#[test]
fn reduction_reports_amount_applied_when_level_bottoms_out() {
    let (_dir, store) = bare_store();
    let now = Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap();
    for i in 0..5 {
        seed_player(&store, &officer(&format!("tartu{i}"), "Tartu", 5, 10, now));
    }
    let nearly_clean = DepartmentCrimeState::new("Tartu", "Lõuna prefektuur", "main", 0.5, now);
    store
        .set(
            DepartmentCrimeState::COLLECTION,
            "Tartu",
            encode(&nearly_clean).expect("encode"),
            false,
        )
        .expect("seed state");

    let crime = crime_index(shared(store));
    let result = crime.apply_work_at("Tartu", 12.0, now).expect("work");
    assert!(result.success);
    assert_eq!(result.previous_level, 0.5);
    assert_eq!(result.new_level, 0.0);
    assert_eq!(result.reduction, 0.5);
}

#[test]
fn prefecture_must_match_the_chart() {
    let (_dir, store) = bare_store();
    let store = shared(store);
    let crime = crime_index(store.clone());

    assert!(matches!(
        crime.department_stats_at("Tartu", "Ida prefektuur", Utc::now()),
        Err(GameError::UnknownDepartment(_))
    ));
    assert_eq!(store.count(DepartmentCrimeState::COLLECTION).expect("count"), 0);
}

#[test]
fn store_outage_yields_a_failed_reduction() {
    let (_dir, store) = bare_store();
    let now = Utc::now();
    seed_player(&store, &officer("tartu0", "Tartu", 5, 10, now));
    let store = shared(FlakyStore::new(store));
    let crime = CrimeIndex::new(store.clone(), TimedCache::new(), main_shard(), CrimeConfig::default());

    // Headcount query fails.
    store.set_reads_failing(true);
    let result = crime.apply_work_at("Tartu", 12.0, now).expect("no error on outage");
    assert!(matches!(
        result,
        WorkReduction {
            success: false,
            headcount: 0,
            ..
        }
    ));
    assert_eq!(
        (result.previous_level, result.new_level, result.reduction),
        (0.0, 0.0, 0.0)
    );

    // Headcount works, the state transaction fails.
    store.set_reads_failing(false);
    store.set_transactions_failing(true);
    let result = crime.apply_work_at("Tartu", 12.0, now).expect("no error on outage");
    assert!(!result.success);
    assert_eq!(
        (result.previous_level, result.new_level, result.reduction, result.headcount),
        (0.0, 0.0, 0.0, 0)
    );
    assert!(!result.message.is_empty());

    store.set_transactions_failing(false);
    assert_eq!(
        store.inner().count(DepartmentCrimeState::COLLECTION).expect("count"),
        0
    );
}
