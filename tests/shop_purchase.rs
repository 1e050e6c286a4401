//! Shop: purchases against each stock policy, crafted supply and listing cache.
mod common;

use chrono::Utc;

use common::{bare_store, main_shard, officer, seed_player, shared};
use politsei::cache::TimedCache;
use politsei::config::{CacheConfig, EconomyConfig};
use politsei::game::shop::ShopService;
use politsei::game::types::LedgerEntry;
use politsei::game::{load_player, GameError};
use politsei::store::{DocumentStore, Record, SledStore};

fn shop(store: std::sync::Arc<SledStore>, cache: &TimedCache) -> ShopService<SledStore> {
    ShopService::new(
        store,
        cache.clone(),
        main_shard(),
        EconomyConfig::default(),
        CacheConfig::default(),
    )
}

fn availability(listing: &[politsei::game::shop::ShopListing], item_id: &str) -> Option<u32> {
    listing
        .iter()
        .find(|row| row.item.id == item_id)
        .and_then(|row| row.available)
}

#[test]
fn limited_purchase_updates_stock_balance_and_listing() {
    let (_dir, store) = bare_store();
    let mut player = officer("mari", "Tartu", 3, 0, Utc::now());
    player.money = 2_000;
    seed_player(&store, &player);
    let store = shared(store);
    let cache = TimedCache::new();
    let shop = shop(store.clone(), &cache);

    let before = shop.listing().expect("listing");
    assert_eq!(availability(&before, "kuulivest"), Some(20));
    assert_eq!(availability(&before, "taskulamp"), None);

    let receipt = shop.purchase("mari", "kuulivest", 2).expect("purchase");
    assert_eq!(receipt.total_price, 1_200);
    assert_eq!(receipt.money_after, 800);
    assert_eq!(receipt.stock_after, Some(18));

    let after = shop.listing().expect("listing");
    assert_eq!(availability(&after, "kuulivest"), Some(18));

    let stored = load_player(store.as_ref(), &main_shard(), "mari").expect("player");
    assert_eq!(stored.money, 800);
    assert_eq!(stored.item_quantity("kuulivest", false), 2);
    assert_eq!(store.count(LedgerEntry::COLLECTION).expect("count"), 1);
}

#[test]
fn purchases_fail_without_stock_or_funds() {
    let (_dir, store) = bare_store();
    let mut player = officer("mari", "Tartu", 3, 0, Utc::now());
    player.money = 100_000;
    player.pollid = 5;
    seed_player(&store, &player);
    let store = shared(store);
    let cache = TimedCache::new();
    let shop = shop(store.clone(), &cache);

    assert!(matches!(
        shop.purchase("mari", "kuulivest", 21),
        Err(GameError::InsufficientStock { needed: 21, available: 20, .. })
    ));
    assert!(matches!(
        shop.purchase("mari", "raadiosaatja", 1),
        Err(GameError::InsufficientFunds { currency: "pollid", needed: 8, available: 5 })
    ));
    assert!(matches!(
        shop.purchase("mari", "meisterdatud_kilp", 1),
        Err(GameError::InsufficientStock { available: 0, .. })
    ));
    assert!(matches!(shop.purchase("mari", "kuldmedal", 1), Err(GameError::UnknownItem(_))));
    assert!(matches!(shop.purchase("mari", "taskulamp", 0), Err(GameError::InvalidAmount(_))));

    let stored = load_player(store.as_ref(), &main_shard(), "mari").expect("player");
    assert_eq!((stored.money, stored.pollid), (100_000, 5));
    assert!(stored.inventory.is_empty());
    assert_eq!(store.count(LedgerEntry::COLLECTION).expect("count"), 0);
}

#[test]
fn unlimited_items_need_no_stock_document() {
    let (_dir, store) = bare_store();
    let mut player = officer("mari", "Tartu", 3, 0, Utc::now());
    player.money = 500;
    seed_player(&store, &player);
    let store = shared(store);
    let cache = TimedCache::new();
    let shop = shop(store.clone(), &cache);

    let receipt = shop.purchase("mari", "taskulamp", 3).expect("purchase");
    assert_eq!(receipt.stock_after, None);
    assert_eq!(receipt.money_after, 380);
    assert_eq!(store.count("shopStock").expect("count"), 0);
}

#[test]
fn crafted_items_flow_from_player_to_shop() {
    let (_dir, store) = bare_store();
    let now = Utc::now();
    let mut crafter = officer("meister", "Narva", 4, 0, now);
    crafter.add_item("meisterdatud_kilp", 2, true);
    crafter.add_item("kuulivest", 1, false);
    let mut buyer = officer("ostja", "Narva", 4, 0, now);
    buyer.money = 1_000;
    seed_player(&store, &crafter);
    seed_player(&store, &buyer);
    let store = shared(store);
    let cache = TimedCache::new();
    let shop = shop(store.clone(), &cache);

    assert!(matches!(
        shop.supply_crafted("meister", "kuulivest", 1),
        Err(GameError::NotEligible(_))
    ));
    assert!(matches!(
        shop.supply_crafted("meister", "meisterdatud_kilp", 3),
        Err(GameError::InsufficientStock { needed: 3, available: 2, .. })
    ));

    let supplied = shop.supply_crafted("meister", "meisterdatud_kilp", 2).expect("supply");
    assert_eq!(supplied.payout, 420);
    assert_eq!(supplied.stock_after, 2);
    let crafter = load_player(store.as_ref(), &main_shard(), "meister").expect("crafter");
    assert_eq!(crafter.money, 420);
    assert_eq!(crafter.item_quantity("meisterdatud_kilp", true), 0);

    let bought = shop.purchase("ostja", "meisterdatud_kilp", 1).expect("purchase");
    assert_eq!(bought.stock_after, Some(1));
    assert_eq!(bought.money_after, 700);
}
