//! Police equipment shop.
//!
//! The catalog is static. Items carry one of three stock policies:
//! unlimited (no stock document), limited (stock refilled by the admin
//! restock) and player-crafted (stock only grows when players supply items).
//! Every shop mutation drops all cached `shop_*` views.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};

use super::shard::ShardId;
use super::types::{LedgerEntry, LedgerKind, PlayerRecord, ShopStock};
use super::{player_doc_id, GameError};
use crate::cache::{MaxAge, TimedCache};
use crate::config::{CacheConfig, EconomyConfig};
use crate::logutil::escape_log;
use crate::store::record::{tx_get, tx_put};
use crate::store::{decode, DocumentStore, Record};

pub const SHOP_FAMILY: &str = "shop";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceCurrency {
    Money,
    Pollid,
}

impl PriceCurrency {
    fn label(self) -> &'static str {
        match self {
            PriceCurrency::Money => "money",
            PriceCurrency::Pollid => "pollid",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockPolicy {
    Unlimited,
    Limited(u32),
    PlayerCrafted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShopItem {
    pub id: &'static str,
    pub name: &'static str,
    pub price: i64,
    pub currency: PriceCurrency,
    /// `None` is unlimited, `Some(0)` player-crafted, `Some(n)` limited to `n`.
    pub max_stock: Option<u32>,
}

impl ShopItem {
    pub fn policy(&self) -> StockPolicy {
        match self.max_stock {
            None => StockPolicy::Unlimited,
            Some(0) => StockPolicy::PlayerCrafted,
            Some(max) => StockPolicy::Limited(max),
        }
    }
}

pub const CATALOG: &[ShopItem] = &[
    ShopItem {
        id: "taskulamp",
        name: "Taskulamp",
        price: 40,
        currency: PriceCurrency::Money,
        max_stock: None,
    },
    ShopItem {
        id: "kohvitermos",
        name: "Kohvitermos",
        price: 25,
        currency: PriceCurrency::Money,
        max_stock: None,
    },
    ShopItem {
        id: "kuulivest",
        name: "Kuulivest",
        price: 600,
        currency: PriceCurrency::Money,
        max_stock: Some(20),
    },
    ShopItem {
        id: "kaitsekindad",
        name: "Kaitsekindad",
        price: 120,
        currency: PriceCurrency::Money,
        max_stock: Some(40),
    },
    ShopItem {
        id: "raadiosaatja",
        name: "Raadiosaatja",
        price: 8,
        currency: PriceCurrency::Pollid,
        max_stock: Some(10),
    },
    ShopItem {
        id: "meisterdatud_kilp",
        name: "Meisterdatud kilp",
        price: 300,
        currency: PriceCurrency::Money,
        max_stock: Some(0),
    },
    ShopItem {
        id: "kodune_voileib",
        name: "Kodune võileib",
        price: 15,
        currency: PriceCurrency::Money,
        max_stock: Some(0),
    },
];

pub fn find_item(item_id: &str) -> Option<&'static ShopItem> {
    CATALOG.iter().find(|item| item.id == item_id)
}

/// One catalog row with its current availability (`None` = unlimited).
#[derive(Debug, Clone, PartialEq)]
pub struct ShopListing {
    pub item: ShopItem,
    pub available: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseReceipt {
    pub item_id: String,
    pub quantity: u32,
    pub total_price: i64,
    pub currency: PriceCurrency,
    pub money_after: i64,
    pub pollid_after: i64,
    pub stock_after: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SupplyReceipt {
    pub item_id: String,
    pub quantity: u32,
    pub payout: i64,
    pub stock_after: u32,
}

fn total_price(item: &ShopItem, quantity: u32) -> Result<i64, GameError> {
    if quantity == 0 {
        return Err(GameError::InvalidAmount("quantity must be positive".into()));
    }
    item.price
        .checked_mul(quantity as i64)
        .ok_or_else(|| GameError::InvalidAmount(format!("{quantity} × {}", item.id)))
}

fn balance(player: &PlayerRecord, currency: PriceCurrency) -> i64 {
    match currency {
        PriceCurrency::Money => player.money,
        PriceCurrency::Pollid => player.pollid,
    }
}

fn check_funds(player: &PlayerRecord, currency: PriceCurrency, needed: i64) -> Result<(), GameError> {
    let available = balance(player, currency);
    if available < needed {
        return Err(GameError::InsufficientFunds {
            currency: currency.label(),
            needed,
            available,
        });
    }
    Ok(())
}

fn check_stock(item: &ShopItem, available: Option<u32>, quantity: u32) -> Result<(), GameError> {
    match available {
        Some(available) if available < quantity => Err(GameError::InsufficientStock {
            item: item.id.to_string(),
            needed: quantity,
            available,
        }),
        _ => Ok(()),
    }
}

pub struct ShopService<S: DocumentStore> {
    store: Arc<S>,
    cache: TimedCache,
    shard: ShardId,
    economy: EconomyConfig,
    windows: CacheConfig,
}

impl<S: DocumentStore> ShopService<S> {
    pub fn new(store: Arc<S>, cache: TimedCache, shard: ShardId, economy: EconomyConfig, windows: CacheConfig) -> Self {
        Self {
            store,
            cache,
            shard,
            economy,
            windows,
        }
    }

    fn invalidate(&self) {
        self.cache.clear_by_prefix(&format!("{SHOP_FAMILY}_"));
    }

    /// Stock held in the store, or the policy default when no document exists yet.
    fn stored_availability(&self, item: &ShopItem) -> Result<Option<u32>, GameError> {
        let default = match item.policy() {
            StockPolicy::Unlimited => return Ok(None),
            StockPolicy::Limited(max) => max,
            StockPolicy::PlayerCrafted => 0,
        };
        let stock = self
            .store
            .get(ShopStock::COLLECTION, &self.shard.qualify(item.id))?
            .map(|doc| decode::<ShopStock>(&doc))
            .transpose()?;
        Ok(Some(stock.map_or(default, |s| s.current_stock)))
    }

    pub fn listing(&self) -> Result<Vec<ShopListing>, GameError> {
        self.listing_at(Utc::now())
    }

    /// Catalog with availability, cached per shard.
    pub fn listing_at(&self, now: DateTime<Utc>) -> Result<Vec<ShopListing>, GameError> {
        let key = format!("{}_listing_{}", SHOP_FAMILY, self.shard);
        let window = MaxAge::Within(Duration::minutes(self.windows.shop_ttl_minutes));
        if let Some(listing) = self.cache.get_at::<Vec<ShopListing>>(&key, window, now) {
            return Ok(listing);
        }
        let fetched: Result<Vec<ShopListing>, GameError> = CATALOG
            .iter()
            .map(|item| {
                Ok(ShopListing {
                    item: *item,
                    available: self.stored_availability(item)?,
                })
            })
            .collect();
        match fetched {
            Ok(listing) => {
                self.cache.set_at(&key, listing.clone(), now);
                Ok(listing)
            }
            Err(GameError::Store(e)) if e.is_transient() => {
                match self.cache.get_at::<Vec<ShopListing>>(&key, MaxAge::Unbounded, now) {
                    Some(listing) => {
                        warn!("shop listing on {} served stale: {}", self.shard, e);
                        crate::metrics::inc_stale_fallbacks();
                        Ok(listing)
                    }
                    None => Err(GameError::Store(e)),
                }
            }
            Err(e) => Err(e),
        }
    }

    pub fn purchase(&self, user_id: &str, item_id: &str, quantity: u32) -> Result<PurchaseReceipt, GameError> {
        self.purchase_at(user_id, item_id, quantity, Utc::now())
    }

    /// Buy `quantity` units. Funds and stock are checked against the cached
    /// view first, then again inside the transaction against fresh documents.
    pub fn purchase_at(
        &self,
        user_id: &str,
        item_id: &str,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<PurchaseReceipt, GameError> {
        let item = find_item(item_id).ok_or_else(|| GameError::UnknownItem(item_id.to_string()))?;
        let total = total_price(item, quantity)?;
        let player_id = player_doc_id(&self.shard, user_id);

        let player = super::load_player(self.store.as_ref(), &self.shard, user_id)?;
        check_funds(&player, item.currency, total)?;
        check_stock(item, self.stored_availability(item)?, quantity)?;

        let stock_id = self.shard.qualify(item.id);
        let shard = self.shard.as_str();
        let receipt = self.store.run_transaction(|tx| {
            let mut player = super::tx_player(tx, &player_id)?;
            check_funds(&player, item.currency, total)?;

            let stock_after = match item.policy() {
                StockPolicy::Unlimited => None,
                policy => {
                    let mut stock = match tx_get::<ShopStock>(tx, &stock_id)? {
                        Some(stock) => stock,
                        None => {
                            let max = match policy {
                                StockPolicy::Limited(max) => max,
                                _ => 0,
                            };
                            ShopStock::new(item.id, shard, max, max, now)
                        }
                    };
                    check_stock(item, Some(stock.current_stock), quantity)?;
                    stock.current_stock -= quantity;
                    stock.updated_at = now;
                    tx_put(tx, &stock_id, &stock)?;
                    Some(stock.current_stock)
                }
            };

            let (money_delta, pollid_delta) = match item.currency {
                PriceCurrency::Money => (-total, 0),
                PriceCurrency::Pollid => (0, -total),
            };
            player.money += money_delta;
            player.pollid += pollid_delta;
            player.add_item(item.id, quantity, false);
            player.updated_at = now;
            tx_put(tx, &player_id, &player)?;

            let entry = LedgerEntry::new(user_id, shard, LedgerKind::ShopPurchase, money_delta, pollid_delta, now)
                .with_memo(format!("{quantity} × {}", item.id));
            tx_put(tx, &entry.id, &entry)?;

            Ok::<_, GameError>(PurchaseReceipt {
                item_id: item.id.to_string(),
                quantity,
                total_price: total,
                currency: item.currency,
                money_after: player.money,
                pollid_after: player.pollid,
                stock_after,
            })
        })?;

        self.invalidate();
        info!(
            "{} bought {} × {} on {}",
            escape_log(user_id),
            quantity,
            item.id,
            self.shard
        );
        Ok(receipt)
    }

    pub fn supply_crafted(&self, user_id: &str, item_id: &str, quantity: u32) -> Result<SupplyReceipt, GameError> {
        self.supply_crafted_at(user_id, item_id, quantity, Utc::now())
    }

    /// A player hands crafted items to the shop and is paid the buyback share
    /// of the list price.
    pub fn supply_crafted_at(
        &self,
        user_id: &str,
        item_id: &str,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<SupplyReceipt, GameError> {
        let item = find_item(item_id).ok_or_else(|| GameError::UnknownItem(item_id.to_string()))?;
        if item.policy() != StockPolicy::PlayerCrafted {
            return Err(GameError::NotEligible(format!("{} is not player-crafted", item.id)));
        }
        let payout = total_price(item, quantity)? * self.economy.crafted_buyback_percent as i64 / 100;
        let player_id = player_doc_id(&self.shard, user_id);
        let stock_id = self.shard.qualify(item.id);
        let shard = self.shard.as_str();

        let receipt = self.store.run_transaction(|tx| {
            let mut player = super::tx_player(tx, &player_id)?;
            if !player.remove_item(item.id, quantity, true) {
                return Err(GameError::InsufficientStock {
                    item: item.id.to_string(),
                    needed: quantity,
                    available: player.item_quantity(item.id, true),
                });
            }
            player.money += payout;
            player.updated_at = now;

            let mut stock = tx_get::<ShopStock>(tx, &stock_id)?
                .unwrap_or_else(|| ShopStock::new(item.id, shard, 0, 0, now));
            stock.current_stock = stock.current_stock.saturating_add(quantity);
            stock.updated_at = now;

            tx_put(tx, &player_id, &player)?;
            tx_put(tx, &stock_id, &stock)?;
            let entry = LedgerEntry::new(user_id, shard, LedgerKind::CraftedSupply, payout, 0, now)
                .with_memo(format!("{quantity} × {}", item.id));
            tx_put(tx, &entry.id, &entry)?;

            Ok::<_, GameError>(SupplyReceipt {
                item_id: item.id.to_string(),
                quantity,
                payout,
                stock_after: stock.current_stock,
            })
        })?;

        self.invalidate();
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policies_follow_max_stock() {
        assert_eq!(find_item("taskulamp").map(|i| i.policy()), Some(StockPolicy::Unlimited));
        assert_eq!(find_item("kuulivest").map(|i| i.policy()), Some(StockPolicy::Limited(20)));
        assert_eq!(
            find_item("meisterdatud_kilp").map(|i| i.policy()),
            Some(StockPolicy::PlayerCrafted)
        );
        assert!(find_item("tundmatu").is_none());
    }

    #[test]
    fn zero_quantity_rejected() {
        let item = find_item("taskulamp").expect("item");
        assert!(matches!(total_price(item, 0), Err(GameError::InvalidAmount(_))));
        assert_eq!(total_price(item, 3).expect("price"), 120);
    }
}
