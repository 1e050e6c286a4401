use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Record;

pub const PLAYER_SCHEMA_VERSION: u8 = 1;
pub const CRIME_SCHEMA_VERSION: u8 = 1;
pub const STOCK_SCHEMA_VERSION: u8 = 1;
pub const LEDGER_SCHEMA_VERSION: u8 = 1;
pub const JACKPOT_SCHEMA_VERSION: u8 = 1;

/// Course every officer must pass before assignment and leaderboard entry.
pub const GRADUATION_COURSE: &str = "basic_training";

/// Rank inside the police hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    /// Cadet still in the academy.
    Kadett,
    /// Probationary auxiliary officer.
    Abipolitseinik,
    Patrullpolitseinik,
    Vanempatrullpolitseinik,
    Uurija,
    Grupijuht,
    Talitusejuht,
    Osakonnajuht,
}

impl Position {
    /// Whether an officer in this position is counted as department staff.
    pub fn counts_toward_headcount(self) -> bool {
        !matches!(self, Position::Kadett | Position::Abipolitseinik)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub item_id: String,
    pub quantity: u32,
    /// Made by the player; may be supplied to the shop.
    #[serde(default)]
    pub crafted: bool,
}

/// Hourly slot machine allowance plus lifetime casino statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CasinoPlaySession {
    pub plays_used: u32,
    pub last_play: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_spins: u64,
    #[serde(default)]
    pub total_winnings: i64,
    #[serde(default)]
    pub biggest_win: i64,
}

impl CasinoPlaySession {
    /// Plays used in the hour containing `now`. A stored count from any other
    /// UTC hour or date reads as zero.
    pub fn effective_plays(&self, now: DateTime<Utc>) -> u32 {
        match self.last_play {
            Some(last) if same_hour(last, now) => self.plays_used,
            _ => 0,
        }
    }
}

fn same_hour(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.date_naive() == b.date_naive() && a.hour() == b.hour()
}

/// One player on one shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub user_id: String,
    pub username: String,
    pub shard: String,
    pub level: u32,
    pub experience: u64,
    pub reputation: i64,
    pub money: i64,
    pub pollid: i64,
    #[serde(default)]
    pub prefecture: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub is_vip: bool,
    #[serde(default)]
    pub admin_permissions: Vec<String>,
    #[serde(default)]
    pub exclude_from_leaderboard: bool,
    #[serde(default)]
    pub completed_courses: Vec<String>,
    #[serde(default)]
    pub inventory: Vec<InventoryItem>,
    #[serde(default)]
    pub casino: CasinoPlaySession,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl PlayerRecord {
    pub fn new(user_id: &str, username: &str, shard: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            username: username.to_string(),
            shard: shard.to_string(),
            level: 1,
            experience: 0,
            reputation: 0,
            money: 0,
            pollid: 0,
            prefecture: None,
            department: None,
            unit: None,
            position: Some(Position::Kadett),
            is_vip: false,
            admin_permissions: Vec::new(),
            exclude_from_leaderboard: false,
            completed_courses: Vec::new(),
            inventory: Vec::new(),
            casino: CasinoPlaySession::default(),
            created_at: now,
            updated_at: now,
            schema_version: PLAYER_SCHEMA_VERSION,
        }
    }

    pub fn is_graduated(&self) -> bool {
        self.completed_courses.iter().any(|c| c == GRADUATION_COURSE)
    }

    /// Graduated, assigned to a department and holding a staff position.
    pub fn is_department_staff(&self) -> bool {
        self.is_graduated()
            && self.department.is_some()
            && self.position.is_some_and(Position::counts_toward_headcount)
    }

    pub fn item_quantity(&self, item_id: &str, crafted: bool) -> u32 {
        self.inventory
            .iter()
            .filter(|i| i.item_id == item_id && i.crafted == crafted)
            .map(|i| i.quantity)
            .sum()
    }

    pub fn add_item(&mut self, item_id: &str, quantity: u32, crafted: bool) {
        match self
            .inventory
            .iter_mut()
            .find(|i| i.item_id == item_id && i.crafted == crafted)
        {
            Some(stack) => stack.quantity = stack.quantity.saturating_add(quantity),
            None => self.inventory.push(InventoryItem {
                item_id: item_id.to_string(),
                quantity,
                crafted,
            }),
        }
    }

    /// Remove `quantity` units; returns false and changes nothing if the player holds fewer.
    pub fn remove_item(&mut self, item_id: &str, quantity: u32, crafted: bool) -> bool {
        if self.item_quantity(item_id, crafted) < quantity {
            return false;
        }
        let mut remaining = quantity;
        for stack in self
            .inventory
            .iter_mut()
            .filter(|i| i.item_id == item_id && i.crafted == crafted)
        {
            let taken = remaining.min(stack.quantity);
            stack.quantity -= taken;
            remaining -= taken;
        }
        self.inventory.retain(|i| i.quantity > 0);
        true
    }
}

impl Record for PlayerRecord {
    const COLLECTION: &'static str = "players";
    const ENTITY: &'static str = "player";
    const SCHEMA_VERSION: u8 = PLAYER_SCHEMA_VERSION;

    fn schema_version(&self) -> u8 {
        self.schema_version
    }

    fn validate(&self) -> Result<(), String> {
        if self.username.trim().is_empty() {
            return Err("empty username".into());
        }
        if self.level == 0 {
            return Err("level must be at least 1".into());
        }
        if self.money < 0 || self.pollid < 0 {
            return Err(format!(
                "negative balance (money {}, pollid {})",
                self.money, self.pollid
            ));
        }
        Ok(())
    }
}

/// Crime index of one department on one shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentCrimeState {
    pub department: String,
    pub prefecture: String,
    pub shard: String,
    /// Percentage, always within 0..=100.
    pub crime_level: f64,
    pub last_daily_increase: DateTime<Utc>,
    /// Start of the current monthly cycle.
    pub monthly_reset_at: DateTime<Utc>,
    pub work_hours_this_cycle: f64,
    pub updated_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl DepartmentCrimeState {
    pub fn new(
        department: &str,
        prefecture: &str,
        shard: &str,
        initial_level: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            department: department.to_string(),
            prefecture: prefecture.to_string(),
            shard: shard.to_string(),
            crime_level: initial_level.clamp(0.0, 100.0),
            last_daily_increase: now,
            monthly_reset_at: now,
            work_hours_this_cycle: 0.0,
            updated_at: now,
            schema_version: CRIME_SCHEMA_VERSION,
        }
    }

    /// True once `now` falls in a later UTC calendar month than the cycle start.
    pub fn cycle_expired(&self, now: DateTime<Utc>) -> bool {
        (now.year(), now.month()) > (self.monthly_reset_at.year(), self.monthly_reset_at.month())
    }

    pub fn increased_today(&self, now: DateTime<Utc>) -> bool {
        self.last_daily_increase.date_naive() >= now.date_naive()
    }
}

impl Record for DepartmentCrimeState {
    const COLLECTION: &'static str = "departmentCrime";
    const ENTITY: &'static str = "department crime state";
    const SCHEMA_VERSION: u8 = CRIME_SCHEMA_VERSION;

    fn schema_version(&self) -> u8 {
        self.schema_version
    }

    fn validate(&self) -> Result<(), String> {
        if !self.crime_level.is_finite() || !(0.0..=100.0).contains(&self.crime_level) {
            return Err(format!("crime level {} outside 0..=100", self.crime_level));
        }
        if !self.work_hours_this_cycle.is_finite() || self.work_hours_this_cycle < 0.0 {
            return Err(format!("invalid work hours {}", self.work_hours_this_cycle));
        }
        Ok(())
    }
}

/// Mutable stock of a limited or player-crafted catalog item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopStock {
    pub item_id: String,
    pub shard: String,
    pub current_stock: u32,
    /// Zero marks a player-crafted item.
    pub max_stock: u32,
    pub updated_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl ShopStock {
    pub fn new(item_id: &str, shard: &str, current_stock: u32, max_stock: u32, now: DateTime<Utc>) -> Self {
        Self {
            item_id: item_id.to_string(),
            shard: shard.to_string(),
            current_stock,
            max_stock,
            updated_at: now,
            schema_version: STOCK_SCHEMA_VERSION,
        }
    }
}

impl Record for ShopStock {
    const COLLECTION: &'static str = "shopStock";
    const ENTITY: &'static str = "shop stock";
    const SCHEMA_VERSION: u8 = STOCK_SCHEMA_VERSION;

    fn schema_version(&self) -> u8 {
        self.schema_version
    }

    fn validate(&self) -> Result<(), String> {
        if self.max_stock > 0 && self.current_stock > self.max_stock {
            return Err(format!(
                "stock {} above maximum {}",
                self.current_stock, self.max_stock
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    PollidConversion,
    CasinoSpin,
    ShopPurchase,
    CraftedSupply,
    WorkShift,
}

/// Audit row written in the same transaction as every balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub user_id: String,
    pub shard: String,
    pub kind: LedgerKind,
    pub money_delta: i64,
    pub pollid_delta: i64,
    #[serde(default)]
    pub memo: String,
    pub created_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl LedgerEntry {
    pub fn new(
        user_id: &str,
        shard: &str,
        kind: LedgerKind,
        money_delta: i64,
        pollid_delta: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            shard: shard.to_string(),
            kind,
            money_delta,
            pollid_delta,
            memo: String::new(),
            created_at: now,
            schema_version: LEDGER_SCHEMA_VERSION,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = memo.into();
        self
    }
}

impl Record for LedgerEntry {
    const COLLECTION: &'static str = "ledger";
    const ENTITY: &'static str = "ledger entry";
    const SCHEMA_VERSION: u8 = LEDGER_SCHEMA_VERSION;

    fn schema_version(&self) -> u8 {
        self.schema_version
    }
}

/// Progressive slot machine pot of one shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CasinoJackpot {
    pub shard: String,
    pub amount: i64,
    pub last_winner: Option<String>,
    pub last_win: Option<DateTime<Utc>>,
    pub schema_version: u8,
}

impl CasinoJackpot {
    pub fn seeded(shard: &str, amount: i64) -> Self {
        Self {
            shard: shard.to_string(),
            amount,
            last_winner: None,
            last_win: None,
            schema_version: JACKPOT_SCHEMA_VERSION,
        }
    }
}

impl Record for CasinoJackpot {
    const COLLECTION: &'static str = "casinoJackpot";
    const ENTITY: &'static str = "casino jackpot";
    const SCHEMA_VERSION: u8 = JACKPOT_SCHEMA_VERSION;

    fn schema_version(&self) -> u8 {
        self.schema_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn casino_plays_reset_on_new_hour_or_day() {
        let last = Utc.with_ymd_and_hms(2026, 3, 14, 10, 5, 0).unwrap();
        let session = CasinoPlaySession {
            plays_used: 4,
            last_play: Some(last),
            ..Default::default()
        };
        let same_hour = Utc.with_ymd_and_hms(2026, 3, 14, 10, 59, 59).unwrap();
        let next_hour = Utc.with_ymd_and_hms(2026, 3, 14, 11, 0, 0).unwrap();
        let next_day = Utc.with_ymd_and_hms(2026, 3, 15, 10, 5, 0).unwrap();
        assert_eq!(session.effective_plays(same_hour), 4);
        assert_eq!(session.effective_plays(next_hour), 0);
        assert_eq!(session.effective_plays(next_day), 0);
    }

    #[test]
    fn abipolitseinik_is_not_staff() {
        let now = Utc::now();
        let mut player = PlayerRecord::new("u1", "Mari", "main", now);
        player.completed_courses.push(GRADUATION_COURSE.to_string());
        player.department = Some("Tartu".to_string());
        player.position = Some(Position::Abipolitseinik);
        assert!(!player.is_department_staff());
        player.position = Some(Position::Patrullpolitseinik);
        assert!(player.is_department_staff());
        player.position = None;
        assert!(!player.is_department_staff());
    }

    #[test]
    fn remove_item_is_all_or_nothing() {
        let mut player = PlayerRecord::new("u1", "Mari", "main", Utc::now());
        player.add_item("vest", 2, true);
        assert!(!player.remove_item("vest", 3, true));
        assert_eq!(player.item_quantity("vest", true), 2);
        assert!(player.remove_item("vest", 2, true));
        assert!(player.inventory.is_empty());
    }

    #[test]
    fn crime_cycle_expires_on_month_change() {
        let start = Utc.with_ymd_and_hms(2026, 1, 31, 23, 0, 0).unwrap();
        let state = DepartmentCrimeState::new("Tartu", "Lõuna prefektuur", "main", 50.0, start);
        assert!(!state.cycle_expired(Utc.with_ymd_and_hms(2026, 1, 31, 23, 59, 0).unwrap()));
        assert!(state.cycle_expired(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()));
        assert!(state.cycle_expired(Utc.with_ymd_and_hms(2027, 1, 2, 0, 0, 0).unwrap()));
    }
}
