//! Experience curve. Going from level `k` to `k + 1` costs
//! `round(100 × 1.09^(k − 1))` experience; levels start at 1 with zero experience.

pub const BASE_LEVEL_COST: f64 = 100.0;
pub const LEVEL_GROWTH: f64 = 1.09;

/// Experience needed to advance from `level` to `level + 1`.
pub fn exp_to_next_level(level: u32) -> u64 {
    let exponent = level.saturating_sub(1) as i32;
    (BASE_LEVEL_COST * LEVEL_GROWTH.powi(exponent)).round() as u64
}

/// Cumulative experience at which `level` is reached.
pub fn exp_for_level(level: u32) -> u64 {
    (1..level.max(1)).fold(0u64, |total, k| total.saturating_add(exp_to_next_level(k)))
}

/// The unique level whose experience band contains `experience`.
pub fn level_from_exp(experience: u64) -> u32 {
    let mut level = 1u32;
    let mut threshold = 0u64;
    loop {
        let next = threshold.saturating_add(exp_to_next_level(level));
        if experience < next || next == threshold {
            return level;
        }
        threshold = next;
        level += 1;
    }
}

/// Where a player stands within their current level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelProgress {
    pub level: u32,
    pub into_level: u64,
    pub level_span: u64,
}

impl LevelProgress {
    pub fn from_exp(experience: u64) -> Self {
        let level = level_from_exp(experience);
        Self {
            level,
            into_level: experience - exp_for_level(level),
            level_span: exp_to_next_level(level),
        }
    }

    pub fn percent(&self) -> f64 {
        if self.level_span == 0 {
            return 100.0;
        }
        self.into_level as f64 * 100.0 / self.level_span as f64
    }
}
