//! Shard (game server) identity and id qualification.

use std::fmt;

/// An isolated game world. A player's progress is independent per shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardId {
    id: String,
    is_default: bool,
}

impl ShardId {
    pub fn new(id: &str, default_shard: &str) -> Self {
        Self {
            id: id.to_string(),
            is_default: id == default_shard,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Document id for `base_id` on this shard: the raw id on the default
    /// shard, `{base_id}_{shard}` everywhere else.
    pub fn qualify(&self, base_id: &str) -> String {
        if self.is_default {
            base_id.to_string()
        } else {
            format!("{}_{}", base_id, self.id)
        }
    }

    /// Cache key for a view family on this shard.
    pub fn cache_key(&self, family: &str) -> String {
        format!("{}_{}", family, self.id)
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_shard_keeps_raw_ids() {
        let main = ShardId::new("main", "main");
        assert_eq!(main.qualify("user42"), "user42");
        let alpha = ShardId::new("alpha", "main");
        assert_eq!(alpha.qualify("user42"), "user42_alpha");
        assert_eq!(alpha.cache_key("department_aggregates"), "department_aggregates_alpha");
    }
}
