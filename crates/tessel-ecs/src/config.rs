//! World construction settings.

use serde::{Deserialize, Serialize};

use crate::EcsError;

/// Upper bound for either up-front capacity. Larger values are rejected at
/// parse time instead of failing inside the allocator.
pub const MAX_INITIAL_CAPACITY: usize = 1 << 24;

/// Sizing knobs for a [`World`](crate::world::World).
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use tessel_ecs::config::WorldConfig;
///
/// let config = WorldConfig::from_json_str(r#"{ "initial_row_capacity": 256 }"#).unwrap();
/// assert_eq!(config.initial_row_capacity, 256);
/// assert_eq!(config.initial_entity_capacity, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Rows pre-allocated in every column of a newly created archetype.
    /// Default: 64.
    pub initial_row_capacity: usize,

    /// Entity slots reserved up front. Default: 0.
    pub initial_entity_capacity: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            initial_row_capacity: 64,
            initial_entity_capacity: 0,
        }
    }
}

impl WorldConfig {
    /// Parse a config from JSON; missing fields take their defaults.
    ///
    /// The parsed values are checked with [`validate`](Self::validate).
    pub fn from_json_str(json: &str) -> Result<Self, EcsError> {
        let config: Self = serde_json::from_str(json).map_err(|e| EcsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject capacities above [`MAX_INITIAL_CAPACITY`].
    pub fn validate(&self) -> Result<(), EcsError> {
        for (field, value) in [
            ("initial_row_capacity", self.initial_row_capacity),
            ("initial_entity_capacity", self.initial_entity_capacity),
        ] {
            if value > MAX_INITIAL_CAPACITY {
                return Err(EcsError::Config(format!(
                    "{field} is {value}, the limit is {MAX_INITIAL_CAPACITY}"
                )));
            }
        }
        Ok(())
    }
}
