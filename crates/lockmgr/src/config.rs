//! Sizing of the bucket and partition tables.

pub const DEFAULT_NUM_BUCKETS: usize = 128;
pub const DEFAULT_NUM_PARTITIONS: usize = 32;

const ENV_NUM_BUCKETS: &str = "LOCKMGR_NUM_BUCKETS";
const ENV_NUM_PARTITIONS: &str = "LOCKMGR_NUM_PARTITIONS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockManagerConfig {
    /// Resources are spread over this many bucket mutexes.
    pub num_buckets: usize,
    /// Lockers are spread over this many partition mutexes. Must be a power
    /// of two.
    pub num_partitions: usize,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            num_buckets: DEFAULT_NUM_BUCKETS,
            num_partitions: DEFAULT_NUM_PARTITIONS,
        }
    }
}

impl LockManagerConfig {
    /// Defaults, overridden by `LOCKMGR_NUM_BUCKETS` and
    /// `LOCKMGR_NUM_PARTITIONS` when set.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut config = Self::default();
        if let Some(value) = lookup(ENV_NUM_BUCKETS) {
            config.num_buckets = parse_count(ENV_NUM_BUCKETS, &value)?;
        }
        if let Some(value) = lookup(ENV_NUM_PARTITIONS) {
            config.num_partitions = parse_count(ENV_NUM_PARTITIONS, &value)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.num_buckets == 0 {
            return Err("num_buckets must be greater than zero".to_string());
        }
        if self.num_partitions == 0 {
            return Err("num_partitions must be greater than zero".to_string());
        }
        if !self.num_partitions.is_power_of_two() {
            return Err(format!(
                "num_partitions must be a power of two, got {}",
                self.num_partitions
            ));
        }
        Ok(())
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize, String> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("invalid {key}={value:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = LockManagerConfig::default();
        assert_eq!(config.num_buckets, 128);
        assert_eq!(config.num_partitions, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_sizes() {
        let zero_buckets = LockManagerConfig {
            num_buckets: 0,
            ..Default::default()
        };
        assert!(zero_buckets.validate().is_err());

        let odd_partitions = LockManagerConfig {
            num_partitions: 12,
            ..Default::default()
        };
        let err = odd_partitions.validate().unwrap_err();
        assert!(err.contains("power of two"), "{err}");
    }

    #[test]
    fn reads_overrides() {
        let config = LockManagerConfig::from_lookup(|key| match key {
            ENV_NUM_BUCKETS => Some("7".to_string()),
            ENV_NUM_PARTITIONS => Some(" 4 ".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.num_buckets, 7);
        assert_eq!(config.num_partitions, 4);

        let unset = LockManagerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(unset, LockManagerConfig::default());
    }

    #[test]
    fn reports_unparsable_values() {
        let err = LockManagerConfig::from_lookup(|key| {
            (key == ENV_NUM_BUCKETS).then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(err.contains(ENV_NUM_BUCKETS), "{err}");
    }
}
