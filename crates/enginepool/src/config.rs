//! Pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Sizing and eviction knobs for a [`Pool`](crate::Pool).
///
/// All values are fixed at pool construction.
///
/// # Example
///
/// ```
/// use enginepool::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::default()
///     .with_min_idle(1)
///     .with_max_total(4)
///     .with_borrow_timeout(Some(Duration::from_secs(5)));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    /// Target number of warm idle workers maintained by the eviction cycle.
    pub min_idle: usize,

    /// Hard cap on live workers (idle + active).
    pub max_total: usize,

    /// Period of the background eviction scan.
    #[serde(with = "duration_millis")]
    pub eviction_interval: Duration,

    /// Minimum idle age before a worker becomes eligible for eviction.
    #[serde(with = "duration_millis")]
    pub idle_eviction_threshold: Duration,

    /// How long `borrow` waits for capacity.
    ///
    /// `None` waits indefinitely; `Some(Duration::ZERO)` fails immediately
    /// when the pool is exhausted.
    #[serde(with = "option_duration_millis")]
    pub borrow_timeout: Option<Duration>,

    /// How long `shutdown` waits for active workers to come back.
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_idle: 1,
            max_total: 4,
            eviction_interval: Duration::from_secs(30),
            idle_eviction_threshold: Duration::from_secs(300),
            borrow_timeout: Some(Duration::from_secs(30)),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the warm idle target
    pub fn with_min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    /// Set the hard cap on live workers
    pub fn with_max_total(mut self, max_total: usize) -> Self {
        self.max_total = max_total.max(1);
        self
    }

    /// Set the eviction scan period
    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    /// Set the minimum idle age before eviction eligibility
    pub fn with_idle_eviction_threshold(mut self, threshold: Duration) -> Self {
        self.idle_eviction_threshold = threshold;
        self
    }

    /// Set the borrow timeout (`None` = wait indefinitely)
    pub fn with_borrow_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.borrow_timeout = timeout;
        self
    }

    /// Set the graceful shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_total == 0 {
            return Err(PoolError::InvalidConfig(
                "max_total must be at least 1".into(),
            ));
        }
        if self.min_idle > self.max_total {
            return Err(PoolError::InvalidConfig(
                "min_idle must not exceed max_total".into(),
            ));
        }
        if self.eviction_interval.is_zero() {
            return Err(PoolError::InvalidConfig(
                "eviction_interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde support for Option<Duration> as milliseconds
pub(crate) mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => d.as_millis().serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
