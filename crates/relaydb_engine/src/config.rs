//! Replica configuration.

use std::time::Duration;

/// Retry backoff tuning for the resilient transport.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling on the delay between retries.
    pub max_delay: Duration,
}

impl BackoffConfig {
    /// The delay to sleep after the given zero-based failed attempt.
    ///
    /// Doubles per attempt from `base_delay` up to `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
        }
    }
}

/// Configuration for a replica.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Name of the local database, stamped on outgoing batches.
    pub db_name: String,
    /// Human-readable name of this node, stamped on outgoing batches.
    pub node_name: String,
    /// The synced tables, in pull order. Must match the server's schema.
    pub schema: Vec<String>,
    /// How often the catch-up feed is polled while synced.
    pub catchup_interval: Duration,
    /// Most batches carried by one `send` request while draining; a large
    /// backlog goes out in groups of this size.
    pub send_group: usize,
    /// Retry backoff for remote requests.
    pub backoff: BackoffConfig,
}

impl ReplicaConfig {
    /// Creates a configuration with default tuning.
    pub fn new(db_name: impl Into<String>, schema: Vec<String>) -> Self {
        Self {
            db_name: db_name.into(),
            node_name: "unnamed".to_string(),
            schema,
            catchup_interval: Duration::from_secs(10),
            send_group: 16,
            backoff: BackoffConfig::default(),
        }
    }

    /// Sets the node name.
    pub fn with_node_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = name.into();
        self
    }

    /// Sets the catch-up polling interval.
    pub fn with_catchup_interval(mut self, interval: Duration) -> Self {
        self.catchup_interval = interval;
        self
    }

    /// Sets the drain group size.
    pub fn with_send_group(mut self, send_group: usize) -> Self {
        self.send_group = send_group.max(1);
        self
    }

    /// Sets the retry backoff.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_to_a_ceiling() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(8));
        assert_eq!(backoff.delay(4), Duration::from_secs(16));
        assert_eq!(backoff.delay(10), Duration::from_secs(16));
        // Shift overflow saturates instead of wrapping.
        assert_eq!(backoff.delay(40), Duration::from_secs(16));
    }

    #[test]
    fn builder() {
        let config = ReplicaConfig::new("app", vec!["users".into()])
            .with_node_name("laptop")
            .with_catchup_interval(Duration::from_secs(1))
            .with_send_group(0);
        assert_eq!(config.node_name, "laptop");
        assert_eq!(config.catchup_interval, Duration::from_secs(1));
        // A zero group would stall the drain; it is clamped to one.
        assert_eq!(config.send_group, 1);
    }
}
