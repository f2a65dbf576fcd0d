//! Configuration for the sync server.

/// Configuration for the streaming bulk-pull producer.
#[derive(Debug, Clone)]
pub struct PullConfig {
    /// Memory ceiling for a single encoded row batch, in bytes.
    pub max_batch_bytes: usize,
    /// Minimum rows per batch, regardless of row size.
    pub min_batch_rows: usize,
    /// Maximum rows per batch, regardless of row size.
    pub max_batch_rows: usize,
    /// Rows requested for the first batch of each table, before the
    /// observed row size can inform the adaptive size.
    pub initial_batch_rows: usize,
}

impl PullConfig {
    /// Sets the per-batch memory ceiling.
    pub fn with_max_batch_bytes(mut self, bytes: usize) -> Self {
        self.max_batch_bytes = bytes;
        self
    }

    /// Sets the initial per-table batch size.
    pub fn with_initial_batch_rows(mut self, rows: usize) -> Self {
        self.initial_batch_rows = rows;
        self
    }

    /// Clamps an adaptive row count to the configured floor and ceiling.
    pub fn clamp_rows(&self, rows: usize) -> usize {
        rows.clamp(self.min_batch_rows, self.max_batch_rows)
    }
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            max_batch_bytes: 50 * 1024 * 1024,
            min_batch_rows: 100,
            max_batch_rows: 10_000,
            initial_batch_rows: 500,
        }
    }
}

/// Configuration for the sync server.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Bulk-pull tuning.
    pub pull: PullConfig,
}

impl ServerConfig {
    /// Sets the pull configuration.
    pub fn with_pull(mut self, pull: PullConfig) -> Self {
        self.pull = pull;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PullConfig::default();
        assert_eq!(config.max_batch_bytes, 50 * 1024 * 1024);
        assert_eq!(config.min_batch_rows, 100);
        assert_eq!(config.max_batch_rows, 10_000);
    }

    #[test]
    fn clamp_respects_floor_and_ceiling() {
        let config = PullConfig::default();
        assert_eq!(config.clamp_rows(5), 100);
        assert_eq!(config.clamp_rows(5_000), 5_000);
        assert_eq!(config.clamp_rows(1_000_000), 10_000);
    }

    #[test]
    fn builder() {
        let config =
            ServerConfig::default().with_pull(PullConfig::default().with_max_batch_bytes(1024));
        assert_eq!(config.pull.max_batch_bytes, 1024);
    }
}
