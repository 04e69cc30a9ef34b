use std::time::Duration;

/// Tunables of the query broker
#[derive(Debug, Clone)]
pub struct QueryBrokerConfig {
    /// Page size used when a submission leaves `limit` at 0
    pub default_limit: usize,
    /// Rows kept in the persisted history record
    pub history_row_cap: usize,
    /// Idle time after which a live query is evicted
    pub query_ttl: Duration,
    /// How long a waiting submit blocks before answering "still running"
    pub continue_after: Duration,
    pub sweep_interval: Duration,
}

impl Default for QueryBrokerConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            history_row_cap: 100,
            query_ttl: Duration::from_secs(10 * 60),
            continue_after: Duration::from_secs(90),
            sweep_interval: Duration::from_secs(30),
        }
    }
}
