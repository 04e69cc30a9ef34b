use std::time::Duration;

use crate::BackoffStrategy;

#[derive(Debug, Clone)]
pub struct DbtBrokerConfig {
    /// Helper executable, resolved through `PATH`
    pub program: String,
    /// A helper unused for this long is stopped
    pub idle_timeout: Duration,
    /// Status calls made after launch before giving up
    pub probe_attempts: u32,
    /// Delay between status calls
    pub probe_backoff: BackoffStrategy,
    /// Per-request timeout for RPC calls
    pub request_timeout: Duration,
}

impl Default for DbtBrokerConfig {
    fn default() -> Self {
        Self {
            program: "dbt-rpc".to_string(),
            idle_timeout: Duration::from_secs(60 * 60),
            probe_attempts: 5,
            probe_backoff: BackoffStrategy::new(250, 2_000),
            request_timeout: Duration::from_secs(90),
        }
    }
}
