use std::time::Duration;

#[derive(Debug, Clone)]
pub struct JobBrokerConfig {
    /// How long a waiting submission blocks before answering "still running"
    pub continue_after: Duration,
    /// How long a finished job stays live so a last status poll still finds it
    pub eviction_grace: Duration,
}

impl Default for JobBrokerConfig {
    fn default() -> Self {
        Self {
            continue_after: Duration::from_secs(90),
            eviction_grace: Duration::from_secs(10),
        }
    }
}
