//! Extract/load job broker
//!
//! Jobs follow the same registry discipline as queries: one worker per
//! submission, a completion signal raced against the continuation ticker,
//! and continuation by id. The data movement itself belongs to a
//! [`TaskEngine`](dbnet_core::TaskEngine); [`CursorCopyEngine`] is the
//! engine shipped with the server.

mod broker;
mod config;
mod copy;
mod live;
mod request;

pub use broker::JobBroker;
pub use config::JobBrokerConfig;
pub use copy::{CopyMode, CursorCopyEngine};
pub use request::{JobConfigSummary, JobRequest, JobSnapshot};

#[cfg(test)]
mod tests;
