//! DbNet Query Broker
//!
//! Owns the lifecycle of SQL submissions: a live registry keyed by query id,
//! one worker per execution, page-at-a-time delivery from streaming cursors,
//! and the long-poll continuation that lets a client pick up a statement that
//! outlived its HTTP request.
//!
//! # Lifecycle
//!
//! `submitted -> {completed | errorred} -> fetched`, with `cancelled`
//! reachable until the query is evicted. A query leaves the registry when it
//! is cancelled, resubmitted under the same id, or idle past the TTL.

mod broker;
mod config;
mod envelope;
mod field_stats;
mod live;
mod statements;

pub use broker::QueryBroker;
pub use config::QueryBrokerConfig;
pub use envelope::SecondaryRequest;
pub use statements::split_statements;

#[cfg(test)]
mod tests;
