//! dbt RPC helper processes
//!
//! One `dbt-rpc` server runs per (project dir, profile, target). The broker
//! launches it on first use, probes it until it answers, recycles it after
//! an idle period and forwards JSON-RPC requests to it. It also implements
//! [`SqlCompiler`](dbnet_core::SqlCompiler) so the query broker can compile
//! templated SQL through it.

mod backoff;
mod broker;
mod config;
mod launcher;
mod rpc;

pub use backoff::BackoffStrategy;
pub use broker::DbtBroker;
pub use config::DbtBrokerConfig;
pub use launcher::{Launcher, ProcessLauncher};
pub use rpc::{RpcRequest, RpcResponse};

#[cfg(all(test, unix))]
mod tests;
