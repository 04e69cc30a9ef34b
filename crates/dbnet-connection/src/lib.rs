//! DbNet Connection - connection discovery and the connection registry
//!
//! Logical connection names come from environment variables holding URLs
//! and from the `connections:` section of `env.yaml` in the DbNet home
//! directory. The [`ConnectionRegistry`] turns a name into a live driver
//! handle, carrying negotiated session properties across connects.

mod discovery;
mod drivers;
mod home;
mod registry;

pub use discovery::{EnvFile, config_from_url, discover_env_vars, load_env_file};
pub use drivers::DriverRegistry;
pub use home::DbnetHome;
pub use registry::{ConnectionRegistry, normalize_name};

#[cfg(test)]
mod tests;
