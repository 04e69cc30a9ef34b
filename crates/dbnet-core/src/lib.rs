//! DbNet Core - Core abstractions and traits for the execution broker
//!
//! This crate provides the fundamental traits and types that all other
//! DbNet crates depend on. It defines:
//!
//! - `DatabaseDriver` - Trait for database driver implementations
//! - `Connection` / `RowCursor` - Live connections and streaming cursors
//! - `SchemaIntrospection` - Trait for schema inspection
//! - `TemplateCatalog` - Dialect-specific metadata and analysis SQL
//! - `TaskEngine` / `Task` - The external extract/load engine seam
//! - `SqlCompiler` - Templated SQL compilation (dbt)
//! - Common types like `Value`, `Row`, `ColumnMeta`, etc.

mod compile;
mod connection;
mod driver;
mod error;
mod schema;
pub mod task;
mod template;
mod types;

pub use compile::*;
pub use connection::*;
pub use driver::*;
pub use error::*;
pub use schema::*;
pub use task::{ExecStatus, SourceConfig, TargetConfig, Task, TaskConfig, TaskEngine};
pub use template::*;
pub use types::*;

pub use tokio_util::sync::CancellationToken;
