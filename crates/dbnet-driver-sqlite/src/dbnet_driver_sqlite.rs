//! SQLite database driver implementation

mod connection;
mod cursor;
mod driver;
mod templates;

pub use connection::{SqliteConnection, SqliteTransaction};
pub use cursor::SqliteCursor;
pub use driver::SqliteDriver;
pub use templates::sqlite_templates;

#[cfg(test)]
mod tests;
