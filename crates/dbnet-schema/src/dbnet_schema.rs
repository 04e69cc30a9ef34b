//! Schema-metadata cache
//!
//! Reads table and column metadata from the store first and only goes to the
//! live database on a miss or when the caller asks for a refresh. A refresh
//! replaces exactly the key prefix it covers, then the answer is re-read from
//! the store so hit and miss paths return the same shape.

mod cache;

pub use cache::SchemaCache;

#[cfg(test)]
mod tests;
