//! Schema introspection trait and metadata types

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Live schema introspection against a connected database
#[async_trait]
pub trait SchemaIntrospection: Send + Sync {
    /// List all databases
    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>>;

    /// List all schemas in the current database
    async fn list_schemas(&self) -> Result<Vec<SchemaInfo>>;

    /// List all tables in a schema
    async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<TableInfo>>;

    /// List all views in a schema
    async fn list_views(&self, schema: Option<&str>) -> Result<Vec<TableInfo>>;

    /// Get columns for a table or view
    async fn get_columns(&self, schema: Option<&str>, table: &str) -> Result<Vec<ColumnInfo>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub name: String,
}

/// Table or view information (basic)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub schema: Option<String>,
    pub name: String,
    pub table_type: TableType,
}

impl TableInfo {
    pub fn is_view(&self) -> bool {
        self.table_type == TableType::View
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableType {
    Table,
    View,
}

/// Column information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ColumnInfo {
    pub name: String,
    /// 1-based position
    pub ordinal: usize,
    pub data_type: String,
    pub nullable: bool,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
}
