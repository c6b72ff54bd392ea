//! Dataset catalog types and the metadata shapes returned by the dataset endpoints.

use serde::Serialize;

/// Row as returned by the warehouse: column name to JSON value, in column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Classification of a dataset.
///
/// A datamart is a set of related tables that are exported together,
/// a table dataset is backed by a single table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetType {
    Datamart,
    Table,
}

/// Descriptive fields shown on the datasets page.
#[derive(Debug, Clone, Serialize)]
pub struct DisplayMetadata {
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub tags: &'static [&'static str],
}

/// Static description of a public dataset.
///
/// # Invariants
///
/// - `related_tables` is never empty and contains `main_table`
/// - every table name is a plain SQL identifier
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetDescriptor {
    pub id: &'static str,

    #[serde(rename = "type")]
    pub dataset_type: DatasetType,

    pub main_table: &'static str,

    pub related_tables: &'static [&'static str],

    #[serde(flatten)]
    pub display: DisplayMetadata,
}

impl DatasetDescriptor {
    pub fn is_datamart(&self) -> bool {
        self.dataset_type == DatasetType::Datamart
    }
}

/// Column description read from `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

/// Live statistics for one warehouse table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStats {
    pub table_name: String,
    pub row_count: i64,
    pub column_count: usize,
    pub columns: Vec<ColumnInfo>,
}

impl TableStats {
    pub fn new(table_name: impl Into<String>, row_count: i64, columns: Vec<ColumnInfo>) -> Self {
        Self {
            table_name: table_name.into(),
            row_count,
            column_count: columns.len(),
            columns,
        }
    }
}

/// Entry of `GET /api/datasets`.
///
/// `row_count` and `column_count` describe the main table and are zero when
/// the warehouse could not be reached.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSummary {
    #[serde(flatten)]
    pub descriptor: DatasetDescriptor,

    pub table_count: usize,

    pub row_count: i64,

    pub column_count: usize,
}
