use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::schema::{ColumnDef, DataType};
use crate::error::{SiltError, SiltResult};
use crate::storage::StorageEngine;

/// Every key below this prefix belongs to the catalog and is invisible to
/// user SQL.
pub const CATALOG_PREFIX: &str = "__catalog__";

const TABLES_PREFIX: &str = "__catalog__tables:";
const COLUMNS_PREFIX: &str = "__catalog__columns:";
const INDEXES_PREFIX: &str = "__catalog__indexes:";
const STATS_PREFIX: &str = "__catalog__stats:";

/// Logical-deletion sentinel. Entries are never physically removed; the
/// payload is replaced instead.
pub const DELETED_SENTINEL: &str = "DELETED";

/// End-of-prefix bound for range scans: '~' (0x7e) sorts after every
/// character that can appear in an identifier or digit suffix.
const PREFIX_SCAN_END: char = '~';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStatistics {
    pub row_count: u64,
}

/// Persistent schema metadata, stored as reserved-prefix keys in the same
/// B+-tree as the table data.
#[derive(Debug)]
pub struct Catalog {
    engine: Arc<StorageEngine>,
}

impl Catalog {
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        Catalog { engine }
    }

    pub fn create_table(&self, table: &str, columns: &[ColumnDef]) -> SiltResult<()> {
        if self.table_exists(table)? {
            return Err(SiltError::Schema(format!(
                "table '{table}' already exists"
            )));
        }
        self.put(
            &format!("{TABLES_PREFIX}{table}"),
            &format!("columns={}", columns.len()),
        )?;
        for (ordinal, col) in columns.iter().enumerate() {
            self.put(
                &format!("{COLUMNS_PREFIX}{table}:{}", col.name),
                &format!("type={},ordinal={ordinal}", col.data_type),
            )?;
        }
        Ok(())
    }

    pub fn drop_table(&self, table: &str) -> SiltResult<()> {
        if !self.table_exists(table)? {
            return Err(SiltError::Schema(format!("table '{table}' does not exist")));
        }

        // Columns first, then any index referencing the table, then the
        // table row itself.
        let col_prefix = format!("{COLUMNS_PREFIX}{table}:");
        for (key, value) in self.scan_prefix(&col_prefix)? {
            if value != DELETED_SENTINEL {
                self.put(&key, DELETED_SENTINEL)?;
            }
        }
        for index in self.indexes(Some(table))? {
            self.put(&format!("{INDEXES_PREFIX}{}", index.name), DELETED_SENTINEL)?;
        }
        self.put(&format!("{TABLES_PREFIX}{table}"), DELETED_SENTINEL)?;
        Ok(())
    }

    /// Existence is decided by scanning the exact key range, never by a
    /// point lookup whose error would have to be swallowed.
    pub fn table_exists(&self, table: &str) -> SiltResult<bool> {
        let key = format!("{TABLES_PREFIX}{table}");
        for (found, value) in self.scan_prefix(&key)? {
            if found == key && value != DELETED_SENTINEL {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn list_tables(&self) -> SiltResult<Vec<String>> {
        let mut tables = vec![];
        for (key, value) in self.scan_prefix(TABLES_PREFIX)? {
            if value != DELETED_SENTINEL {
                tables.push(key[TABLES_PREFIX.len()..].to_string());
            }
        }
        tables.sort();
        Ok(tables)
    }

    /// Column definitions in ordinal order.
    pub fn columns(&self, table: &str) -> SiltResult<Vec<ColumnDef>> {
        if !self.table_exists(table)? {
            return Err(SiltError::Schema(format!("table '{table}' does not exist")));
        }
        let prefix = format!("{COLUMNS_PREFIX}{table}:");
        let mut columns: Vec<(usize, ColumnDef)> = vec![];
        for (key, value) in self.scan_prefix(&prefix)? {
            if value == DELETED_SENTINEL {
                continue;
            }
            let fields = parse_metadata(&value);
            let name = key
                .rsplit(':')
                .next()
                .ok_or_else(|| SiltError::Corruption(format!("malformed column key '{key}'")))?;
            let data_type = DataType::parse(fields.get("type").copied().unwrap_or_default())?;
            let ordinal: usize = fields
                .get("ordinal")
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| {
                    SiltError::Corruption(format!("column entry '{key}' has no ordinal"))
                })?;
            columns.push((ordinal, ColumnDef::new(name, data_type)));
        }
        columns.sort_by_key(|(ordinal, _)| *ordinal);
        Ok(columns.into_iter().map(|(_, col)| col).collect())
    }

    pub fn add_column(&self, table: &str, column: &ColumnDef) -> SiltResult<()> {
        let existing = self.columns(table)?;
        if existing.iter().any(|c| c.name == column.name) {
            return Err(SiltError::Schema(format!(
                "column '{}' already exists in table '{table}'",
                column.name
            )));
        }
        let next_ordinal = existing.len();
        self.put(
            &format!("{COLUMNS_PREFIX}{table}:{}", column.name),
            &format!("type={},ordinal={next_ordinal}", column.data_type),
        )?;
        self.put(
            &format!("{TABLES_PREFIX}{table}"),
            &format!("columns={}", next_ordinal + 1),
        )?;
        Ok(())
    }

    pub fn create_index(&self, index: &str, table: &str, column: &str) -> SiltResult<()> {
        if !self.table_exists(table)? {
            return Err(SiltError::Schema(format!("table '{table}' does not exist")));
        }
        if !self.columns(table)?.iter().any(|c| c.name == column) {
            return Err(SiltError::Schema(format!(
                "column '{column}' does not exist in table '{table}'"
            )));
        }
        self.put(
            &format!("{INDEXES_PREFIX}{index}"),
            &format!("table={table},column={column}"),
        )
    }

    pub fn drop_index(&self, index: &str) -> SiltResult<()> {
        let key = format!("{INDEXES_PREFIX}{index}");
        let exists = self
            .scan_prefix(&key)?
            .iter()
            .any(|(found, value)| *found == key && value != DELETED_SENTINEL);
        if !exists {
            return Err(SiltError::Schema(format!("index '{index}' does not exist")));
        }
        self.put(&key, DELETED_SENTINEL)
    }

    /// Index metadata, optionally filtered by table.
    pub fn indexes(&self, table: Option<&str>) -> SiltResult<Vec<IndexInfo>> {
        let mut indexes = vec![];
        for (key, value) in self.scan_prefix(INDEXES_PREFIX)? {
            if value == DELETED_SENTINEL {
                continue;
            }
            let fields = parse_metadata(&value);
            let Some(index_table) = fields.get("table") else {
                continue;
            };
            if table.is_some_and(|t| t != *index_table) {
                continue;
            }
            indexes.push(IndexInfo {
                name: key[INDEXES_PREFIX.len()..].to_string(),
                table: index_table.to_string(),
                column: fields.get("column").copied().unwrap_or_default().to_string(),
            });
        }
        Ok(indexes)
    }

    pub fn update_stats(&self, table: &str, row_count: u64) -> SiltResult<()> {
        self.put(
            &format!("{STATS_PREFIX}{table}"),
            &format!("rows={row_count}"),
        )
    }

    /// Row-count statistics are advisory; a missing entry reads as zero.
    pub fn stats(&self, table: &str) -> SiltResult<TableStatistics> {
        match self.engine.get(format!("{STATS_PREFIX}{table}").as_bytes()) {
            Ok(raw) => {
                let value = String::from_utf8_lossy(&raw).into_owned();
                let row_count = parse_metadata(&value)
                    .get("rows")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                Ok(TableStatistics { row_count })
            }
            Err(SiltError::NotFound(_)) => Ok(TableStatistics::default()),
            Err(e) => Err(e),
        }
    }

    fn put(&self, key: &str, value: &str) -> SiltResult<()> {
        self.engine.insert(key.as_bytes(), value.as_bytes())
    }

    fn scan_prefix(&self, prefix: &str) -> SiltResult<Vec<(String, String)>> {
        let end = format!("{prefix}{PREFIX_SCAN_END}");
        let mut entries = vec![];
        for (key, value) in self.engine.range_scan(prefix.as_bytes(), end.as_bytes())? {
            entries.push((
                String::from_utf8_lossy(&key).into_owned(),
                String::from_utf8_lossy(&value).into_owned(),
            ));
        }
        Ok(entries)
    }
}

/// Parse `k1=v1,k2=v2` metadata payloads.
fn parse_metadata(value: &str) -> HashMap<&str, &str> {
    value
        .split(',')
        .filter_map(|part| part.split_once('='))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Catalog) {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(StorageEngine::open(dir.path().join("test.db")).unwrap());
        (dir, Catalog::new(engine))
    }

    fn users_columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", DataType::Int),
            ColumnDef::new("name", DataType::Text),
        ]
    }

    #[test]
    fn create_and_describe_table() {
        let (_dir, catalog) = setup();
        catalog.create_table("users", &users_columns()).unwrap();
        assert!(catalog.table_exists("users").unwrap());

        let cols = catalog.columns("users").unwrap();
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0].name, "id");
        assert_eq!(cols[0].data_type, DataType::Int);
        assert_eq!(cols[1].name, "name");
    }

    #[test]
    fn duplicate_table_is_rejected() {
        let (_dir, catalog) = setup();
        catalog.create_table("users", &users_columns()).unwrap();
        let err = catalog.create_table("users", &users_columns());
        assert!(matches!(err, Err(SiltError::Schema(_))));
    }

    #[test]
    fn drop_table_hides_it_and_its_indexes() {
        let (_dir, catalog) = setup();
        catalog.create_table("users", &users_columns()).unwrap();
        catalog.create_index("ix_id", "users", "id").unwrap();
        catalog.drop_table("users").unwrap();

        assert!(!catalog.table_exists("users").unwrap());
        assert!(catalog.columns("users").is_err());
        assert!(catalog.indexes(Some("users")).unwrap().is_empty());

        // Name can be reused after a drop.
        catalog.create_table("users", &users_columns()).unwrap();
        assert!(catalog.table_exists("users").unwrap());
    }

    #[test]
    fn add_column_appends_with_next_ordinal() {
        let (_dir, catalog) = setup();
        catalog.create_table("users", &users_columns()).unwrap();
        catalog
            .add_column("users", &ColumnDef::new("age", DataType::Int))
            .unwrap();
        let cols = catalog.columns("users").unwrap();
        assert_eq!(cols.len(), 3);
        assert_eq!(cols[2].name, "age");
    }

    #[test]
    fn index_lifecycle() {
        let (_dir, catalog) = setup();
        catalog.create_table("users", &users_columns()).unwrap();
        catalog.create_index("ix_id", "users", "id").unwrap();

        let indexes = catalog.indexes(Some("users")).unwrap();
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].column, "id");

        catalog.drop_index("ix_id").unwrap();
        assert!(catalog.indexes(Some("users")).unwrap().is_empty());
        assert!(catalog.drop_index("ix_id").is_err());
    }

    #[test]
    fn index_requires_table_and_column() {
        let (_dir, catalog) = setup();
        assert!(catalog.create_index("ix", "missing", "id").is_err());
        catalog.create_table("users", &users_columns()).unwrap();
        assert!(catalog.create_index("ix", "users", "missing").is_err());
    }

    #[test]
    fn stats_default_to_zero_rows() {
        let (_dir, catalog) = setup();
        assert_eq!(catalog.stats("users").unwrap().row_count, 0);
        catalog.update_stats("users", 12).unwrap();
        assert_eq!(catalog.stats("users").unwrap().row_count, 12);
    }

    #[test]
    fn list_tables_is_sorted() {
        let (_dir, catalog) = setup();
        catalog.create_table("zebra", &users_columns()).unwrap();
        catalog.create_table("apple", &users_columns()).unwrap();
        assert_eq!(catalog.list_tables().unwrap(), vec!["apple", "zebra"]);
    }
}
