pub mod catalog;
pub mod schema;

pub use catalog::{Catalog, IndexInfo, TableStatistics, CATALOG_PREFIX, DELETED_SENTINEL};
pub use schema::{ColumnDef, DataType};
