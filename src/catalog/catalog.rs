use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::catalog::schema::Schema;
use crate::common::types::TableId;
use crate::index::btree::{BPlusTree, BTreeError};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::table::{TableHeap, TableHeapError};

const INDEX_LEAF_MAX_SIZE: u32 = 128;
const INDEX_INTERNAL_MAX_SIZE: u32 = 128;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableAlreadyExists(String),

    #[error("Heap error: {0}")]
    Heap(#[from] TableHeapError),

    #[error("Index error: {0}")]
    Index(#[from] BTreeError),
}

/// A registered table: schema plus its backing heap.
pub struct TableInfo {
    pub id: TableId,
    pub name: String,
    pub schema: Schema,
    pub heap: Arc<TableHeap>,
}

/// A registered index over a single integer key column.
pub struct IndexInfo {
    pub name: String,
    pub table_id: TableId,
    pub key_column: usize,
    pub tree: Arc<BPlusTree<i64>>,
}

/// Resolves table ids to table heaps and index ids to B+-trees for the
/// executors.
pub struct Catalog {
    buffer_pool: Arc<BufferPoolManager>,
    tables: RwLock<HashMap<TableId, Arc<TableInfo>>>,
    table_names: RwLock<HashMap<String, TableId>>,
    indexes: RwLock<HashMap<TableId, Vec<Arc<IndexInfo>>>>,
    next_table_id: AtomicU32,
}

impl Catalog {
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            tables: RwLock::new(HashMap::new()),
            table_names: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
            next_table_id: AtomicU32::new(1),
        }
    }

    pub fn create_table(
        &self,
        name: impl Into<String>,
        schema: Schema,
    ) -> Result<Arc<TableInfo>, CatalogError> {
        let name = name.into();
        if self.table_names.read().contains_key(&name) {
            return Err(CatalogError::TableAlreadyExists(name));
        }
        let id = self.next_table_id.fetch_add(1, Ordering::SeqCst);
        let heap = Arc::new(TableHeap::new(self.buffer_pool.clone())?);
        let info = Arc::new(TableInfo {
            id,
            name: name.clone(),
            schema,
            heap,
        });
        self.tables.write().insert(id, info.clone());
        self.table_names.write().insert(name, id);
        Ok(info)
    }

    pub fn create_index(
        &self,
        name: impl Into<String>,
        table_id: TableId,
        key_column: usize,
    ) -> Result<Arc<IndexInfo>, CatalogError> {
        let name = name.into();
        let tree = Arc::new(BPlusTree::new(
            name.clone(),
            self.buffer_pool.clone(),
            INDEX_LEAF_MAX_SIZE,
            INDEX_INTERNAL_MAX_SIZE,
        )?);
        let info = Arc::new(IndexInfo {
            name,
            table_id,
            key_column,
            tree,
        });
        self.indexes
            .write()
            .entry(table_id)
            .or_default()
            .push(info.clone());
        Ok(info)
    }

    pub fn table(&self, table_id: TableId) -> Option<Arc<TableInfo>> {
        self.tables.read().get(&table_id).cloned()
    }

    pub fn table_by_name(&self, name: &str) -> Option<Arc<TableInfo>> {
        let id = *self.table_names.read().get(name)?;
        self.table(id)
    }

    pub fn table_indexes(&self, table_id: TableId) -> Vec<Arc<IndexInfo>> {
        self.indexes
            .read()
            .get(&table_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::{Column, DataType};
    use tempfile::NamedTempFile;

    #[test]
    fn test_create_and_resolve_table() {
        let file = NamedTempFile::new().unwrap();
        let buffer_pool = Arc::new(BufferPoolManager::new(16, 2, file.path()).unwrap());
        let catalog = Catalog::new(buffer_pool);

        let schema = Schema::new(vec![
            Column::new("id", DataType::Integer),
            Column::new("name", DataType::Text),
        ]);
        let info = catalog.create_table("users", schema.clone()).unwrap();
        assert_eq!(info.name, "users");
        assert_eq!(info.schema, schema);

        assert!(catalog.table(info.id).is_some());
        assert_eq!(catalog.table_by_name("users").unwrap().id, info.id);
        assert!(catalog.table_by_name("missing").is_none());

        let dup = catalog.create_table("users", schema);
        assert!(matches!(dup, Err(CatalogError::TableAlreadyExists(_))));
    }

    #[test]
    fn test_create_index_registers_on_table() {
        let file = NamedTempFile::new().unwrap();
        let buffer_pool = Arc::new(BufferPoolManager::new(16, 2, file.path()).unwrap());
        let catalog = Catalog::new(buffer_pool);

        let schema = Schema::new(vec![Column::new("id", DataType::Integer)]);
        let table = catalog.create_table("t", schema).unwrap();
        catalog.create_index("t_pk", table.id, 0).unwrap();

        let indexes = catalog.table_indexes(table.id);
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].key_column, 0);
    }
}
