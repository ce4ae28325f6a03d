use std::sync::Arc;

use anyhow::Result;
use tempfile::NamedTempFile;

use tarndb::catalog::{Catalog, Schema};
use tarndb::common::types::Rid;
use tarndb::query::executor::{ExecResult, Executor};
use tarndb::storage::buffer::BufferPoolManager;
use tarndb::storage::table::Tuple;

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager (LRU-2) over a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, 2, path)?);
    Ok((buffer_pool, file))
}

// Create a buffer pool plus an empty catalog
#[allow(dead_code)]
pub fn create_test_catalog(
    pool_size: usize,
) -> Result<(Arc<BufferPoolManager>, Arc<Catalog>, NamedTempFile)> {
    let (buffer_pool, file) = create_test_buffer_pool(pool_size)?;
    let catalog = Arc::new(Catalog::new(buffer_pool.clone()));
    Ok((buffer_pool, catalog, file))
}

/// A child executor fed from a fixed row list, for driving write executors
/// and joins in tests.
#[allow(dead_code)]
pub struct MockExecutor {
    schema: Schema,
    rows: Vec<Tuple>,
    cursor: usize,
}

#[allow(dead_code)]
impl MockExecutor {
    pub fn new(schema: Schema, rows: Vec<Tuple>) -> Self {
        Self {
            schema,
            rows,
            cursor: 0,
        }
    }
}

impl Executor for MockExecutor {
    fn init(&mut self) -> ExecResult<()> {
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>> {
        if self.cursor < self.rows.len() {
            let tuple = self.rows[self.cursor].clone();
            self.cursor += 1;
            return Ok(Some((tuple, Rid::new(0, self.cursor as u32 - 1))));
        }
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}
