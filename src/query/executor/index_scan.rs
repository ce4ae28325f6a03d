use std::sync::Arc;

use crate::catalog::{IndexInfo, Schema, TableInfo};
use crate::common::types::Rid;
use crate::index::btree::BPlusTreeIterator;
use crate::query::executor::{ExecResult, Executor, ExecutorContext, ExecutorError};
use crate::storage::table::Tuple;

/// Full-index scan: walks the B+-tree leaf chain in key order and fetches
/// each tuple from the table heap by rid.
pub struct IndexScanExecutor {
    ctx: Arc<ExecutorContext>,
    index: Arc<IndexInfo>,
    table: Option<Arc<TableInfo>>,
    iter: Option<BPlusTreeIterator<i64>>,
    output_schema: Schema,
}

impl IndexScanExecutor {
    pub fn new(ctx: Arc<ExecutorContext>, index: Arc<IndexInfo>) -> Self {
        Self {
            ctx,
            index,
            table: None,
            iter: None,
            output_schema: Schema::default(),
        }
    }
}

impl Executor for IndexScanExecutor {
    fn init(&mut self) -> ExecResult<()> {
        let table = self
            .ctx
            .catalog
            .table(self.index.table_id)
            .ok_or(ExecutorError::TableNotFound(self.index.table_id))?;
        self.output_schema = table.schema.clone();
        self.iter = Some(self.index.tree.iter()?);
        self.table = Some(table);
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>> {
        let table = match self.table.as_ref() {
            Some(table) => table.clone(),
            None => return Ok(None),
        };
        let iter = match self.iter.as_mut() {
            Some(iter) => iter,
            None => return Ok(None),
        };

        for (_, rid) in iter.by_ref() {
            // a deleted heap tuple may still linger in the index; skip it
            if let Some(tuple) = table.heap.get_tuple(rid)? {
                return Ok(Some((tuple, rid)));
            }
        }
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
