use std::sync::Arc;

use crate::catalog::value::DataValue;
use crate::catalog::{Column, DataType, Schema, TableInfo};
use crate::common::types::{Rid, TableId};
use crate::query::executor::insert::index_key;
use crate::query::executor::{ExecResult, Executor, ExecutorContext, ExecutorError};
use crate::storage::table::Tuple;
use crate::transaction::{IsolationLevel, LockMode};

/// Delete executor: takes IX on the table, drains its child, mark-deletes
/// each row in the heap and removes it from every index, and emits a single
/// count row. READ_COMMITTED releases the table lock at EOF.
pub struct DeleteExecutor {
    ctx: Arc<ExecutorContext>,
    table_id: TableId,
    child: Box<dyn Executor>,
    table: Option<Arc<TableInfo>>,
    output_schema: Schema,
    emitted: bool,
    lock_released: bool,
}

impl DeleteExecutor {
    pub fn new(ctx: Arc<ExecutorContext>, table_id: TableId, child: Box<dyn Executor>) -> Self {
        Self {
            ctx,
            table_id,
            child,
            table: None,
            output_schema: Schema::new(vec![Column::new("count", DataType::Integer)]),
            emitted: false,
            lock_released: false,
        }
    }

    fn maybe_release_lock(&mut self) -> ExecResult<()> {
        if self.ctx.txn.isolation_level() == IsolationLevel::ReadCommitted && !self.lock_released
        {
            let still_held = self
                .ctx
                .txn
                .locks()
                .intention_exclusive_tables
                .contains(&self.table_id);
            if still_held {
                self.ctx
                    .lock_manager
                    .unlock_table(&self.ctx.txn, self.table_id)?;
            }
            self.lock_released = true;
        }
        Ok(())
    }
}

impl Executor for DeleteExecutor {
    fn init(&mut self) -> ExecResult<()> {
        let table = self
            .ctx
            .catalog
            .table(self.table_id)
            .ok_or(ExecutorError::TableNotFound(self.table_id))?;

        // the write intent comes first so a scanning child does not take a
        // weaker lock it could not upgrade
        let granted = self.ctx.lock_manager.lock_table(
            &self.ctx.txn,
            LockMode::IntentionExclusive,
            self.table_id,
        )?;
        if !granted {
            return Err(ExecutorError::LockFailed);
        }
        self.child.init()?;

        self.table = Some(table);
        self.emitted = false;
        self.lock_released = false;
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>> {
        if self.emitted {
            self.maybe_release_lock()?;
            return Ok(None);
        }
        let table = match self.table.as_ref() {
            Some(table) => table.clone(),
            None => return Ok(None),
        };
        let indexes = self.ctx.catalog.table_indexes(self.table_id);

        let mut count: i64 = 0;
        while let Some((tuple, rid)) = self.child.next()? {
            if table.heap.mark_delete(rid)? {
                for index in &indexes {
                    if let Some(key) = index_key(&tuple, index.key_column)? {
                        index.tree.remove(&key)?;
                    }
                }
                count += 1;
            }
        }

        self.emitted = true;
        self.maybe_release_lock()?;
        let result = Tuple::new(vec![DataValue::Integer(count)]);
        Ok(Some((result, Rid::INVALID)))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
