use std::sync::Arc;

use crate::catalog::Schema;
use crate::common::types::{Rid, TableId};
use crate::query::executor::{ExecResult, Executor, ExecutorContext, ExecutorError};
use crate::storage::table::{TableIterator, Tuple};
use crate::transaction::{IsolationLevel, LockMode};

/// Sequential scan over a table heap, projecting columns per the output
/// schema. Locking follows the isolation level: no table lock under
/// READ_UNCOMMITTED, IS under READ_COMMITTED (released at EOF), S under
/// REPEATABLE_READ (held to commit).
pub struct SeqScanExecutor {
    ctx: Arc<ExecutorContext>,
    table_id: TableId,
    projection: Option<Vec<String>>,
    column_indexes: Vec<usize>,
    output_schema: Schema,
    iter: Option<TableIterator>,
    lock_released: bool,
}

impl SeqScanExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        table_id: TableId,
        projection: Option<Vec<String>>,
    ) -> Self {
        Self {
            ctx,
            table_id,
            projection,
            column_indexes: Vec::new(),
            output_schema: Schema::default(),
            iter: None,
            lock_released: false,
        }
    }

    fn scan_lock_mode(&self) -> Option<LockMode> {
        match self.ctx.txn.isolation_level() {
            IsolationLevel::ReadUncommitted => None,
            IsolationLevel::ReadCommitted => Some(LockMode::IntentionShared),
            IsolationLevel::RepeatableRead => Some(LockMode::Shared),
        }
    }

    /// Whether the transaction already holds a table lock that covers
    /// reading, so the scan must not re-request (an S request under a held
    /// IX would be an illegal upgrade).
    fn covering_lock_held(&self) -> bool {
        let locks = self.ctx.txn.locks();
        locks.shared_tables.contains(&self.table_id)
            || locks.exclusive_tables.contains(&self.table_id)
            || locks.intention_exclusive_tables.contains(&self.table_id)
            || locks
                .shared_intention_exclusive_tables
                .contains(&self.table_id)
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) -> ExecResult<()> {
        let table = self
            .ctx
            .catalog
            .table(self.table_id)
            .ok_or(ExecutorError::TableNotFound(self.table_id))?;

        let (column_indexes, columns) = match &self.projection {
            Some(names) => {
                let mut indexes = Vec::with_capacity(names.len());
                let mut columns = Vec::with_capacity(names.len());
                for name in names {
                    let index = table
                        .schema
                        .column_index(name)
                        .ok_or_else(|| ExecutorError::TypeError(format!("unknown column {}", name)))?;
                    indexes.push(index);
                    columns.push(table.schema.columns()[index].clone());
                }
                (indexes, columns)
            }
            None => (
                (0..table.schema.column_count()).collect(),
                table.schema.columns().to_vec(),
            ),
        };
        self.column_indexes = column_indexes;
        self.output_schema = Schema::new(columns);

        if let Some(mode) = self.scan_lock_mode() {
            if !self.covering_lock_held() {
                let granted = self
                    .ctx
                    .lock_manager
                    .lock_table(&self.ctx.txn, mode, self.table_id)?;
                if !granted {
                    return Err(ExecutorError::LockFailed);
                }
            }
        }

        self.iter = Some(table.heap.iter());
        self.lock_released = false;
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>> {
        let iter = match self.iter.as_mut() {
            Some(iter) => iter,
            None => return Ok(None),
        };

        if let Some((rid, tuple)) = iter.next() {
            let values = self
                .column_indexes
                .iter()
                .map(|&index| {
                    tuple
                        .value(index)
                        .cloned()
                        .ok_or(ExecutorError::ColumnOutOfRange(index))
                })
                .collect::<ExecResult<Vec<_>>>()?;
            return Ok(Some((Tuple::new(values), rid)));
        }

        // EOF: READ_COMMITTED scans give their table lock back, unless an
        // enclosing write executor has upgraded it in the meantime
        if self.ctx.txn.isolation_level() == IsolationLevel::ReadCommitted && !self.lock_released
        {
            let still_held = self
                .ctx
                .txn
                .locks()
                .intention_shared_tables
                .contains(&self.table_id);
            if still_held {
                self.ctx
                    .lock_manager
                    .unlock_table(&self.ctx.txn, self.table_id)?;
            }
            self.lock_released = true;
        }
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
