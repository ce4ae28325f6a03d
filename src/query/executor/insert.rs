use std::sync::Arc;

use crate::catalog::{Column, DataType, Schema, TableInfo};
use crate::catalog::value::DataValue;
use crate::common::types::{Rid, TableId};
use crate::query::executor::{ExecResult, Executor, ExecutorContext, ExecutorError};
use crate::storage::table::Tuple;
use crate::transaction::LockMode;

/// Insert executor: takes IX on the table, drains its child, writes every
/// row to the table heap and into every index on the table, and finally
/// emits a single row carrying the insert count.
pub struct InsertExecutor {
    ctx: Arc<ExecutorContext>,
    table_id: TableId,
    child: Box<dyn Executor>,
    table: Option<Arc<TableInfo>>,
    output_schema: Schema,
    emitted: bool,
}

impl InsertExecutor {
    pub fn new(ctx: Arc<ExecutorContext>, table_id: TableId, child: Box<dyn Executor>) -> Self {
        Self {
            ctx,
            table_id,
            child,
            table: None,
            output_schema: Schema::new(vec![Column::new("count", DataType::Integer)]),
            emitted: false,
        }
    }
}

/// Pull the integer index key out of a tuple column.
pub(crate) fn index_key(tuple: &Tuple, column: usize) -> ExecResult<Option<i64>> {
    match tuple.value(column) {
        Some(DataValue::Integer(key)) => Ok(Some(*key)),
        Some(DataValue::Null) => Ok(None),
        Some(other) => Err(ExecutorError::TypeError(format!(
            "index key column holds {:?}, expected an integer",
            other
        ))),
        None => Err(ExecutorError::ColumnOutOfRange(column)),
    }
}

impl Executor for InsertExecutor {
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
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>> {
        if self.emitted {
            return Ok(None);
        }
        let table = match self.table.as_ref() {
            Some(table) => table.clone(),
            None => return Ok(None),
        };
        let indexes = self.ctx.catalog.table_indexes(self.table_id);

        let mut count: i64 = 0;
        while let Some((tuple, _)) = self.child.next()? {
            let rid = table.heap.insert_tuple(&tuple)?;
            for index in &indexes {
                if let Some(key) = index_key(&tuple, index.key_column)? {
                    if !index.tree.insert(key, rid)? {
                        log::warn!(
                            "duplicate key {} ignored by index {}",
                            key,
                            index.name
                        );
                    }
                }
            }
            count += 1;
        }

        self.emitted = true;
        let result = Tuple::new(vec![DataValue::Integer(count)]);
        Ok(Some((result, Rid::INVALID)))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
