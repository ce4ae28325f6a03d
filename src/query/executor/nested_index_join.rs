use std::collections::VecDeque;
use std::sync::Arc;

use crate::catalog::value::DataValue;
use crate::catalog::{IndexInfo, Schema};
use crate::common::types::Rid;
use crate::query::executor::insert::index_key;
use crate::query::executor::nested_loop_join::JoinType;
use crate::query::executor::{ExecResult, Executor, ExecutorContext, ExecutorError};
use crate::storage::table::Tuple;

/// Index nested loop join: for each outer row, evaluate the key column,
/// probe the inner table's B+-tree index, and fetch matching inner tuples
/// by rid. LEFT joins emit a NULL-padded row for outer rows with no match.
pub struct NestedIndexJoinExecutor {
    ctx: Arc<ExecutorContext>,
    child: Box<dyn Executor>,
    inner_index: Arc<IndexInfo>,
    key_column: usize,
    join_type: JoinType,
    output_schema: Schema,
    results: VecDeque<Tuple>,
}

impl NestedIndexJoinExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        child: Box<dyn Executor>,
        inner_index: Arc<IndexInfo>,
        key_column: usize,
        join_type: JoinType,
    ) -> Self {
        Self {
            ctx,
            child,
            inner_index,
            key_column,
            join_type,
            output_schema: Schema::default(),
            results: VecDeque::new(),
        }
    }
}

impl Executor for NestedIndexJoinExecutor {
    fn init(&mut self) -> ExecResult<()> {
        let inner_table = self
            .ctx
            .catalog
            .table(self.inner_index.table_id)
            .ok_or(ExecutorError::TableNotFound(self.inner_index.table_id))?;
        self.child.init()?;

        let mut columns = self.child.output_schema().columns().to_vec();
        columns.extend(inner_table.schema.columns().iter().cloned());
        self.output_schema = Schema::new(columns);

        let inner_width = inner_table.schema.column_count();
        self.results.clear();
        while let Some((outer, _)) = self.child.next()? {
            let probe = index_key(&outer, self.key_column)?;
            let matched = match probe {
                Some(key) => self.inner_index.tree.get_value(&key)?,
                None => None,
            };
            match matched {
                Some(rid) => {
                    if let Some(inner) = inner_table.heap.get_tuple(rid)? {
                        self.results.push_back(outer.combine(&inner));
                    } else if self.join_type == JoinType::Left {
                        let padding = Tuple::new(vec![DataValue::Null; inner_width]);
                        self.results.push_back(outer.combine(&padding));
                    }
                }
                None => {
                    if self.join_type == JoinType::Left {
                        let padding = Tuple::new(vec![DataValue::Null; inner_width]);
                        self.results.push_back(outer.combine(&padding));
                    }
                }
            }
        }

        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>> {
        Ok(self.results.pop_front().map(|tuple| (tuple, Rid::INVALID)))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
