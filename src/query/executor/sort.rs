use std::cmp::Ordering;

use crate::catalog::value::{compare_values, DataValue};
use crate::catalog::Schema;
use crate::common::types::Rid;
use crate::query::executor::{ExecResult, Executor};
use crate::storage::table::Tuple;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

/// One sort key: a column index plus its direction.
#[derive(Debug, Clone, Copy)]
pub struct OrderBy {
    pub column: usize,
    pub direction: OrderDirection,
}

/// Compare two tuples lexicographically across the given keys.
pub(crate) fn compare_tuples(a: &Tuple, b: &Tuple, order_by: &[OrderBy]) -> Ordering {
    for key in order_by {
        let left = a.value(key.column).unwrap_or(&DataValue::Null);
        let right = b.value(key.column).unwrap_or(&DataValue::Null);
        let ordering = compare_values(left, right);
        if ordering != Ordering::Equal {
            return match key.direction {
                OrderDirection::Asc => ordering,
                OrderDirection::Desc => ordering.reverse(),
            };
        }
    }
    Ordering::Equal
}

/// Sort executor: materializes the child's rows, sorts them by the order
/// keys, and iterates the result.
pub struct SortExecutor {
    child: Box<dyn Executor>,
    order_by: Vec<OrderBy>,
    output_schema: Schema,
    rows: Vec<(Tuple, Rid)>,
    cursor: usize,
}

impl SortExecutor {
    pub fn new(child: Box<dyn Executor>, order_by: Vec<OrderBy>) -> Self {
        Self {
            child,
            order_by,
            output_schema: Schema::default(),
            rows: Vec::new(),
            cursor: 0,
        }
    }
}

impl Executor for SortExecutor {
    fn init(&mut self) -> ExecResult<()> {
        self.child.init()?;
        self.output_schema = self.child.output_schema().clone();

        self.rows.clear();
        while let Some(row) = self.child.next()? {
            self.rows.push(row);
        }
        let order_by = self.order_by.clone();
        self.rows
            .sort_by(|(a, _), (b, _)| compare_tuples(a, b, &order_by));
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>> {
        if self.cursor < self.rows.len() {
            let row = self.rows[self.cursor].clone();
            self.cursor += 1;
            return Ok(Some(row));
        }
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
