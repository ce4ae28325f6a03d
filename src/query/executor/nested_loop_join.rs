use std::cmp::Ordering;

use crate::catalog::value::{compare_values, DataValue};
use crate::catalog::Schema;
use crate::common::types::Rid;
use crate::query::executor::{ExecResult, Executor};
use crate::storage::table::Tuple;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

/// Equi-join predicate over one column of each side.
#[derive(Debug, Clone, Copy)]
pub struct JoinPredicate {
    pub left_column: usize,
    pub right_column: usize,
}

impl JoinPredicate {
    fn matches(&self, left: &Tuple, right: &Tuple) -> bool {
        match (left.value(self.left_column), right.value(self.right_column)) {
            (Some(l), Some(r)) => {
                // NULL never matches, including NULL = NULL
                !l.is_null()
                    && !r.is_null()
                    && compare_values(l, r) == Ordering::Equal
            }
            _ => false,
        }
    }
}

/// Nested loop join: for each outer row, loop the inner child and emit
/// combined rows where the predicate holds. LEFT joins emit a NULL-padded
/// row for outer rows with no match.
pub struct NestedLoopJoinExecutor {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    predicate: JoinPredicate,
    join_type: JoinType,
    output_schema: Schema,
    current_left: Option<Tuple>,
    left_matched: bool,
}

impl NestedLoopJoinExecutor {
    pub fn new(
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        predicate: JoinPredicate,
        join_type: JoinType,
    ) -> Self {
        Self {
            left,
            right,
            predicate,
            join_type,
            output_schema: Schema::default(),
            current_left: None,
            left_matched: false,
        }
    }

    fn null_padding(&self) -> Tuple {
        let width = self.right.output_schema().column_count();
        Tuple::new(vec![DataValue::Null; width])
    }
}

impl Executor for NestedLoopJoinExecutor {
    fn init(&mut self) -> ExecResult<()> {
        self.left.init()?;
        self.right.init()?;

        let mut columns = self.left.output_schema().columns().to_vec();
        columns.extend(self.right.output_schema().columns().iter().cloned());
        self.output_schema = Schema::new(columns);

        self.current_left = self.left.next()?.map(|(tuple, _)| tuple);
        self.left_matched = false;
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>> {
        loop {
            let left_tuple = match self.current_left.as_ref() {
                Some(tuple) => tuple.clone(),
                None => return Ok(None),
            };

            match self.right.next()? {
                Some((right_tuple, _)) => {
                    if self.predicate.matches(&left_tuple, &right_tuple) {
                        self.left_matched = true;
                        return Ok(Some((left_tuple.combine(&right_tuple), Rid::INVALID)));
                    }
                }
                None => {
                    let emit_padded = self.join_type == JoinType::Left && !self.left_matched;

                    // restart the inner side and advance the outer row
                    self.right.init()?;
                    self.current_left = self.left.next()?.map(|(tuple, _)| tuple);
                    self.left_matched = false;

                    if emit_padded {
                        let padded = left_tuple.combine(&self.null_padding());
                        return Ok(Some((padded, Rid::INVALID)));
                    }
                }
            }
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
