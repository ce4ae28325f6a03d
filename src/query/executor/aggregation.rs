use std::collections::HashMap;

use crate::catalog::value::{compare_values, DataValue};
use crate::catalog::{Column, DataType, Schema};
use crate::common::types::Rid;
use crate::query::executor::{ExecResult, Executor, ExecutorError};
use crate::storage::table::Tuple;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Min,
    Max,
}

/// One aggregate to compute; `column: None` means COUNT(*).
#[derive(Debug, Clone, Copy)]
pub struct AggregateExpr {
    pub function: AggregateFunction,
    pub column: Option<usize>,
}

/// Running accumulator for one aggregate of one group.
#[derive(Debug, Clone)]
enum Accumulator {
    Count(i64),
    Sum(DataValue),
    Min(DataValue),
    Max(DataValue),
}

impl Accumulator {
    fn initial(expr: &AggregateExpr) -> Self {
        match expr.function {
            AggregateFunction::Count => Accumulator::Count(0),
            AggregateFunction::Sum => Accumulator::Sum(DataValue::Null),
            AggregateFunction::Min => Accumulator::Min(DataValue::Null),
            AggregateFunction::Max => Accumulator::Max(DataValue::Null),
        }
    }

    fn update(&mut self, value: Option<&DataValue>) -> ExecResult<()> {
        match self {
            Accumulator::Count(count) => {
                // COUNT(*) counts rows; COUNT(col) counts non-NULL values
                let counted = match value {
                    None => true,
                    Some(v) => !v.is_null(),
                };
                if counted {
                    *count += 1;
                }
            }
            Accumulator::Sum(sum) => {
                if let Some(value) = value.filter(|v| !v.is_null()) {
                    *sum = add_values(sum, value)?;
                }
            }
            Accumulator::Min(min) => {
                if let Some(value) = value.filter(|v| !v.is_null()) {
                    if min.is_null() || compare_values(value, min).is_lt() {
                        *min = value.clone();
                    }
                }
            }
            Accumulator::Max(max) => {
                if let Some(value) = value.filter(|v| !v.is_null()) {
                    if max.is_null() || compare_values(value, max).is_gt() {
                        *max = value.clone();
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> DataValue {
        match self {
            Accumulator::Count(count) => DataValue::Integer(count),
            Accumulator::Sum(value) | Accumulator::Min(value) | Accumulator::Max(value) => value,
        }
    }
}

fn add_values(sum: &DataValue, value: &DataValue) -> ExecResult<DataValue> {
    Ok(match (sum, value) {
        (DataValue::Null, v) => v.clone(),
        (DataValue::Integer(a), DataValue::Integer(b)) => DataValue::Integer(a + b),
        (DataValue::Float(a), DataValue::Float(b)) => DataValue::Float(a + b),
        (DataValue::Integer(a), DataValue::Float(b)) => DataValue::Float(*a as f64 + b),
        (DataValue::Float(a), DataValue::Integer(b)) => DataValue::Float(a + *b as f64),
        (a, b) => {
            return Err(ExecutorError::TypeError(format!(
                "cannot sum {:?} and {:?}",
                a, b
            )))
        }
    })
}

/// Hash aggregation: groups child rows by the group-by columns and folds
/// each group through per-aggregate accumulators. With no input rows and no
/// group-by keys, one row of initial values is emitted (COUNT is 0, the
/// rest are NULL).
pub struct AggregationExecutor {
    child: Box<dyn Executor>,
    group_by: Vec<usize>,
    aggregates: Vec<AggregateExpr>,
    output_schema: Schema,
    results: Vec<Tuple>,
    cursor: usize,
}

impl AggregationExecutor {
    pub fn new(
        child: Box<dyn Executor>,
        group_by: Vec<usize>,
        aggregates: Vec<AggregateExpr>,
    ) -> Self {
        Self {
            child,
            group_by,
            aggregates,
            output_schema: Schema::default(),
            results: Vec::new(),
            cursor: 0,
        }
    }

    fn build_output_schema(&self) -> Schema {
        let child_schema = self.child.output_schema();
        let mut columns = Vec::new();
        for &index in &self.group_by {
            if let Some(column) = child_schema.column(index) {
                columns.push(column.clone());
            }
        }
        for aggregate in &self.aggregates {
            let argument = aggregate
                .column
                .and_then(|index| child_schema.column(index))
                .map(|column| column.name.clone())
                .unwrap_or_else(|| "*".to_string());
            let name = match aggregate.function {
                AggregateFunction::Count => format!("count({})", argument),
                AggregateFunction::Sum => format!("sum({})", argument),
                AggregateFunction::Min => format!("min({})", argument),
                AggregateFunction::Max => format!("max({})", argument),
            };
            let data_type = match aggregate.function {
                AggregateFunction::Count => DataType::Integer,
                _ => aggregate
                    .column
                    .and_then(|index| child_schema.column(index))
                    .map(|column| column.data_type)
                    .unwrap_or(DataType::Integer),
            };
            columns.push(Column::new(name, data_type));
        }
        Schema::new(columns)
    }
}

impl Executor for AggregationExecutor {
    fn init(&mut self) -> ExecResult<()> {
        self.child.init()?;
        self.output_schema = self.build_output_schema();

        let mut groups: HashMap<Vec<DataValue>, Vec<Accumulator>> = HashMap::new();
        let mut group_order: Vec<Vec<DataValue>> = Vec::new();
        let mut input_rows = 0usize;

        while let Some((tuple, _)) = self.child.next()? {
            input_rows += 1;
            let key: Vec<DataValue> = self
                .group_by
                .iter()
                .map(|&index| tuple.value(index).cloned().unwrap_or(DataValue::Null))
                .collect();

            if !groups.contains_key(&key) {
                group_order.push(key.clone());
                let initials: Vec<Accumulator> =
                    self.aggregates.iter().map(Accumulator::initial).collect();
                groups.insert(key.clone(), initials);
            }
            if let Some(accumulators) = groups.get_mut(&key) {
                for (accumulator, expr) in accumulators.iter_mut().zip(self.aggregates.iter()) {
                    let value = expr.column.and_then(|index| tuple.value(index));
                    accumulator.update(value)?;
                }
            }
        }

        if input_rows == 0 && self.group_by.is_empty() {
            groups.insert(
                Vec::new(),
                self.aggregates.iter().map(Accumulator::initial).collect(),
            );
            group_order.push(Vec::new());
        }

        self.results = group_order
            .into_iter()
            .filter_map(|key| {
                groups.remove(&key).map(|accumulators| {
                    let mut values = key;
                    values.extend(accumulators.into_iter().map(Accumulator::finish));
                    Tuple::new(values)
                })
            })
            .collect();
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>> {
        if self.cursor < self.results.len() {
            let tuple = self.results[self.cursor].clone();
            self.cursor += 1;
            return Ok(Some((tuple, Rid::INVALID)));
        }
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
