use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::catalog::Schema;
use crate::common::types::Rid;
use crate::query::executor::sort::{compare_tuples, OrderBy};
use crate::query::executor::{ExecResult, Executor};
use crate::storage::table::Tuple;

/// Heap entry ordered by the sort keys so that the heap's top is the worst
/// of the current best N.
struct HeapEntry {
    tuple: Tuple,
    rid: Rid,
    order_by: Arc<[OrderBy]>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_tuples(&self.tuple, &other.tuple, &self.order_by)
    }
}

/// Top-N executor: keeps a bounded max-heap of N rows under the inverted
/// comparator while draining the child, then yields the survivors in order.
pub struct TopNExecutor {
    child: Box<dyn Executor>,
    order_by: Arc<[OrderBy]>,
    n: usize,
    output_schema: Schema,
    rows: Vec<(Tuple, Rid)>,
    cursor: usize,
}

impl TopNExecutor {
    pub fn new(child: Box<dyn Executor>, order_by: Vec<OrderBy>, n: usize) -> Self {
        Self {
            child,
            order_by: order_by.into(),
            n,
            output_schema: Schema::default(),
            rows: Vec::new(),
            cursor: 0,
        }
    }
}

impl Executor for TopNExecutor {
    fn init(&mut self) -> ExecResult<()> {
        self.child.init()?;
        self.output_schema = self.child.output_schema().clone();

        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(self.n + 1);
        while let Some((tuple, rid)) = self.child.next()? {
            heap.push(HeapEntry {
                tuple,
                rid,
                order_by: self.order_by.clone(),
            });
            if heap.len() > self.n {
                heap.pop();
            }
        }

        self.rows = heap
            .into_sorted_vec()
            .into_iter()
            .map(|entry| (entry.tuple, entry.rid))
            .collect();
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
