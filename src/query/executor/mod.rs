// Query executors: a pull-based iterator pipeline over the storage,
// index, and locking layers.

pub mod aggregation;
pub mod delete;
pub mod index_scan;
pub mod insert;
pub mod nested_index_join;
pub mod nested_loop_join;
pub mod seq_scan;
pub mod sort;
pub mod topn;

use std::sync::Arc;

use thiserror::Error;

use crate::catalog::Catalog;
use crate::common::types::{Rid, TableId};
use crate::index::btree::BTreeError;
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::table::{TableHeapError, Tuple};
use crate::transaction::{LockManager, Transaction, TransactionAbort};

pub use aggregation::{AggregateExpr, AggregateFunction, AggregationExecutor};
pub use delete::DeleteExecutor;
pub use index_scan::IndexScanExecutor;
pub use insert::InsertExecutor;
pub use nested_index_join::NestedIndexJoinExecutor;
pub use nested_loop_join::{JoinPredicate, JoinType, NestedLoopJoinExecutor};
pub use seq_scan::SeqScanExecutor;
pub use sort::{OrderBy, OrderDirection, SortExecutor};
pub use topn::TopNExecutor;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("{0}")]
    TransactionAborted(#[from] TransactionAbort),

    #[error("Lock not granted")]
    LockFailed,

    #[error("Table not found: {0}")]
    TableNotFound(TableId),

    #[error("Column out of range: {0}")]
    ColumnOutOfRange(usize),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Heap error: {0}")]
    Heap(#[from] TableHeapError),

    #[error("Index error: {0}")]
    Index(#[from] BTreeError),
}

pub type ExecResult<T> = Result<T, ExecutorError>;

/// Shared services every executor runs against, plus the transaction the
/// query belongs to.
pub struct ExecutorContext {
    pub buffer_pool: Arc<BufferPoolManager>,
    pub catalog: Arc<Catalog>,
    pub lock_manager: Arc<LockManager>,
    pub txn: Arc<Transaction>,
}

/// Pull-based executor interface. `init` prepares (and re-prepares) the
/// executor; `next` yields the next tuple with its rid, or None at EOF.
pub trait Executor: Send {
    fn init(&mut self) -> ExecResult<()>;

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>>;

    fn output_schema(&self) -> &crate::catalog::Schema;
}
