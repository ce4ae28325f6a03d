use crate::common::types::PageId;

/// Write-ahead-log hook consumed by the buffer pool. The pool invokes it
/// before a dirty page is written back on eviction; when absent the pool
/// proceeds without logging.
pub trait LogManager: Send + Sync {
    /// Ensure log records covering the page's changes are durable.
    fn flush_before_evict(&self, page_id: PageId);
}
