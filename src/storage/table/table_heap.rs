use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::page::{PageError, TablePage};
use crate::storage::table::tuple::Tuple;

#[derive(Error, Debug)]
pub enum TableHeapError {
    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Page error: {0}")]
    Page(#[from] PageError),

    #[error("Tuple codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// A table heap: a forward-linked list of slotted pages over the buffer
/// pool. Tuples are addressed by `Rid` (page id, slot).
pub struct TableHeap {
    buffer_pool: Arc<BufferPoolManager>,
    first_page_id: PageId,
    // serializes page allocation during inserts
    append_latch: Mutex<()>,
}

impl TableHeap {
    /// Create an empty heap with one initialized page.
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Result<Self, TableHeapError> {
        let (page, first_page_id) = buffer_pool.new_page()?;
        TablePage::init(&mut page.write());
        buffer_pool.unpin_page(first_page_id, true);
        Ok(Self {
            buffer_pool,
            first_page_id,
            append_latch: Mutex::new(()),
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Insert a tuple, chaining a fresh page onto the heap when the last
    /// page is full.
    pub fn insert_tuple(&self, tuple: &Tuple) -> Result<Rid, TableHeapError> {
        let data = tuple.to_bytes()?;
        let _append = self.append_latch.lock();

        let mut page_id = self.first_page_id;
        loop {
            let page = self.buffer_pool.fetch_page(page_id)?;
            let mut guard = page.write();

            match TablePage::insert_record(&mut guard, &data) {
                Ok(slot) => {
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, true);
                    return Ok(Rid::new(page_id, slot));
                }
                Err(PageError::InsufficientSpace) => {
                    let next = TablePage::next_page_id(&guard);
                    if next != INVALID_PAGE_ID {
                        drop(guard);
                        self.buffer_pool.unpin_page(page_id, false);
                        page_id = next;
                        continue;
                    }
                    // extend the chain
                    let (new_page, new_page_id) = self.buffer_pool.new_page()?;
                    TablePage::init(&mut new_page.write());
                    TablePage::set_next_page_id(&mut guard, new_page_id);
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, true);
                    self.buffer_pool.unpin_page(new_page_id, true);
                    page_id = new_page_id;
                }
                Err(e) => {
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, false);
                    return Err(e.into());
                }
            }
        }
    }

    /// Read a tuple by rid. Returns None for a deleted record.
    pub fn get_tuple(&self, rid: Rid) -> Result<Option<Tuple>, TableHeapError> {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = {
            let guard = page.read();
            match TablePage::get_record(&guard, rid.slot) {
                Ok(Some(bytes)) => Tuple::from_bytes(bytes).map(Some).map_err(Into::into),
                Ok(None) => Ok(None),
                Err(e) => Err(e.into()),
            }
        };
        self.buffer_pool.unpin_page(rid.page_id, false);
        result
    }

    /// Mark a tuple deleted. Returns false if it was already deleted.
    pub fn mark_delete(&self, rid: Rid) -> Result<bool, TableHeapError> {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = TablePage::mark_delete(&mut page.write(), rid.slot);
        match result {
            Ok(()) => {
                self.buffer_pool.unpin_page(rid.page_id, true);
                Ok(true)
            }
            Err(PageError::RecordDeleted) => {
                self.buffer_pool.unpin_page(rid.page_id, false);
                Ok(false)
            }
            Err(e) => {
                self.buffer_pool.unpin_page(rid.page_id, false);
                Err(e.into())
            }
        }
    }

    /// Iterate over live tuples in heap order.
    pub fn iter(&self) -> TableIterator {
        TableIterator {
            buffer_pool: self.buffer_pool.clone(),
            page_id: self.first_page_id,
            slot: 0,
        }
    }
}

/// Forward iterator over the live tuples of a table heap.
pub struct TableIterator {
    buffer_pool: Arc<BufferPoolManager>,
    page_id: PageId,
    slot: u32,
}

impl Iterator for TableIterator {
    type Item = (Rid, Tuple);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.page_id == INVALID_PAGE_ID {
                return None;
            }
            let page = match self.buffer_pool.fetch_page(self.page_id) {
                Ok(page) => page,
                Err(e) => {
                    log::warn!("table scan failed to fetch page {}: {}", self.page_id, e);
                    self.page_id = INVALID_PAGE_ID;
                    return None;
                }
            };

            let mut item = None;
            let mut next_page = None;
            {
                let guard = page.read();
                let slot_count = TablePage::slot_count(&guard);
                while self.slot < slot_count {
                    let slot = self.slot;
                    self.slot += 1;
                    match TablePage::get_record(&guard, slot) {
                        Ok(Some(bytes)) => match Tuple::from_bytes(bytes) {
                            Ok(tuple) => {
                                item = Some((Rid::new(self.page_id, slot), tuple));
                                break;
                            }
                            Err(e) => {
                                log::warn!("skipping undecodable record: {}", e);
                            }
                        },
                        Ok(None) => {}
                        Err(e) => {
                            log::warn!("skipping invalid slot: {}", e);
                        }
                    }
                }
                if item.is_none() {
                    next_page = Some(TablePage::next_page_id(&guard));
                }
            }
            self.buffer_pool.unpin_page(self.page_id, false);

            if let Some(item) = item {
                return Some(item);
            }
            if let Some(next) = next_page {
                self.page_id = next;
                self.slot = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::value::DataValue;
    use tempfile::NamedTempFile;

    fn test_heap(pool_size: usize) -> (TableHeap, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let buffer_pool =
            Arc::new(BufferPoolManager::new(pool_size, 2, file.path()).unwrap());
        (TableHeap::new(buffer_pool).unwrap(), file)
    }

    fn row(id: i64) -> Tuple {
        Tuple::new(vec![
            DataValue::Integer(id),
            DataValue::Text(format!("row_{}", id)),
        ])
    }

    #[test]
    fn test_insert_get_round_trip() {
        let (heap, _file) = test_heap(8);
        let rid = heap.insert_tuple(&row(1)).unwrap();
        assert_eq!(heap.get_tuple(rid).unwrap(), Some(row(1)));
    }

    #[test]
    fn test_mark_delete_hides_tuple() {
        let (heap, _file) = test_heap(8);
        let rid = heap.insert_tuple(&row(1)).unwrap();
        assert!(heap.mark_delete(rid).unwrap());
        assert_eq!(heap.get_tuple(rid).unwrap(), None);
        assert!(!heap.mark_delete(rid).unwrap());
    }

    #[test]
    fn test_iterator_spans_pages() {
        let (heap, _file) = test_heap(8);
        let count = 300; // enough to overflow a single 4K page
        for i in 0..count {
            heap.insert_tuple(&row(i)).unwrap();
        }

        let collected: Vec<i64> = heap
            .iter()
            .map(|(_, t)| t.value(0).and_then(|v| v.as_integer()).unwrap())
            .collect();
        assert_eq!(collected.len(), count as usize);
        assert_eq!(collected, (0..count).collect::<Vec<_>>());
    }

    #[test]
    fn test_iterator_skips_deleted() {
        let (heap, _file) = test_heap(8);
        let mut rids = Vec::new();
        for i in 0..10 {
            rids.push(heap.insert_tuple(&row(i)).unwrap());
        }
        heap.mark_delete(rids[3]).unwrap();
        heap.mark_delete(rids[7]).unwrap();

        let remaining: Vec<i64> = heap
            .iter()
            .map(|(_, t)| t.value(0).and_then(|v| v.as_integer()).unwrap())
            .collect();
        assert_eq!(remaining, vec![0, 1, 2, 4, 5, 6, 8, 9]);
    }
}
