use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PagePtr, PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::node::BTreeNode;
use crate::storage::buffer::BufferPoolManager;

/// Forward iterator over a B+-tree's leaf chain. Holds a pin on the current
/// leaf and a position within it; advancing past the last entry follows the
/// next-leaf pointer, unpinning the old leaf and pinning the new one. Only
/// shared latches are taken, and only inside `next`.
pub struct BPlusTreeIterator<K> {
    buffer_pool: Arc<BufferPoolManager>,
    leaf: Option<PagePtr>,
    page_id: PageId,
    index: usize,
    _phantom: PhantomData<fn() -> K>,
}

impl<K> BPlusTreeIterator<K>
where
    K: Ord + Clone + Serialize + DeserializeOwned,
{
    pub(crate) fn new(
        buffer_pool: Arc<BufferPoolManager>,
        leaf: PagePtr,
        page_id: PageId,
        index: usize,
    ) -> Self {
        Self {
            buffer_pool,
            leaf: Some(leaf),
            page_id,
            index,
            _phantom: PhantomData,
        }
    }

    /// The exhausted iterator: (INVALID, 0).
    pub(crate) fn end(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            leaf: None,
            page_id: INVALID_PAGE_ID,
            index: 0,
            _phantom: PhantomData,
        }
    }

    pub fn is_end(&self) -> bool {
        self.leaf.is_none()
    }
}

impl<K> Iterator for BPlusTreeIterator<K>
where
    K: Ord + Clone + Serialize + DeserializeOwned,
{
    type Item = (K, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let leaf = self.leaf.as_ref()?.clone();

            enum Step<K> {
                Item(K, Rid),
                Advance(PageId),
                Corrupt,
            }
            let step = {
                let guard = leaf.read();
                match BTreeNode::<K>::load(&guard) {
                    Ok(node) => {
                        if self.index < node.keys.len() {
                            Step::Item(node.keys[self.index].clone(), node.values[self.index])
                        } else {
                            Step::Advance(node.next_page_id)
                        }
                    }
                    Err(e) => {
                        log::warn!("index scan hit unreadable leaf {}: {}", self.page_id, e);
                        Step::Corrupt
                    }
                }
            };

            match step {
                Step::Item(key, rid) => {
                    self.index += 1;
                    return Some((key, rid));
                }
                Step::Advance(next_page_id) => {
                    self.leaf = None;
                    self.buffer_pool.unpin_page(self.page_id, false);
                    if next_page_id == INVALID_PAGE_ID {
                        self.page_id = INVALID_PAGE_ID;
                        return None;
                    }
                    match self.buffer_pool.fetch_page(next_page_id) {
                        Ok(page) => {
                            self.leaf = Some(page);
                            self.page_id = next_page_id;
                            self.index = 0;
                        }
                        Err(e) => {
                            log::warn!("index scan failed to fetch leaf {}: {}", next_page_id, e);
                            self.page_id = INVALID_PAGE_ID;
                            return None;
                        }
                    }
                }
                Step::Corrupt => {
                    self.leaf = None;
                    self.buffer_pool.unpin_page(self.page_id, false);
                    self.page_id = INVALID_PAGE_ID;
                    return None;
                }
            }
        }
    }
}

impl<K> Drop for BPlusTreeIterator<K> {
    fn drop(&mut self) {
        if self.leaf.take().is_some() {
            self.buffer_pool.unpin_page(self.page_id, false);
        }
    }
}
