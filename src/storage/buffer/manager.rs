use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::types::{Frame, FrameId, PagePtr, PageId, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::page_table::ExtendibleHashTable;
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;
use crate::transaction::wal::LogManager;

const PAGE_TABLE_BUCKET_SIZE: usize = 4;

/// Buffer pool manager: a fixed-size page cache between the disk manager and
/// in-memory consumers, with an LRU-K replacement policy and an
/// extendible-hashing page table.
///
/// All operations serialize under the pool latch, which also owns the free
/// list. The page table and the replacer carry their own internal mutexes.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<Frame>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    latch: Mutex<VecDeque<FrameId>>,
    next_page_id: AtomicU32,
    disk_manager: Arc<DiskManager>,
    log_manager: Option<Arc<dyn LogManager>>,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        replacer_k: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, replacer_k, disk_manager, None))
    }

    pub fn with_disk_manager(
        pool_size: usize,
        replacer_k: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<dyn LogManager>>,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            frames.push(Frame::new(i as FrameId));
            free_list.push_back(i as FrameId);
        }

        Self {
            pool_size,
            frames,
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            replacer: LruKReplacer::new(pool_size, replacer_k),
            latch: Mutex::new(free_list),
            // page 0 is reserved for the header page
            next_page_id: AtomicU32::new(1),
            disk_manager,
            log_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page id and install it in a frame, pinned.
    /// Fails if no frame can be obtained from the free list or by eviction.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut free_list = self.latch.lock();
        let frame_id = self.acquire_frame(&mut free_list)?;
        let page_id = self.next_page_id.fetch_add(1, Ordering::SeqCst);

        let frame = &self.frames[frame_id as usize];
        frame.page.write().reset(page_id);
        frame.set_pin_count(1);
        frame.clear_dirty();

        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Ok((frame.page.clone(), page_id))
    }

    /// Fetch a page, from the pool if cached, otherwise from disk into a
    /// frame obtained from the free list or by eviction.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut free_list = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(frame.page.clone());
        }

        let frame_id = self.acquire_frame(&mut free_list)?;
        let frame = &self.frames[frame_id as usize];
        {
            let mut page = frame.page.write();
            page.reset(page_id);
            self.disk_manager.read_page(page_id, &mut page.data)?;
        }
        frame.set_pin_count(1);
        frame.clear_dirty();

        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Ok(frame.page.clone())
    }

    /// Drop one pin on the page. Returns false if the page is absent or its
    /// pin count is already zero. A true `is_dirty` sets the dirty flag; a
    /// clean unpin never clears it.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _free_list = self.latch.lock();

        let frame_id = match self.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return false,
        };
        let frame = &self.frames[frame_id as usize];
        if frame.pin_count() == 0 {
            return false;
        }

        if is_dirty {
            frame.mark_dirty();
        }
        if frame.unpin() == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Write the page to disk regardless of its pin count and clear the
    /// dirty flag. Returns false if the page is absent.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        let _free_list = self.latch.lock();
        self.flush_frame(page_id)
    }

    /// Flush every resident page.
    pub fn flush_all_pages(&self) {
        let _free_list = self.latch.lock();
        for frame in &self.frames {
            let page_id = frame.page.read().page_id;
            if page_id != INVALID_PAGE_ID {
                self.flush_frame(page_id);
            }
        }
    }

    /// Remove the page from the pool and deallocate it on disk. Returns true
    /// if the page was absent or deleted, false if it is pinned.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut free_list = self.latch.lock();

        let frame_id = match self.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return true,
        };
        let frame = &self.frames[frame_id as usize];
        if frame.pin_count() > 0 {
            return false;
        }

        self.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        frame.page.write().reset(INVALID_PAGE_ID);
        frame.clear_dirty();
        free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);
        true
    }

    fn flush_frame(&self, page_id: PageId) -> bool {
        let frame_id = match self.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return false,
        };
        let frame = &self.frames[frame_id as usize];
        let page = frame.page.read();
        if let Err(e) = self.disk_manager.write_page(page_id, &page.data) {
            log::warn!("failed to flush page {}: {}", page_id, e);
            return false;
        }
        frame.clear_dirty();
        true
    }

    /// Obtain a frame: from the free list first, otherwise by evicting the
    /// replacer's victim, writing its page back if dirty.
    fn acquire_frame(
        &self,
        free_list: &mut VecDeque<FrameId>,
    ) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = free_list.pop_front() {
            return Ok(frame_id);
        }

        let victim = match self.replacer.evict() {
            Some(victim) => victim,
            None => return Err(BufferPoolError::NoAvailableFrame),
        };
        let frame = &self.frames[victim as usize];
        let old_page_id = frame.page.read().page_id;

        if frame.is_dirty() {
            if let Some(log_manager) = &self.log_manager {
                log_manager.flush_before_evict(old_page_id);
            }
            let page = frame.page.read();
            self.disk_manager.write_page(old_page_id, &page.data)?;
            drop(page);
            frame.clear_dirty();
            log::debug!("wrote back dirty page {} on eviction", old_page_id);
        }

        if old_page_id != INVALID_PAGE_ID {
            self.page_table.remove(&old_page_id);
        }
        Ok(victim)
    }
}
