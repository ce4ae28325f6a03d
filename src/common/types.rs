use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = u32;

/// Buffer pool frame ID type
pub type FrameId = u32;

/// Transaction ID type
pub type TxnId = u32;

/// Table OID type
pub type TableId = u32;

/// Sentinel for "no page"
pub const INVALID_PAGE_ID: PageId = u32::MAX;

/// Sentinel for "no transaction"
pub const INVALID_TXN_ID: TxnId = u32::MAX;

/// Page 0 is reserved for the index header page (name -> root page id map)
pub const HEADER_PAGE_ID: PageId = 0;

/// Record ID: identifies a tuple slot within a table page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub const INVALID: Rid = Rid {
        page_id: INVALID_PAGE_ID,
        slot: 0,
    };

    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

/// Page structure: a fixed-size byte block plus its current identity.
/// The surrounding `RwLock` is the page latch.
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
        }
    }

    /// Zero the contents and reassign the page identity.
    pub fn reset(&mut self, page_id: PageId) {
        self.data.fill(0);
        self.page_id = page_id;
    }
}

/// Smart pointer to a latched page
pub type PagePtr = Arc<RwLock<Page>>;

/// Owned read guard on a page latch, usable across stack frames (latch crabbing)
pub type PageReadGuard = parking_lot::lock_api::ArcRwLockReadGuard<parking_lot::RawRwLock, Page>;

/// Owned write guard on a page latch
pub type PageWriteGuard = parking_lot::lock_api::ArcRwLockWriteGuard<parking_lot::RawRwLock, Page>;

/// Buffer pool frame: one slot of the frame array. Pin count and dirty flag
/// live outside the page latch so the pool never blocks on a latched page.
pub struct Frame {
    pub frame_id: FrameId,
    pub page: PagePtr,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
}

impl Frame {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page: Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::SeqCst)
    }

    /// Increment the pin count, returning the new value.
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrement the pin count, returning the new value. Caller must check
    /// the count is positive first.
    pub fn unpin(&self) -> u32 {
        self.pin_count.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn set_pin_count(&self, count: u32) {
        self.pin_count.store(count, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::SeqCst)
    }

    pub fn mark_dirty(&self) {
        self.is_dirty.store(true, Ordering::SeqCst);
    }

    pub fn clear_dirty(&self) {
        self.is_dirty.store(false, Ordering::SeqCst);
    }
}
