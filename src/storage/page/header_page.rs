use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};

/// The header page (page id 0) is a persistent map from index name to root
/// page id. Every mutation of a tree's root id flushes through this page
/// under its page latch.
///
/// Layout: `record_count(4)` followed by fixed-size records of
/// `name(32, zero padded) | root_page_id(4)`.
pub struct HeaderPage;

const COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const NAME_LEN: usize = 32;
const RECORD_SIZE: usize = NAME_LEN + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

impl HeaderPage {
    pub fn record_count(page: &Page) -> u32 {
        LittleEndian::read_u32(&page.data[COUNT_OFFSET..COUNT_OFFSET + 4])
    }

    /// Insert a (name, root page id) record. Returns false if the name is
    /// too long, already present, or the page is full.
    pub fn insert_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
        if name.len() > NAME_LEN || name.is_empty() {
            return false;
        }
        if Self::find_record(page, name).is_some() {
            return false;
        }
        let count = Self::record_count(page) as usize;
        if count >= MAX_RECORDS {
            return false;
        }

        let offset = RECORDS_OFFSET + count * RECORD_SIZE;
        page.data[offset..offset + NAME_LEN].fill(0);
        page.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        LittleEndian::write_u32(
            &mut page.data[offset + NAME_LEN..offset + RECORD_SIZE],
            root_page_id,
        );
        LittleEndian::write_u32(
            &mut page.data[COUNT_OFFSET..COUNT_OFFSET + 4],
            count as u32 + 1,
        );
        true
    }

    /// Update an existing record. Returns false if the name is absent.
    pub fn update_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
        match Self::find_record(page, name) {
            Some(index) => {
                let offset = RECORDS_OFFSET + index * RECORD_SIZE;
                LittleEndian::write_u32(
                    &mut page.data[offset + NAME_LEN..offset + RECORD_SIZE],
                    root_page_id,
                );
                true
            }
            None => false,
        }
    }

    /// Look up the root page id recorded under the given name.
    pub fn get_record(page: &Page, name: &str) -> Option<PageId> {
        Self::find_record(page, name).map(|index| {
            let offset = RECORDS_OFFSET + index * RECORD_SIZE;
            LittleEndian::read_u32(&page.data[offset + NAME_LEN..offset + RECORD_SIZE])
        })
    }

    fn find_record(page: &Page, name: &str) -> Option<usize> {
        if name.len() > NAME_LEN {
            return None;
        }
        let count = Self::record_count(page) as usize;
        (0..count.min(MAX_RECORDS)).find(|&index| {
            let offset = RECORDS_OFFSET + index * RECORD_SIZE;
            let stored = &page.data[offset..offset + NAME_LEN];
            let end = stored.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
            &stored[..end] == name.as_bytes()
        })
    }
}
