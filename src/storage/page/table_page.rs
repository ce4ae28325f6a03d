use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::page::error::PageError;

/// Slotted data page for table heaps.
///
/// Header: `next_page_id(4) | slot_count(4) | free_space_offset(4)`. Record
/// bytes grow forward from the header; the slot array
/// (`offset(4) | length(4)` per slot) grows backward from the page end. A
/// slot with length 0 marks a deleted record.
pub struct TablePage;

const NEXT_PAGE_OFFSET: usize = 0;
const SLOT_COUNT_OFFSET: usize = 4;
const FREE_SPACE_OFFSET: usize = 8;
const HEADER_SIZE: usize = 12;
const SLOT_SIZE: usize = 8;

impl TablePage {
    pub fn init(page: &mut Page) {
        page.data[..HEADER_SIZE].fill(0);
        LittleEndian::write_u32(
            &mut page.data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4],
            INVALID_PAGE_ID,
        );
        LittleEndian::write_u32(&mut page.data[SLOT_COUNT_OFFSET..SLOT_COUNT_OFFSET + 4], 0);
        LittleEndian::write_u32(
            &mut page.data[FREE_SPACE_OFFSET..FREE_SPACE_OFFSET + 4],
            HEADER_SIZE as u32,
        );
    }

    pub fn next_page_id(page: &Page) -> PageId {
        LittleEndian::read_u32(&page.data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4])
    }

    pub fn set_next_page_id(page: &mut Page, next: PageId) {
        LittleEndian::write_u32(&mut page.data[NEXT_PAGE_OFFSET..NEXT_PAGE_OFFSET + 4], next);
    }

    pub fn slot_count(page: &Page) -> u32 {
        LittleEndian::read_u32(&page.data[SLOT_COUNT_OFFSET..SLOT_COUNT_OFFSET + 4])
    }

    fn free_space_offset(page: &Page) -> u32 {
        LittleEndian::read_u32(&page.data[FREE_SPACE_OFFSET..FREE_SPACE_OFFSET + 4])
    }

    fn slot_position(slot: u32) -> usize {
        PAGE_SIZE - SLOT_SIZE * (slot as usize + 1)
    }

    fn read_slot(page: &Page, slot: u32) -> (u32, u32) {
        let pos = Self::slot_position(slot);
        let offset = LittleEndian::read_u32(&page.data[pos..pos + 4]);
        let length = LittleEndian::read_u32(&page.data[pos + 4..pos + 8]);
        (offset, length)
    }

    /// Append a record, returning its slot index.
    pub fn insert_record(page: &mut Page, data: &[u8]) -> Result<u32, PageError> {
        let slot_count = Self::slot_count(page);
        let free_offset = Self::free_space_offset(page) as usize;

        // the record must fit between the free-space frontier and the slot
        // array extended by one entry
        let new_slot_start = Self::slot_position(slot_count);
        if new_slot_start < free_offset || new_slot_start - free_offset < data.len() {
            return Err(PageError::InsufficientSpace);
        }

        page.data[free_offset..free_offset + data.len()].copy_from_slice(data);

        let pos = Self::slot_position(slot_count);
        LittleEndian::write_u32(&mut page.data[pos..pos + 4], free_offset as u32);
        LittleEndian::write_u32(&mut page.data[pos + 4..pos + 8], data.len() as u32);

        LittleEndian::write_u32(
            &mut page.data[SLOT_COUNT_OFFSET..SLOT_COUNT_OFFSET + 4],
            slot_count + 1,
        );
        LittleEndian::write_u32(
            &mut page.data[FREE_SPACE_OFFSET..FREE_SPACE_OFFSET + 4],
            (free_offset + data.len()) as u32,
        );
        Ok(slot_count)
    }

    /// Read a live record. Returns None for a deleted slot.
    pub fn get_record<'a>(page: &'a Page, slot: u32) -> Result<Option<&'a [u8]>, PageError> {
        if slot >= Self::slot_count(page) {
            return Err(PageError::InvalidSlot(slot));
        }
        let (offset, length) = Self::read_slot(page, slot);
        if length == 0 {
            return Ok(None);
        }
        Ok(Some(&page.data[offset as usize..(offset + length) as usize]))
    }

    /// Mark a record deleted by zeroing its slot length.
    pub fn mark_delete(page: &mut Page, slot: u32) -> Result<(), PageError> {
        if slot >= Self::slot_count(page) {
            return Err(PageError::InvalidSlot(slot));
        }
        let (_, length) = Self::read_slot(page, slot);
        if length == 0 {
            return Err(PageError::RecordDeleted);
        }
        let pos = Self::slot_position(slot);
        LittleEndian::write_u32(&mut page.data[pos + 4..pos + 8], 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut page = Page::new(1);
        TablePage::init(&mut page);

        let slot0 = TablePage::insert_record(&mut page, b"hello").unwrap();
        let slot1 = TablePage::insert_record(&mut page, b"world!").unwrap();
        assert_eq!(slot0, 0);
        assert_eq!(slot1, 1);

        assert_eq!(TablePage::get_record(&page, 0).unwrap(), Some(&b"hello"[..]));
        assert_eq!(TablePage::get_record(&page, 1).unwrap(), Some(&b"world!"[..]));
        assert!(TablePage::get_record(&page, 2).is_err());
    }

    #[test]
    fn test_mark_delete() {
        let mut page = Page::new(1);
        TablePage::init(&mut page);

        TablePage::insert_record(&mut page, b"doomed").unwrap();
        TablePage::mark_delete(&mut page, 0).unwrap();
        assert_eq!(TablePage::get_record(&page, 0).unwrap(), None);
        assert!(TablePage::mark_delete(&mut page, 0).is_err());
    }

    #[test]
    fn test_page_fills_up() {
        let mut page = Page::new(1);
        TablePage::init(&mut page);

        let record = [0xabu8; 256];
        let mut inserted = 0;
        while TablePage::insert_record(&mut page, &record).is_ok() {
            inserted += 1;
        }
        // 4096-byte page, 12-byte header, 256-byte records + 8-byte slots
        assert!(inserted >= 14 && inserted < 16, "inserted {}", inserted);

        let err = TablePage::insert_record(&mut page, &record);
        assert!(matches!(err, Err(PageError::InsufficientSpace)));
    }

    #[test]
    fn test_next_page_link() {
        let mut page = Page::new(1);
        TablePage::init(&mut page);
        assert_eq!(TablePage::next_page_id(&page), INVALID_PAGE_ID);
        TablePage::set_next_page_id(&mut page, 9);
        assert_eq!(TablePage::next_page_id(&page), 9);
    }
}
