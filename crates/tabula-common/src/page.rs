//! Page format shared by table and index files.
//!
//! Every file is an array of fixed-size pages. Page `n` begins at byte
//! `n * PAGE_SIZE`. All multi-byte integers are big-endian.

use crate::error::{Result, TabulaError};
use serde::{Deserialize, Serialize};

/// Page size as a power of two.
pub const PAGE_SIZE_POWER: u32 = 9;

/// Page size in bytes (512).
pub const PAGE_SIZE: usize = 1 << PAGE_SIZE_POWER;

/// Page number within a single file.
pub type PageNo = u32;

/// Sentinel for "no page" in right and parent pointers (stored as -1).
pub const NO_PAGE: PageNo = u32::MAX;

/// Bytes available to cells and their pointer slots.
pub const USABLE_SPACE: usize = PAGE_SIZE - PageHeader::SIZE;

/// Largest cell a page can hold: the usable space minus one pointer slot.
pub const MAX_CELL_SIZE: usize = USABLE_SPACE - 2;

/// The four kinds of page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageType {
    /// Routing page of an index tree.
    IndexInterior = 0x02,
    /// Routing page of a table tree.
    TableInterior = 0x05,
    /// Leaf page of an index tree.
    IndexLeaf = 0x0A,
    /// Leaf page of a table tree, holding rows.
    TableLeaf = 0x0D,
}

impl PageType {
    /// Decodes a page type byte.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x02 => Some(PageType::IndexInterior),
            0x05 => Some(PageType::TableInterior),
            0x0A => Some(PageType::IndexLeaf),
            0x0D => Some(PageType::TableLeaf),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_leaf(self) -> bool {
        matches!(self, PageType::TableLeaf | PageType::IndexLeaf)
    }

    pub fn is_index(self) -> bool {
        matches!(self, PageType::IndexLeaf | PageType::IndexInterior)
    }

    /// Returns the interior type of the same tree family.
    pub fn interior(self) -> Self {
        if self.is_index() {
            PageType::IndexInterior
        } else {
            PageType::TableInterior
        }
    }
}

/// Fixed header at the start of every page.
///
/// Layout (16 bytes):
/// - page_type: 1 byte
/// - reserved: 1 byte
/// - cell_count: 2 bytes
/// - content_start: 2 bytes (lowest used cell byte, PAGE_SIZE when empty)
/// - right_page: 4 bytes (-1 = none)
/// - parent_page: 4 bytes (-1 = none)
/// - reserved: 2 bytes
///
/// The 2-byte cell pointer array follows immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub page_type: PageType,
    pub cell_count: u16,
    /// Stored as u32 so an empty page can hold PAGE_SIZE itself.
    pub content_start: u32,
    pub right_page: PageNo,
    pub parent_page: PageNo,
}

impl PageHeader {
    /// Size of the page header in bytes.
    pub const SIZE: usize = 16;

    /// Creates the header of an empty page.
    pub fn new(page_type: PageType, right_page: PageNo, parent_page: PageNo) -> Self {
        Self {
            page_type,
            cell_count: 0,
            content_start: PAGE_SIZE as u32,
            right_page,
            parent_page,
        }
    }

    /// Bytes between the end of the pointer array and the first cell.
    pub fn free_space(&self) -> usize {
        let pointers_end = Self::SIZE + 2 * self.cell_count as usize;
        (self.content_start as usize).saturating_sub(pointers_end)
    }

    /// Serializes the header.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.page_type.code();
        buf[2..4].copy_from_slice(&self.cell_count.to_be_bytes());
        // PAGE_SIZE wraps to 0 only for 64 KiB pages.
        buf[4..6].copy_from_slice(&(self.content_start as u16).to_be_bytes());
        buf[6..10].copy_from_slice(&self.right_page.to_be_bytes());
        buf[10..14].copy_from_slice(&self.parent_page.to_be_bytes());
        buf
    }

    /// Deserializes a header, rejecting unknown page types and bad offsets.
    pub fn from_bytes(page_no: PageNo, buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(TabulaError::PageCorrupted {
                page_no,
                reason: format!("header truncated to {} bytes", buf.len()),
            });
        }

        let page_type = PageType::from_code(buf[0]).ok_or_else(|| TabulaError::PageCorrupted {
            page_no,
            reason: format!("unknown page type 0x{:02X}", buf[0]),
        })?;
        let cell_count = u16::from_be_bytes([buf[2], buf[3]]);
        let content_start = u16::from_be_bytes([buf[4], buf[5]]) as u32;
        let right_page = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]);
        let parent_page = u32::from_be_bytes([buf[10], buf[11], buf[12], buf[13]]);

        let header = Self {
            page_type,
            cell_count,
            content_start,
            right_page,
            parent_page,
        };

        let pointers_end = Self::SIZE + 2 * cell_count as usize;
        if (content_start as usize) > PAGE_SIZE || pointers_end > content_start as usize {
            return Err(TabulaError::PageCorrupted {
                page_no,
                reason: format!(
                    "cell count {} and content start {} overlap",
                    cell_count, content_start
                ),
            });
        }

        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_constants() {
        assert_eq!(PAGE_SIZE, 512);
        assert_eq!(USABLE_SPACE, 496);
        assert_eq!(MAX_CELL_SIZE, 494);
    }

    #[test]
    fn test_page_type_codes() {
        for page_type in [
            PageType::IndexInterior,
            PageType::TableInterior,
            PageType::IndexLeaf,
            PageType::TableLeaf,
        ] {
            assert_eq!(PageType::from_code(page_type.code()), Some(page_type));
        }
        assert_eq!(PageType::from_code(0x00), None);
        assert_eq!(PageType::from_code(0x01), None);
        assert_eq!(PageType::TableLeaf.interior(), PageType::TableInterior);
        assert_eq!(PageType::IndexLeaf.interior(), PageType::IndexInterior);
        assert!(PageType::IndexLeaf.is_leaf());
        assert!(!PageType::TableInterior.is_leaf());
    }

    #[test]
    fn test_header_layout() {
        let header = PageHeader {
            page_type: PageType::TableInterior,
            cell_count: 3,
            content_start: 488,
            right_page: 9,
            parent_page: NO_PAGE,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes[0], 0x05);
        assert_eq!(&bytes[2..4], &[0x00, 0x03]);
        assert_eq!(&bytes[4..6], &[0x01, 0xE8]);
        assert_eq!(&bytes[6..10], &[0, 0, 0, 9]);
        assert_eq!(&bytes[10..14], &[0xFF, 0xFF, 0xFF, 0xFF]);

        let parsed = PageHeader::from_bytes(0, &bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_empty_header() {
        let header = PageHeader::new(PageType::IndexLeaf, NO_PAGE, 4);
        assert_eq!(header.content_start, PAGE_SIZE as u32);
        assert_eq!(header.free_space(), USABLE_SPACE);

        let parsed = PageHeader::from_bytes(1, &header.to_bytes()).unwrap();
        assert_eq!(parsed.parent_page, 4);
        assert_eq!(parsed.cell_count, 0);
    }

    #[test]
    fn test_zeroed_page_rejected() {
        let err = PageHeader::from_bytes(3, &[0u8; PAGE_SIZE]).unwrap_err();
        assert!(matches!(err, TabulaError::PageCorrupted { page_no: 3, .. }));
    }

    #[test]
    fn test_overlapping_header_rejected() {
        let mut header = PageHeader::new(PageType::TableLeaf, NO_PAGE, NO_PAGE);
        header.cell_count = 100;
        header.content_start = 100;
        assert!(PageHeader::from_bytes(0, &header.to_bytes()).is_err());
    }

    #[test]
    fn test_page_type_serde_roundtrip() {
        let json = serde_json::to_string(&PageType::IndexInterior).unwrap();
        let parsed: PageType = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, PageType::IndexInterior);
    }
}
