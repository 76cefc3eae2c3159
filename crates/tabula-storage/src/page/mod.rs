//! Slotted pages for table and index trees.
//!
//! Page layout:
//! ```text
//! +----------------+------------------------+--------------+-------------+
//! | PageHeader     | Cell pointers (2B each)| Free space   | Cells       |
//! | (16 bytes)     | grows downward ->      |              | <- grow up  |
//! +----------------+------------------------+--------------+-------------+
//! ```
//!
//! Cells are written from the end of the page toward the header. The
//! pointer array is kept in key order; removing a pointer leaves the
//! cell bytes in place until the page is compacted.

mod index;
mod table;

pub use index::{add_index_entry, replace_index_entry};
pub use table::{append_table_row, replace_table_row};

use crate::attribute::Attribute;
use crate::disk::PageFile;
use crate::record::{cell_size_at, IndexEntry, TableInteriorEntry, TableRecord};
use tabula_common::page::{PageHeader, PageNo, PageType, PAGE_SIZE, USABLE_SPACE};
use tabula_common::{Result, TabulaError};
use tracing::trace;

/// A page read from a file, decoded lazily.
pub struct Page {
    page_no: PageNo,
    header: PageHeader,
    data: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    /// Reads a page and validates its header.
    pub fn load(file: &PageFile, page_no: PageNo) -> Result<Self> {
        let data = file.read_page(page_no)?;
        let header = PageHeader::from_bytes(page_no, &data[..])?;
        Ok(Self {
            page_no,
            header,
            data,
        })
    }

    /// Appends a new empty page to the file.
    pub fn allocate(file: &PageFile, page_type: PageType, right_page: PageNo, parent_page: PageNo) -> Result<Self> {
        let page_no = file.allocate_page(page_type, right_page, parent_page)?;
        let header = PageHeader::new(page_type, right_page, parent_page);
        let mut data = Box::new([0u8; PAGE_SIZE]);
        data[..PageHeader::SIZE].copy_from_slice(&header.to_bytes());
        Ok(Self {
            page_no,
            header,
            data,
        })
    }

    /// Writes the page back to its file.
    pub fn save(&mut self, file: &PageFile) -> Result<()> {
        self.data[..PageHeader::SIZE].copy_from_slice(&self.header.to_bytes());
        file.write_page(self.page_no, &self.data)
    }

    pub fn page_no(&self) -> PageNo {
        self.page_no
    }

    pub fn page_type(&self) -> PageType {
        self.header.page_type
    }

    pub fn is_leaf(&self) -> bool {
        self.header.page_type.is_leaf()
    }

    pub fn cell_count(&self) -> usize {
        self.header.cell_count as usize
    }

    pub fn right_page(&self) -> PageNo {
        self.header.right_page
    }

    pub fn parent_page(&self) -> PageNo {
        self.header.parent_page
    }

    pub fn set_right_page(&mut self, page_no: PageNo) {
        self.header.right_page = page_no;
    }

    pub fn set_parent_page(&mut self, page_no: PageNo) {
        self.header.parent_page = page_no;
    }

    /// Contiguous bytes between the pointer array and the cells.
    pub fn free_space(&self) -> usize {
        self.header.free_space()
    }

    /// True if a cell of `len` bytes can be inserted without compaction.
    pub fn fits(&self, len: usize) -> bool {
        len + 2 <= self.free_space()
    }

    /// True if a cell of `len` bytes fits once deleted cells are reclaimed.
    pub fn fits_after_compaction(&self, len: usize) -> Result<bool> {
        Ok(self.live_space()? + len + 2 <= USABLE_SPACE)
    }

    /// Bytes used by live cells and their pointers.
    pub fn live_space(&self) -> Result<usize> {
        let mut used = 2 * self.cell_count();
        for slot in 0..self.cell_count() {
            used += self.cell(slot)?.len();
        }
        Ok(used)
    }

    fn pointer_pos(slot: usize) -> usize {
        PageHeader::SIZE + 2 * slot
    }

    fn cell_offset(&self, slot: usize) -> Result<usize> {
        if slot >= self.cell_count() {
            return Err(TabulaError::Internal(format!(
                "slot {} out of range on page {} with {} cells",
                slot,
                self.page_no,
                self.cell_count()
            )));
        }
        let pos = Self::pointer_pos(slot);
        let offset = u16::from_be_bytes([self.data[pos], self.data[pos + 1]]) as usize;
        if offset < self.header.content_start as usize || offset >= PAGE_SIZE {
            return Err(TabulaError::PageCorrupted {
                page_no: self.page_no,
                reason: format!("cell pointer {} at slot {} outside cell area", offset, slot),
            });
        }
        Ok(offset)
    }

    /// Raw bytes of the cell at `slot`.
    pub fn cell(&self, slot: usize) -> Result<&[u8]> {
        let offset = self.cell_offset(slot)?;
        let len = cell_size_at(self.page_type(), &self.data[offset..]).map_err(|e| {
            TabulaError::PageCorrupted {
                page_no: self.page_no,
                reason: e.to_string(),
            }
        })?;
        Ok(&self.data[offset..offset + len])
    }

    /// Copies of every live cell, in pointer order.
    pub fn cells(&self) -> Result<Vec<Vec<u8>>> {
        (0..self.cell_count())
            .map(|slot| self.cell(slot).map(<[u8]>::to_vec))
            .collect()
    }

    /// Inserts a cell so that it occupies pointer slot `slot`.
    pub fn insert_cell(&mut self, slot: usize, cell: &[u8]) -> Result<()> {
        let count = self.cell_count();
        if slot > count {
            return Err(TabulaError::Internal(format!(
                "insert at slot {} past {} cells on page {}",
                slot, count, self.page_no
            )));
        }
        if !self.fits(cell.len()) {
            return Err(TabulaError::Internal(format!(
                "cell of {} bytes does not fit on page {} ({} free)",
                cell.len(),
                self.page_no,
                self.free_space()
            )));
        }

        let offset = self.header.content_start as usize - cell.len();
        self.data[offset..offset + cell.len()].copy_from_slice(cell);

        let start = Self::pointer_pos(slot);
        let end = Self::pointer_pos(count);
        self.data.copy_within(start..end, start + 2);
        self.data[start..start + 2].copy_from_slice(&(offset as u16).to_be_bytes());

        self.header.cell_count += 1;
        self.header.content_start = offset as u32;
        trace!(page_no = self.page_no, slot, len = cell.len(), "inserted cell");
        Ok(())
    }

    pub fn append_cell(&mut self, cell: &[u8]) -> Result<()> {
        self.insert_cell(self.cell_count(), cell)
    }

    /// Removes a pointer slot, shifting later slots left.
    ///
    /// The cell bytes stay where they are until the page is compacted.
    pub fn delete_cell(&mut self, slot: usize) -> Result<()> {
        self.cell_offset(slot)?;
        let count = self.cell_count();
        let start = Self::pointer_pos(slot);
        let end = Self::pointer_pos(count);
        self.data.copy_within(start + 2..end, start);
        self.data[end - 2..end].fill(0);

        self.header.cell_count -= 1;
        if self.header.cell_count == 0 {
            self.header.content_start = PAGE_SIZE as u32;
        }
        trace!(page_no = self.page_no, slot, "deleted cell");
        Ok(())
    }

    /// Replaces a cell with one of identical length.
    pub fn overwrite_cell(&mut self, slot: usize, cell: &[u8]) -> Result<()> {
        let offset = self.cell_offset(slot)?;
        let old_len = self.cell(slot)?.len();
        if old_len != cell.len() {
            return Err(TabulaError::Internal(format!(
                "overwrite of {} byte cell with {} bytes on page {}",
                old_len,
                cell.len(),
                self.page_no
            )));
        }
        self.data[offset..offset + old_len].copy_from_slice(cell);
        Ok(())
    }

    /// Replaces all cells, repacking them from the end of the page.
    pub fn rebuild<C: AsRef<[u8]>>(&mut self, cells: &[C]) -> Result<()> {
        let needed: usize = cells.iter().map(|c| c.as_ref().len() + 2).sum();
        if needed > USABLE_SPACE {
            return Err(TabulaError::Internal(format!(
                "{} bytes of cells do not fit on page {}",
                needed, self.page_no
            )));
        }

        self.data[PageHeader::SIZE..].fill(0);
        self.header.cell_count = 0;
        self.header.content_start = PAGE_SIZE as u32;
        for cell in cells {
            self.append_cell(cell.as_ref())?;
        }
        Ok(())
    }

    /// Reclaims the space of deleted cells.
    pub fn compact(&mut self) -> Result<()> {
        let cells = self.cells()?;
        let before = self.free_space();
        self.rebuild(&cells)?;
        trace!(
            page_no = self.page_no,
            reclaimed = self.free_space() - before,
            "compacted page"
        );
        Ok(())
    }

    fn expect_type(&self, expected: PageType) -> Result<()> {
        if self.page_type() != expected {
            return Err(TabulaError::PageCorrupted {
                page_no: self.page_no,
                reason: format!("expected {:?}, found {:?}", expected, self.page_type()),
            });
        }
        Ok(())
    }

    /// Row id of the table-leaf cell at `slot`, without decoding columns.
    pub fn row_id_at(&self, slot: usize) -> Result<u32> {
        self.expect_type(PageType::TableLeaf)?;
        let cell = self.cell(slot)?;
        if cell.len() < 6 {
            return Err(TabulaError::PageCorrupted {
                page_no: self.page_no,
                reason: format!("row cell at slot {} truncated", slot),
            });
        }
        Ok(u32::from_be_bytes([cell[2], cell[3], cell[4], cell[5]]))
    }

    /// Decodes the row at `slot` of a table leaf.
    pub fn record(&self, slot: usize) -> Result<TableRecord> {
        self.expect_type(PageType::TableLeaf)?;
        let offset = self.cell_offset(slot)?;
        TableRecord::decode(slot as u16, offset as u16, self.cell(slot)?)
    }

    /// Decodes every row of a table leaf.
    pub fn records(&self) -> Result<Vec<TableRecord>> {
        (0..self.cell_count()).map(|slot| self.record(slot)).collect()
    }

    /// Decodes the routing cells of a table interior page.
    pub fn interior_entries(&self) -> Result<Vec<TableInteriorEntry>> {
        self.expect_type(PageType::TableInterior)?;
        (0..self.cell_count())
            .map(|slot| TableInteriorEntry::from_bytes(self.cell(slot)?))
            .collect()
    }

    /// Decodes the entries of an index page, in key order.
    pub fn index_entries(&self) -> Result<Vec<IndexEntry>> {
        let interior = match self.page_type() {
            PageType::IndexLeaf => false,
            PageType::IndexInterior => true,
            other => {
                return Err(TabulaError::PageCorrupted {
                    page_no: self.page_no,
                    reason: format!("expected an index page, found {:?}", other),
                })
            }
        };
        (0..self.cell_count())
            .map(|slot| IndexEntry::decode(interior, self.cell(slot)?))
            .collect()
    }

    /// Child page reached through slot `i` of an interior page, where
    /// `i == cell_count` names the right pointer.
    pub fn child_at(&self, i: usize) -> Result<PageNo> {
        if i == self.cell_count() {
            return Ok(self.right_page());
        }
        let cell = self.cell(i)?;
        match self.page_type() {
            PageType::TableInterior | PageType::IndexInterior => {
                Ok(u32::from_be_bytes([cell[0], cell[1], cell[2], cell[3]]))
            }
            other => Err(TabulaError::Internal(format!(
                "page {} of type {:?} has no children",
                self.page_no, other
            ))),
        }
    }

    /// All children of an interior page, left to right.
    pub fn children(&self) -> Result<Vec<PageNo>> {
        (0..=self.cell_count()).map(|i| self.child_at(i)).collect()
    }

    /// Overwrites one column of a row if the new value has the same width.
    ///
    /// Returns false, leaving the page untouched, when the widths differ.
    pub fn update_record(&mut self, record: &TableRecord, ordinal: usize, value: &Attribute) -> Result<bool> {
        let old = record.attribute(ordinal).ok_or_else(|| {
            TabulaError::Internal(format!(
                "row {} has no column {}",
                record.row_id, ordinal
            ))
        })?;
        if old.len() != value.len() {
            return Ok(false);
        }

        let base = record.offset as usize;
        let code_pos = base + record.type_code_offset(ordinal);
        let value_pos = base + record.column_offset(ordinal);
        self.data[code_pos] = value.cell_code()?;
        self.data[value_pos..value_pos + value.len()].copy_from_slice(value.bytes());
        trace!(
            page_no = self.page_no,
            row_id = record.row_id,
            ordinal,
            "updated column in place"
        );
        Ok(true)
    }
}

/// Rewrites the parent pointer of a page.
pub fn set_parent(file: &PageFile, page_no: PageNo, parent: PageNo) -> Result<()> {
    let mut page = Page::load(file, page_no)?;
    if page.parent_page() != parent {
        page.set_parent_page(parent);
        page.save(file)?;
    }
    Ok(())
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("page_no", &self.page_no)
            .field("header", &self.header)
            .finish()
    }
}
