//! Cell encodings for rows, table routing entries and index entries.

use crate::attribute::Attribute;
use bytes::{Buf, BufMut, BytesMut};
use tabula_common::page::{PageNo, PageType, MAX_CELL_SIZE};
use tabula_common::types::DataType;
use tabula_common::{Result, TabulaError};

/// Header bytes of a table-leaf cell before the column count.
const ROW_CELL_PREFIX: usize = 2 + 4;

/// Returns the byte length of the cell starting at `buf`.
pub fn cell_size_at(page_type: PageType, buf: &[u8]) -> Result<usize> {
    let need = match page_type {
        PageType::TableLeaf | PageType::IndexLeaf => 2,
        PageType::TableInterior => TableInteriorEntry::SIZE,
        PageType::IndexInterior => 6,
    };
    if buf.len() < need {
        return Err(TabulaError::Format(format!(
            "{:?} cell truncated at {} bytes",
            page_type,
            buf.len()
        )));
    }

    let size = match page_type {
        PageType::TableLeaf => ROW_CELL_PREFIX + u16::from_be_bytes([buf[0], buf[1]]) as usize,
        PageType::TableInterior => TableInteriorEntry::SIZE,
        PageType::IndexLeaf => 2 + u16::from_be_bytes([buf[0], buf[1]]) as usize,
        PageType::IndexInterior => 6 + u16::from_be_bytes([buf[4], buf[5]]) as usize,
    };
    if size > buf.len() {
        return Err(TabulaError::Format(format!(
            "{:?} cell of {} bytes runs past the page",
            page_type, size
        )));
    }
    Ok(size)
}

/// One table row decoded from a leaf cell.
///
/// Layout:
/// - payload_len: 2 bytes (1 + column count + body length)
/// - row_id: 4 bytes
/// - column_count: 1 byte
/// - type codes: 1 byte per column
/// - body: each column's encoded bytes, in order
#[derive(Debug, Clone, PartialEq)]
pub struct TableRecord {
    pub row_id: u32,
    /// Position in the page's cell pointer array.
    pub slot: u16,
    /// Byte offset of the cell within the page.
    pub offset: u16,
    pub type_codes: Vec<u8>,
    pub attributes: Vec<Attribute>,
}

impl TableRecord {
    /// Builds the cell for a row.
    pub fn encode(row_id: u32, attributes: &[Attribute]) -> Result<Vec<u8>> {
        if attributes.len() > u8::MAX as usize {
            return Err(TabulaError::Capacity(format!(
                "{} columns exceed the 255 column limit",
                attributes.len()
            )));
        }

        let body_len: usize = attributes.iter().map(Attribute::len).sum();
        let payload_len = 1 + attributes.len() + body_len;
        let cell_len = ROW_CELL_PREFIX + payload_len;
        if cell_len > MAX_CELL_SIZE {
            return Err(TabulaError::Capacity(format!(
                "row of {} bytes exceeds the {} byte cell limit",
                cell_len, MAX_CELL_SIZE
            )));
        }

        let mut buf = BytesMut::with_capacity(cell_len);
        buf.put_u16(payload_len as u16);
        buf.put_u32(row_id);
        buf.put_u8(attributes.len() as u8);
        for attr in attributes {
            buf.put_u8(attr.cell_code()?);
        }
        for attr in attributes {
            buf.put_slice(attr.bytes());
        }
        Ok(buf.to_vec())
    }

    /// Decodes a table-leaf cell.
    pub fn decode(slot: u16, offset: u16, cell: &[u8]) -> Result<Self> {
        let mut buf = cell;
        if buf.remaining() < ROW_CELL_PREFIX + 1 {
            return Err(TabulaError::Format("row cell shorter than its header".to_string()));
        }
        let payload_len = buf.get_u16() as usize;
        let row_id = buf.get_u32();
        let column_count = buf.get_u8() as usize;
        if buf.remaining() < column_count || payload_len + ROW_CELL_PREFIX > cell.len() {
            return Err(TabulaError::Format(format!(
                "row {} cell truncated: payload {} in {} bytes",
                row_id,
                payload_len,
                cell.len()
            )));
        }

        let type_codes = buf[..column_count].to_vec();
        buf.advance(column_count);

        let mut attributes = Vec::with_capacity(column_count);
        for &code in &type_codes {
            let (_, width) = DataType::from_cell_code(code)
                .ok_or_else(|| TabulaError::Format(format!("unknown type code 0x{:02X}", code)))?;
            if buf.remaining() < width {
                return Err(TabulaError::Format(format!("row {} body truncated", row_id)));
            }
            attributes.push(Attribute::from_cell_code(code, &buf[..width])?);
            buf.advance(width);
        }

        Ok(Self {
            row_id,
            slot,
            offset,
            type_codes,
            attributes,
        })
    }

    /// Offset of column `ordinal`'s bytes relative to the cell start.
    pub fn column_offset(&self, ordinal: usize) -> usize {
        let preceding: usize = self.attributes[..ordinal].iter().map(Attribute::len).sum();
        ROW_CELL_PREFIX + 1 + self.attributes.len() + preceding
    }

    /// Offset of column `ordinal`'s type code relative to the cell start.
    pub fn type_code_offset(&self, ordinal: usize) -> usize {
        ROW_CELL_PREFIX + 1 + ordinal
    }

    pub fn cell_size(&self) -> usize {
        ROW_CELL_PREFIX + 1 + self.attributes.len() + self.attributes.iter().map(Attribute::len).sum::<usize>()
    }

    pub fn attribute(&self, ordinal: usize) -> Option<&Attribute> {
        self.attributes.get(ordinal)
    }
}

/// Routing cell of a table interior page.
///
/// Layout (8 bytes):
/// - left_child: 4 bytes
/// - row_id: 4 bytes (largest row id owned by left_child)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableInteriorEntry {
    pub left_child: PageNo,
    pub row_id: u32,
}

impl TableInteriorEntry {
    pub const SIZE: usize = 8;

    pub fn new(left_child: PageNo, row_id: u32) -> Self {
        Self { left_child, row_id }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.left_child.to_be_bytes());
        buf[4..8].copy_from_slice(&self.row_id.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(TabulaError::Format("interior cell truncated".to_string()));
        }
        let mut buf = buf;
        Ok(Self {
            left_child: buf.get_u32(),
            row_id: buf.get_u32(),
        })
    }
}

/// One key of a secondary index.
///
/// Layout:
/// - left_child: 4 bytes (interior pages only)
/// - payload_len: 2 bytes
/// - row_id_count: 1 byte
/// - key type code: 1 byte
/// - key bytes
/// - row ids: 4 bytes each, ascending
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub key: Attribute,
    /// Ascending and free of duplicates.
    pub row_ids: Vec<u32>,
    /// Set for entries of interior pages.
    pub left_child: Option<PageNo>,
}

impl IndexEntry {
    pub fn new(key: Attribute, mut row_ids: Vec<u32>) -> Self {
        row_ids.sort_unstable();
        row_ids.dedup();
        Self {
            key,
            row_ids,
            left_child: None,
        }
    }

    pub fn with_left_child(mut self, left_child: PageNo) -> Self {
        self.left_child = Some(left_child);
        self
    }

    /// Adds row ids, keeping the set sorted. Returns the number added.
    pub fn merge(&mut self, row_ids: &[u32]) -> usize {
        let before = self.row_ids.len();
        self.row_ids.extend_from_slice(row_ids);
        self.row_ids.sort_unstable();
        self.row_ids.dedup();
        self.row_ids.len() - before
    }

    /// Removes a row id. Returns false if it was absent.
    pub fn remove(&mut self, row_id: u32) -> bool {
        match self.row_ids.binary_search(&row_id) {
            Ok(pos) => {
                self.row_ids.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    fn payload_len(&self) -> usize {
        2 + self.key.len() + 4 * self.row_ids.len()
    }

    /// Encoded size on a leaf or interior page.
    pub fn cell_size(&self, interior: bool) -> usize {
        let prefix = if interior { 6 } else { 2 };
        prefix + self.payload_len()
    }

    /// Checks that this entry can be stored on any index page.
    pub fn check_capacity(&self) -> Result<()> {
        if self.row_ids.len() > u8::MAX as usize {
            return Err(TabulaError::Capacity(format!(
                "key {} would hold {} row ids, limit is 255",
                self.key,
                self.row_ids.len()
            )));
        }
        self.key.cell_code()?;
        // Any entry may be promoted into an interior page.
        let size = self.cell_size(true);
        if size > MAX_CELL_SIZE {
            return Err(TabulaError::Capacity(format!(
                "index entry of {} bytes exceeds the {} byte cell limit",
                size, MAX_CELL_SIZE
            )));
        }
        Ok(())
    }

    /// Encodes for a leaf page, or for an interior page when a left child is set.
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.check_capacity()?;
        let interior = self.left_child.is_some();
        let mut buf = BytesMut::with_capacity(self.cell_size(interior));
        if let Some(left_child) = self.left_child {
            buf.put_u32(left_child);
        }
        buf.put_u16(self.payload_len() as u16);
        buf.put_u8(self.row_ids.len() as u8);
        buf.put_u8(self.key.cell_code()?);
        buf.put_slice(self.key.bytes());
        for &row_id in &self.row_ids {
            buf.put_u32(row_id);
        }
        Ok(buf.to_vec())
    }

    pub fn decode(interior: bool, cell: &[u8]) -> Result<Self> {
        let mut buf = cell;
        let prefix = if interior { 6 } else { 2 };
        if buf.remaining() < prefix + 2 {
            return Err(TabulaError::Format("index cell shorter than its header".to_string()));
        }
        let left_child = if interior { Some(buf.get_u32()) } else { None };
        let _payload_len = buf.get_u16();
        let count = buf.get_u8() as usize;
        let code = buf.get_u8();

        let (_, key_len) = DataType::from_cell_code(code)
            .ok_or_else(|| TabulaError::Format(format!("unknown key type code 0x{:02X}", code)))?;
        if buf.remaining() < key_len + 4 * count {
            return Err(TabulaError::Format("index cell body truncated".to_string()));
        }
        let key = Attribute::from_cell_code(code, &buf[..key_len])?;
        buf.advance(key_len);

        let row_ids = (0..count).map(|_| buf.get_u32()).collect();

        Ok(Self {
            key,
            row_ids,
            left_child,
        })
    }
}
