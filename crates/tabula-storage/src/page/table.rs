//! Row placement and splitting for table pages.
//!
//! Interior pages route by row id: the left child of a cell owns every row
//! id up to and including the cell's boundary, and the right pointer owns
//! everything above the last boundary. Leaf right pointers link each leaf
//! to the next one and play no part in routing.

use super::{set_parent, Page};
use crate::disk::PageFile;
use crate::record::TableInteriorEntry;
use std::ops::Range;
use tabula_common::page::{PageNo, PageType, NO_PAGE, USABLE_SPACE};
use tabula_common::{Result, TabulaError};
use tracing::debug;

/// Appends a row cell to the tail leaf `leaf_no`.
///
/// When the leaf is full a new right sibling is created and the row is
/// written there. Returns the page the row landed on.
pub fn append_table_row(file: &PageFile, leaf_no: PageNo, cell: &[u8]) -> Result<PageNo> {
    let mut leaf = Page::load(file, leaf_no)?;
    if leaf.page_type() != PageType::TableLeaf {
        return Err(TabulaError::Internal(format!(
            "row append on page {} of type {:?}",
            leaf_no,
            leaf.page_type()
        )));
    }

    if leaf.fits(cell.len()) {
        leaf.append_cell(cell)?;
        leaf.save(file)?;
        return Ok(leaf_no);
    }
    if leaf.fits_after_compaction(cell.len())? {
        leaf.compact()?;
        leaf.append_cell(cell)?;
        leaf.save(file)?;
        return Ok(leaf_no);
    }

    let boundary = leaf.row_id_at(leaf.cell_count() - 1)?;
    let mut sibling = Page::allocate(file, PageType::TableLeaf, leaf.right_page(), leaf.parent_page())?;
    let sibling_no = sibling.page_no();
    sibling.append_cell(cell)?;
    sibling.save(file)?;

    leaf.set_right_page(sibling_no);
    leaf.save(file)?;
    debug!(leaf = leaf_no, sibling = sibling_no, boundary, "split table leaf at tail");

    link_table_sibling(file, leaf_no, boundary, sibling_no)?;
    Ok(sibling_no)
}

/// Replaces the row at `slot` of `leaf_no` with `cell`, which must carry the
/// same row id. Used when an update changes the row's width.
///
/// Returns the page the row landed on.
pub fn replace_table_row(file: &PageFile, leaf_no: PageNo, slot: usize, cell: &[u8]) -> Result<PageNo> {
    let mut leaf = Page::load(file, leaf_no)?;
    leaf.delete_cell(slot)?;

    if leaf.fits(cell.len()) {
        leaf.insert_cell(slot, cell)?;
        leaf.save(file)?;
        return Ok(leaf_no);
    }
    if leaf.fits_after_compaction(cell.len())? {
        leaf.compact()?;
        leaf.insert_cell(slot, cell)?;
        leaf.save(file)?;
        return Ok(leaf_no);
    }

    let mut cells = leaf.cells()?;
    cells.insert(slot, cell.to_vec());
    let groups = pack_cells(&cells)?;
    let old_right = leaf.right_page();

    let mut pages = vec![leaf_no];
    for _ in 1..groups.len() {
        pages.push(file.allocate_page(PageType::TableLeaf, NO_PAGE, NO_PAGE)?);
    }

    let mut first = Some(leaf);
    let mut boundaries = Vec::with_capacity(groups.len());
    for (i, group) in groups.iter().enumerate() {
        let mut page = match first.take() {
            Some(page) => page,
            None => Page::load(file, pages[i])?,
        };
        page.rebuild(&cells[group.clone()])?;
        page.set_right_page(pages.get(i + 1).copied().unwrap_or(old_right));
        page.save(file)?;
        boundaries.push(page.row_id_at(page.cell_count() - 1)?);
    }
    debug!(leaf = leaf_no, pages = ?pages, "split table leaf for relocated row");

    for i in 1..pages.len() {
        link_table_sibling(file, pages[i - 1], boundaries[i - 1], pages[i])?;
    }

    let home = groups
        .iter()
        .position(|group| group.contains(&slot))
        .map(|i| pages[i])
        .unwrap_or(leaf_no);
    Ok(home)
}

/// Splits consecutive cells into groups that each fit on one page.
///
/// Prefers two groups of similar size, falling back to greedy packing
/// when no two-way split fits.
fn pack_cells(cells: &[Vec<u8>]) -> Result<Vec<Range<usize>>> {
    let sizes: Vec<usize> = cells.iter().map(|c| c.len() + 2).collect();
    let total: usize = sizes.iter().sum();
    if total <= USABLE_SPACE {
        return Ok(vec![0..cells.len()]);
    }

    let mut best: Option<(usize, usize)> = None;
    let mut left = 0;
    for m in 1..cells.len() {
        left += sizes[m - 1];
        let right = total - left;
        if left <= USABLE_SPACE && right <= USABLE_SPACE {
            let imbalance = left.abs_diff(right);
            if best.map_or(true, |(_, b)| imbalance < b) {
                best = Some((m, imbalance));
            }
        }
    }
    if let Some((m, _)) = best {
        return Ok(vec![0..m, m..cells.len()]);
    }

    let mut groups = Vec::new();
    let mut start = 0;
    let mut used = 0;
    for (i, &size) in sizes.iter().enumerate() {
        if size > USABLE_SPACE {
            return Err(TabulaError::Capacity(format!("cell of {} bytes exceeds a page", size)));
        }
        if used + size > USABLE_SPACE {
            groups.push(start..i);
            start = i;
            used = 0;
        }
        used += size;
    }
    groups.push(start..cells.len());
    Ok(groups)
}

/// Makes `new_no` the sibling immediately after `left_no` in their parent.
///
/// `boundary` is the largest row id left under `left_no`. Creates a new
/// root when `left_no` has no parent and splits the parent when it is full.
fn link_table_sibling(file: &PageFile, left_no: PageNo, boundary: u32, new_no: PageNo) -> Result<()> {
    let left = Page::load(file, left_no)?;
    let parent_no = left.parent_page();

    if parent_no == NO_PAGE {
        let mut root = Page::allocate(file, PageType::TableInterior, new_no, NO_PAGE)?;
        let root_no = root.page_no();
        root.append_cell(&TableInteriorEntry::new(left_no, boundary).to_bytes())?;
        root.save(file)?;
        set_parent(file, left_no, root_no)?;
        set_parent(file, new_no, root_no)?;
        debug!(root = root_no, left = left_no, right = new_no, boundary, "new table root");
        return Ok(());
    }

    let mut parent = Page::load(file, parent_no)?;
    let cell_len = TableInteriorEntry::SIZE;

    if parent.right_page() == left_no {
        if !parent.fits(cell_len) && parent.fits_after_compaction(cell_len)? {
            parent.compact()?;
        }
        if parent.fits(cell_len) {
            parent.append_cell(&TableInteriorEntry::new(left_no, boundary).to_bytes())?;
            parent.set_right_page(new_no);
            parent.save(file)?;
            return set_parent(file, new_no, parent_no);
        }
        return split_interior_at_tail(file, parent, boundary, new_no);
    }

    let mut entries = parent.interior_entries()?;
    let slot = entries
        .iter()
        .position(|e| e.left_child == left_no)
        .ok_or_else(|| TabulaError::PageCorrupted {
            page_no: parent_no,
            reason: format!("page {} lists parent {} but is not its child", left_no, parent_no),
        })?;
    let inserted = TableInteriorEntry::new(new_no, entries[slot].row_id);
    entries[slot].row_id = boundary;
    parent.overwrite_cell(slot, &entries[slot].to_bytes())?;

    if !parent.fits(cell_len) && parent.fits_after_compaction(cell_len)? {
        parent.compact()?;
    }
    if parent.fits(cell_len) {
        parent.insert_cell(slot + 1, &inserted.to_bytes())?;
        parent.save(file)?;
        return set_parent(file, new_no, parent_no);
    }

    entries.insert(slot + 1, inserted);
    set_parent(file, new_no, parent_no)?;
    split_interior_in_middle(file, parent, entries)
}

/// Splits a full interior page whose right pointer just split.
///
/// The page keeps its cells and its right pointer. A new empty interior
/// page takes `new_no` as its right pointer and is linked after it.
fn split_interior_at_tail(file: &PageFile, page: Page, boundary: u32, new_no: PageNo) -> Result<()> {
    let page_no = page.page_no();
    let sibling = Page::allocate(file, PageType::TableInterior, new_no, page.parent_page())?;
    let sibling_no = sibling.page_no();
    set_parent(file, new_no, sibling_no)?;
    debug!(page = page_no, sibling = sibling_no, boundary, "split table interior at tail");

    link_table_sibling(file, page_no, boundary, sibling_no)
}

/// Splits a full interior page around its middle cell.
///
/// `entries` is the page's full routing list including the cell that did
/// not fit. The middle cell's child becomes the right pointer of the lower
/// half and its boundary separates the two halves in the parent.
fn split_interior_in_middle(file: &PageFile, mut page: Page, entries: Vec<TableInteriorEntry>) -> Result<()> {
    let page_no = page.page_no();
    let old_right = page.right_page();
    let m = entries.len() / 2;
    let separator = entries[m];

    let lower: Vec<[u8; TableInteriorEntry::SIZE]> = entries[..m].iter().map(|e| e.to_bytes()).collect();
    let upper: Vec<[u8; TableInteriorEntry::SIZE]> = entries[m + 1..].iter().map(|e| e.to_bytes()).collect();

    page.rebuild(&lower)?;
    page.set_right_page(separator.left_child);
    page.save(file)?;

    let mut sibling = Page::allocate(file, PageType::TableInterior, old_right, page.parent_page())?;
    let sibling_no = sibling.page_no();
    sibling.rebuild(&upper)?;
    sibling.save(file)?;

    for child in sibling.children()? {
        set_parent(file, child, sibling_no)?;
    }
    debug!(
        page = page_no,
        sibling = sibling_no,
        boundary = separator.row_id,
        "split table interior"
    );

    link_table_sibling(file, page_no, separator.row_id, sibling_no)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{Attribute, Value};
    use crate::disk::PageFileOptions;
    use crate::record::TableRecord;
    use tempfile::tempdir;

    fn create_test_file() -> (PageFile, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let options = PageFileOptions {
            fsync_enabled: false,
            cache_root: true,
        };
        let file = PageFile::create(dir.path().join("t.tbl"), PageType::TableLeaf, options).unwrap();
        (file, dir)
    }

    fn row(row_id: u32, name: &str) -> Vec<u8> {
        TableRecord::encode(
            row_id,
            &[
                Attribute::new(Value::Int(row_id as i32)).unwrap(),
                Attribute::new(Value::text(name)).unwrap(),
            ],
        )
        .unwrap()
    }

    /// Appends rows 1..=n, always at the rightmost leaf.
    fn append_rows(file: &PageFile, n: u32, name: &str) -> PageNo {
        let mut tail = 0;
        for id in 1..=n {
            tail = append_table_row(file, tail, &row(id, name)).unwrap();
        }
        tail
    }

    /// Collects row ids in key order by walking the tree from the root.
    fn collect(file: &PageFile, page_no: PageNo, out: &mut Vec<u32>) {
        let page = Page::load(file, page_no).unwrap();
        if page.is_leaf() {
            for record in page.records().unwrap() {
                out.push(record.row_id);
            }
            return;
        }
        let entries = page.interior_entries().unwrap();
        for entry in &entries {
            let start = out.len();
            collect(file, entry.left_child, out);
            assert!(out[start..].iter().all(|&id| id <= entry.row_id));
            assert_eq!(Page::load(file, entry.left_child).unwrap().parent_page(), page_no);
        }
        assert_eq!(Page::load(file, page.right_page()).unwrap().parent_page(), page_no);
        let start = out.len();
        collect(file, page.right_page(), out);
        if let Some(last) = entries.last() {
            assert!(out[start..].iter().all(|&id| id > last.row_id));
        }
        for pair in entries.windows(2) {
            assert!(pair[0].row_id < pair[1].row_id);
        }
    }

    #[test]
    fn test_first_split_creates_root() {
        let (file, _dir) = create_test_file();
        let tail = append_rows(&file, 40, "name");
        assert_ne!(tail, 0);

        let root = file.root().unwrap();
        let root_page = Page::load(&file, root).unwrap();
        assert_eq!(root_page.page_type(), PageType::TableInterior);
        assert_eq!(root_page.right_page(), tail);

        let leaf0 = Page::load(&file, 0).unwrap();
        assert_eq!(leaf0.parent_page(), root);
        assert_eq!(leaf0.right_page(), Page::load(&file, root).unwrap().child_at(1).unwrap());
    }

    #[test]
    fn test_many_rows_keep_order_and_routing() {
        let (file, _dir) = create_test_file();
        // Enough rows to split the root interior page several times.
        append_rows(&file, 3000, "n");

        let mut ids = Vec::new();
        collect(&file, file.root().unwrap(), &mut ids);
        assert_eq!(ids, (1..=3000).collect::<Vec<_>>());
    }

    #[test]
    fn test_replace_in_place_when_room() {
        let (file, _dir) = create_test_file();
        append_rows(&file, 3, "abc");
        let home = replace_table_row(&file, 0, 1, &row(2, "a much longer name")).unwrap();
        assert_eq!(home, 0);

        let page = Page::load(&file, 0).unwrap();
        let record = page.record(1).unwrap();
        assert_eq!(record.row_id, 2);
        assert_eq!(record.attributes[1].value(), &Value::text("a much longer name"));
    }

    #[test]
    fn test_replace_splits_full_leaf() {
        let (file, _dir) = create_test_file();
        let tail = append_rows(&file, 60, "name");
        assert_ne!(tail, 0);

        // Grow a row in the middle of the full first leaf.
        let leaf = Page::load(&file, 0).unwrap();
        let slot = leaf.cell_count() / 2;
        let row_id = leaf.row_id_at(slot).unwrap();
        let wide = "w".repeat(200);
        let home = replace_table_row(&file, 0, slot, &row(row_id, &wide)).unwrap();

        let page = Page::load(&file, home).unwrap();
        let moved = page
            .records()
            .unwrap()
            .into_iter()
            .find(|r| r.row_id == row_id)
            .unwrap();
        assert_eq!(moved.attributes[1].value(), &Value::text(wide));

        let mut ids = Vec::new();
        collect(&file, file.root().unwrap(), &mut ids);
        assert_eq!(ids, (1..=60).collect::<Vec<_>>());
    }

    #[test]
    fn test_pack_cells_balances_two_pages() {
        let cells: Vec<Vec<u8>> = (0..30).map(|_| vec![0u8; 30]).collect();
        let groups = pack_cells(&cells).unwrap();
        assert_eq!(groups, vec![0..15, 15..30]);
    }

    #[test]
    fn test_pack_cells_three_pages() {
        let cells = vec![vec![0u8; 240], vec![0u8; 490], vec![0u8; 240]];
        let groups = pack_cells(&cells).unwrap();
        assert_eq!(groups, vec![0..1, 1..2, 2..3]);
    }
}
