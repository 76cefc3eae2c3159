//! Entry placement and splitting for index pages.
//!
//! Index pages keep their cells sorted by key. Keys are unique across the
//! whole tree: adding a key that is already present merges row id sets.

use super::{set_parent, Page};
use crate::disk::PageFile;
use crate::record::IndexEntry;
use tabula_common::page::{PageNo, PageType, NO_PAGE, USABLE_SPACE};
use tabula_common::{Result, TabulaError};
use tracing::debug;

/// Adds `entry` to page `page_no`, merging with an equal key if present.
///
/// Entries added to an interior page must carry a left child. Every
/// capacity check happens before the first write.
pub fn add_index_entry(file: &PageFile, page_no: PageNo, entry: IndexEntry) -> Result<()> {
    let page = Page::load(file, page_no)?;
    let entries = page.index_entries()?;

    match entries.binary_search_by(|e| e.key.compare(&entry.key)) {
        Ok(slot) => {
            let mut merged = entries[slot].clone();
            if merged.merge(&entry.row_ids) == 0 {
                return Ok(());
            }
            merged.check_capacity()?;
            place_entry(file, page, slot, merged, true)
        }
        Err(slot) => {
            entry.check_capacity()?;
            place_entry(file, page, slot, entry, false)
        }
    }
}

/// Replaces the entry at `slot` of page `page_no`.
pub fn replace_index_entry(file: &PageFile, page_no: PageNo, slot: usize, entry: IndexEntry) -> Result<()> {
    entry.check_capacity()?;
    let page = Page::load(file, page_no)?;
    place_entry(file, page, slot, entry, true)
}

fn place_entry(file: &PageFile, mut page: Page, slot: usize, entry: IndexEntry, replacing: bool) -> Result<()> {
    if page.is_leaf() != entry.left_child.is_none() {
        return Err(TabulaError::Internal(format!(
            "index entry {} does not match page {} of type {:?}",
            entry.key,
            page.page_no(),
            page.page_type()
        )));
    }
    let cell = entry.encode()?;

    if replacing {
        if page.cell(slot)?.len() == cell.len() {
            page.overwrite_cell(slot, &cell)?;
            return page.save(file);
        }
        page.delete_cell(slot)?;
    }

    if !page.fits(cell.len()) && page.fits_after_compaction(cell.len())? {
        page.compact()?;
    }
    if page.fits(cell.len()) {
        page.insert_cell(slot, &cell)?;
        return page.save(file);
    }

    let mut entries = page.index_entries()?;
    entries.insert(slot, entry);
    split_index_page(file, page, entries)
}

/// Picks the entry to promote so that both remaining halves fit on a page,
/// preferring the most even split by bytes.
fn choose_split(sizes: &[usize]) -> Option<usize> {
    let total: usize = sizes.iter().sum();
    let mut best: Option<(usize, usize)> = None;
    let mut left = 0;
    for (m, &size) in sizes.iter().enumerate() {
        let right = total - left - size;
        if left <= USABLE_SPACE && right <= USABLE_SPACE {
            let imbalance = left.abs_diff(right);
            if best.map_or(true, |(_, b)| imbalance < b) {
                best = Some((m, imbalance));
            }
        }
        left += size;
    }
    best.map(|(m, _)| m)
}

/// Splits an overflowing index page.
///
/// `entries` is the page's full sorted contents including the entry that
/// did not fit. Entries below the split point move to a new left sibling,
/// the split entry is promoted into the parent, and the rest stay.
fn split_index_page(file: &PageFile, mut page: Page, entries: Vec<IndexEntry>) -> Result<()> {
    let interior = !page.is_leaf();
    let sizes: Vec<usize> = entries.iter().map(|e| e.cell_size(interior) + 2).collect();
    let m = choose_split(&sizes).ok_or_else(|| {
        TabulaError::Capacity(format!(
            "{} index entries cannot be divided across two pages",
            entries.len()
        ))
    })?;

    let page_no = page.page_no();
    let parent_no = page.parent_page();

    let mut lower = entries;
    let mut upper = lower.split_off(m);
    let mut promoted = upper.remove(0);

    let lower_cells = lower.iter().map(IndexEntry::encode).collect::<Result<Vec<_>>>()?;
    let upper_cells = upper.iter().map(IndexEntry::encode).collect::<Result<Vec<_>>>()?;

    let mut left = Page::allocate(file, page.page_type(), NO_PAGE, parent_no)?;
    let left_no = left.page_no();
    left.rebuild(&lower_cells)?;
    if interior {
        // The promoted key's old left subtree becomes the new page's rightmost child.
        let orphan = promoted.left_child.ok_or_else(|| {
            TabulaError::Internal(format!("interior entry {} has no left child", promoted.key))
        })?;
        left.set_right_page(orphan);
    }
    left.save(file)?;
    if interior {
        for child in left.children()? {
            set_parent(file, child, left_no)?;
        }
    }

    page.rebuild(&upper_cells)?;
    page.save(file)?;
    promoted.left_child = Some(left_no);

    debug!(
        page = page_no,
        left = left_no,
        lower = lower.len(),
        upper = upper.len(),
        key = %promoted.key,
        "split index page"
    );

    if parent_no == NO_PAGE {
        let mut root = Page::allocate(file, PageType::IndexInterior, page_no, NO_PAGE)?;
        let root_no = root.page_no();
        root.append_cell(&promoted.encode()?)?;
        root.save(file)?;
        set_parent(file, page_no, root_no)?;
        set_parent(file, left_no, root_no)?;
        debug!(root = root_no, "new index root");
        return Ok(());
    }

    add_index_entry(file, parent_no, promoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{Attribute, Value};
    use crate::disk::PageFileOptions;
    use tempfile::tempdir;

    fn create_test_file() -> (PageFile, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let options = PageFileOptions {
            fsync_enabled: false,
            cache_root: true,
        };
        let file = PageFile::create(dir.path().join("t_c.ndx"), PageType::IndexLeaf, options).unwrap();
        (file, dir)
    }

    fn entry(key: i32, row_ids: &[u32]) -> IndexEntry {
        IndexEntry::new(Attribute::new(Value::Int(key)).unwrap(), row_ids.to_vec())
    }

    #[test]
    fn test_entries_kept_sorted() {
        let (file, _dir) = create_test_file();
        for key in [5, 1, 3] {
            add_index_entry(&file, 0, entry(key, &[key as u32])).unwrap();
        }
        let keys: Vec<Value> = Page::load(&file, 0)
            .unwrap()
            .index_entries()
            .unwrap()
            .into_iter()
            .map(|e| e.key.into_value())
            .collect();
        assert_eq!(keys, vec![Value::Int(1), Value::Int(3), Value::Int(5)]);
    }

    #[test]
    fn test_equal_key_merges() {
        let (file, _dir) = create_test_file();
        add_index_entry(&file, 0, entry(7, &[1])).unwrap();
        add_index_entry(&file, 0, entry(7, &[3, 1])).unwrap();
        add_index_entry(&file, 0, entry(7, &[1])).unwrap();

        let entries = Page::load(&file, 0).unwrap().index_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].row_ids, vec![1, 3]);
    }

    #[test]
    fn test_leaf_split_promotes_into_new_root() {
        let (file, _dir) = create_test_file();
        // 12-byte cells plus pointers: 35 fit on a page.
        for key in 0..40 {
            add_index_entry(&file, 0, entry(key, &[key as u32 + 1])).unwrap();
        }

        let root_no = file.root().unwrap();
        let root = Page::load(&file, root_no).unwrap();
        assert_eq!(root.page_type(), PageType::IndexInterior);
        assert_eq!(root.cell_count(), 1);
        assert_eq!(root.right_page(), 0);

        let separator = &root.index_entries().unwrap()[0];
        let left = Page::load(&file, separator.left_child.unwrap()).unwrap();
        assert_eq!(left.parent_page(), root_no);
        for e in left.index_entries().unwrap() {
            assert!(e.key.compare(&separator.key).is_lt());
        }
        for e in Page::load(&file, 0).unwrap().index_entries().unwrap() {
            assert!(e.key.compare(&separator.key).is_gt());
        }
    }

    #[test]
    fn test_replace_entry() {
        let (file, _dir) = create_test_file();
        add_index_entry(&file, 0, entry(1, &[1, 2, 3])).unwrap();
        replace_index_entry(&file, 0, 0, entry(1, &[2])).unwrap();
        let entries = Page::load(&file, 0).unwrap().index_entries().unwrap();
        assert_eq!(entries[0].row_ids, vec![2]);
    }

    #[test]
    fn test_interior_entry_on_leaf_rejected() {
        let (file, _dir) = create_test_file();
        let err = add_index_entry(&file, 0, entry(1, &[1]).with_left_child(3)).unwrap_err();
        assert!(matches!(err, TabulaError::Internal(_)));
    }

    #[test]
    fn test_choose_split() {
        assert_eq!(choose_split(&[100, 100, 100, 100, 100]), Some(2));
        assert_eq!(choose_split(&[242, 496, 242]), Some(1));
        assert_eq!(choose_split(&[300, 300, 300, 300]), None);
    }
}
