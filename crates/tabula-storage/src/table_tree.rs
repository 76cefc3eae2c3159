//! Row-id keyed tree over the pages of one table file.

use crate::attribute::Attribute;
use crate::disk::PageFile;
use crate::index_tree::IndexTree;
use crate::page::{self, Page};
use crate::predicate::{CompareOp, Predicate};
use crate::record::TableRecord;
use std::collections::HashSet;
use std::sync::Arc;
use tabula_common::page::{PageNo, PageType};
use tabula_common::{Result, TabulaError};
use tracing::{debug, trace};

/// Outcome of a single-column update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    /// The row before the update.
    pub previous: TableRecord,
    /// Page holding the row afterwards.
    pub page_no: PageNo,
    /// True when the row had to be rewritten as a new cell.
    pub relocated: bool,
}

/// Table tree handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TableTree {
    file: Arc<PageFile>,
}

impl TableTree {
    pub fn new(file: Arc<PageFile>) -> Self {
        Self { file }
    }

    pub fn file(&self) -> &PageFile {
        &self.file
    }

    pub fn root(&self) -> Result<PageNo> {
        self.file.root()
    }

    /// Every leaf page, left to right.
    pub fn all_leaves(&self) -> Result<Vec<PageNo>> {
        let mut leaves = Vec::new();
        let mut seen = HashSet::new();
        self.collect_leaves(self.root()?, &mut leaves, &mut seen)?;
        Ok(leaves)
    }

    fn collect_leaves(&self, page_no: PageNo, leaves: &mut Vec<PageNo>, seen: &mut HashSet<PageNo>) -> Result<()> {
        if !seen.insert(page_no) {
            return Ok(());
        }
        let page = Page::load(&self.file, page_no)?;
        match page.page_type() {
            PageType::TableLeaf => leaves.push(page_no),
            PageType::TableInterior => {
                for child in page.children()? {
                    self.collect_leaves(child, leaves, seen)?;
                }
            }
            other => {
                return Err(TabulaError::PageCorrupted {
                    page_no,
                    reason: format!("{:?} page in a table tree", other),
                })
            }
        }
        Ok(())
    }

    /// Leaves that may hold rows matching `predicate`.
    ///
    /// Narrows through `index` when one is given for the predicate's column
    /// and the operator is not `<>`. Otherwise every leaf is returned.
    pub fn leaves_for(&self, predicate: Option<&Predicate>, index: Option<&IndexTree>) -> Result<Vec<PageNo>> {
        let (predicate, index) = match (predicate, index) {
            (Some(p), Some(i)) if p.op() != CompareOp::NotEqual => (p, i),
            _ => return self.all_leaves(),
        };

        let row_ids = index.lookup(predicate)?;
        let mut leaves = Vec::new();
        let mut seen = HashSet::new();
        for row_id in row_ids {
            let leaf = self.leaf_for_row(row_id)?;
            if seen.insert(leaf) {
                leaves.push(leaf);
            }
        }
        trace!(predicate = %predicate, leaves = leaves.len(), "narrowed scan through index");
        Ok(leaves)
    }

    /// Descends to the leaf whose range covers `row_id`.
    pub fn leaf_for_row(&self, row_id: u32) -> Result<PageNo> {
        let mut page_no = self.root()?;
        loop {
            let page = Page::load(&self.file, page_no)?;
            match page.page_type() {
                PageType::TableLeaf => return Ok(page_no),
                PageType::TableInterior => {
                    let entries = page.interior_entries()?;
                    let i = entries.partition_point(|e| e.row_id < row_id);
                    page_no = match entries.get(i) {
                        Some(entry) => entry.left_child,
                        None => page.right_page(),
                    };
                }
                other => {
                    return Err(TabulaError::PageCorrupted {
                        page_no,
                        reason: format!("{:?} page in a table tree", other),
                    })
                }
            }
        }
    }

    /// The tail leaf that receives new rows, and the next row id to assign.
    pub fn insertion_target(&self) -> Result<(PageNo, u32)> {
        let mut page_no = self.root()?;
        let mut max_row_id = 0;
        loop {
            let page = Page::load(&self.file, page_no)?;
            match page.page_type() {
                PageType::TableLeaf => {
                    if page.cell_count() > 0 {
                        max_row_id = max_row_id.max(page.row_id_at(page.cell_count() - 1)?);
                    }
                    let next = max_row_id
                        .checked_add(1)
                        .ok_or_else(|| TabulaError::Capacity(format!("row id {} is the last available", max_row_id)))?;
                    return Ok((page_no, next));
                }
                PageType::TableInterior => {
                    if let Some(last) = page.interior_entries()?.last() {
                        max_row_id = max_row_id.max(last.row_id);
                    }
                    page_no = page.right_page();
                }
                other => {
                    return Err(TabulaError::PageCorrupted {
                        page_no,
                        reason: format!("{:?} page in a table tree", other),
                    })
                }
            }
        }
    }

    /// Appends a row with the next row id. Returns the row id.
    pub fn insert(&self, attributes: &[Attribute]) -> Result<u32> {
        let (leaf_no, row_id) = self.insertion_target()?;
        let cell = TableRecord::encode(row_id, attributes)?;
        let landed = page::append_table_row(&self.file, leaf_no, &cell)?;
        trace!(row_id, page_no = landed, "inserted row");
        Ok(row_id)
    }

    /// Rows on the candidate leaves that satisfy `predicate`.
    pub fn scan(&self, predicate: Option<&Predicate>, index: Option<&IndexTree>) -> Result<Vec<TableRecord>> {
        let mut rows = Vec::new();
        for leaf_no in self.leaves_for(predicate, index)? {
            let page = Page::load(&self.file, leaf_no)?;
            for record in page.records()? {
                let keep = match predicate {
                    Some(p) => record.attribute(p.ordinal()).is_some_and(|a| p.matches(a)),
                    None => true,
                };
                if keep {
                    rows.push(record);
                }
            }
        }
        Ok(rows)
    }

    /// Locates a row by id.
    pub fn find_row(&self, row_id: u32) -> Result<Option<(PageNo, TableRecord)>> {
        let leaf_no = self.leaf_for_row(row_id)?;
        let page = Page::load(&self.file, leaf_no)?;
        for slot in 0..page.cell_count() {
            if page.row_id_at(slot)? == row_id {
                return Ok(Some((leaf_no, page.record(slot)?)));
            }
        }
        Ok(None)
    }

    /// Removes a row. Returns the removed row, if it existed.
    pub fn delete(&self, row_id: u32) -> Result<Option<TableRecord>> {
        let Some((leaf_no, record)) = self.find_row(row_id)? else {
            return Ok(None);
        };
        let mut page = Page::load(&self.file, leaf_no)?;
        page.delete_cell(record.slot as usize)?;
        page.save(&self.file)?;
        trace!(row_id, page_no = leaf_no, "deleted row");
        Ok(Some(record))
    }

    /// Sets column `ordinal` of a row.
    ///
    /// Writes in place when the encoded width is unchanged; otherwise the row
    /// is rewritten as a new cell under the same row id.
    pub fn update(&self, row_id: u32, ordinal: usize, value: Attribute) -> Result<Option<UpdateOutcome>> {
        let Some((leaf_no, record)) = self.find_row(row_id)? else {
            return Ok(None);
        };
        if ordinal >= record.attributes.len() {
            return Err(TabulaError::Internal(format!(
                "row {} has {} columns, no ordinal {}",
                row_id,
                record.attributes.len(),
                ordinal
            )));
        }

        let mut page = Page::load(&self.file, leaf_no)?;
        if page.update_record(&record, ordinal, &value)? {
            page.save(&self.file)?;
            return Ok(Some(UpdateOutcome {
                previous: record,
                page_no: leaf_no,
                relocated: false,
            }));
        }

        let mut attributes = record.attributes.clone();
        attributes[ordinal] = value;
        let cell = TableRecord::encode(row_id, &attributes)?;
        let landed = page::replace_table_row(&self.file, leaf_no, record.slot as usize, &cell)?;
        debug!(row_id, from = leaf_no, to = landed, "relocated row");

        Ok(Some(UpdateOutcome {
            previous: record,
            page_no: landed,
            relocated: true,
        }))
    }

    /// Number of rows across all leaves.
    pub fn row_count(&self) -> Result<usize> {
        let mut count = 0;
        for leaf_no in self.all_leaves()? {
            count += Page::load(&self.file, leaf_no)?.cell_count();
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Value;
    use crate::disk::PageFileOptions;
    use tabula_common::page::NO_PAGE;
    use tabula_common::types::DataType;
    use tempfile::tempdir;

    fn create_test_tree() -> (TableTree, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let options = PageFileOptions {
            fsync_enabled: false,
            cache_root: true,
        };
        let file = PageFile::create(dir.path().join("people.tbl"), PageType::TableLeaf, options).unwrap();
        (TableTree::new(Arc::new(file)), dir)
    }

    fn person(id: i32, name: &str) -> Vec<Attribute> {
        vec![
            Attribute::new(Value::Int(id)).unwrap(),
            Attribute::new(Value::text(name)).unwrap(),
        ]
    }

    fn id_pred(op: CompareOp, id: i32) -> Predicate {
        Predicate::new("id", 0, DataType::Int, op, Attribute::new(Value::Int(id)).unwrap())
    }

    #[test]
    fn test_row_ids_start_at_one() {
        let (tree, _dir) = create_test_tree();
        assert_eq!(tree.insertion_target().unwrap(), (0, 1));
        assert_eq!(tree.insert(&person(10, "a")).unwrap(), 1);
        assert_eq!(tree.insert(&person(20, "b")).unwrap(), 2);
        assert_eq!(tree.row_count().unwrap(), 2);
    }

    #[test]
    fn test_leaves_in_row_order() {
        let (tree, _dir) = create_test_tree();
        for i in 1..=200 {
            assert_eq!(tree.insert(&person(i, "someone")).unwrap(), i as u32);
        }

        let leaves = tree.all_leaves().unwrap();
        assert!(leaves.len() > 1);
        let mut ids = Vec::new();
        for leaf in &leaves {
            for record in Page::load(tree.file(), *leaf).unwrap().records().unwrap() {
                ids.push(record.row_id);
            }
        }
        assert_eq!(ids, (1..=200).collect::<Vec<_>>());

        for row_id in [1, 57, 200] {
            let (leaf, record) = tree.find_row(row_id).unwrap().unwrap();
            assert!(leaves.contains(&leaf));
            assert_eq!(record.attributes[0].value(), &Value::Int(row_id as i32));
        }
        assert!(tree.find_row(201).unwrap().is_none());
    }

    #[test]
    fn test_scan_filters_rows() {
        let (tree, _dir) = create_test_tree();
        for i in 1..=50 {
            tree.insert(&person(i, "p")).unwrap();
        }
        let rows = tree.scan(Some(&id_pred(CompareOp::Greater, 45)), None).unwrap();
        let ids: Vec<u32> = rows.iter().map(|r| r.row_id).collect();
        assert_eq!(ids, vec![46, 47, 48, 49, 50]);
        assert_eq!(tree.scan(None, None).unwrap().len(), 50);
    }

    #[test]
    fn test_delete_row() {
        let (tree, _dir) = create_test_tree();
        for i in 1..=5 {
            tree.insert(&person(i, "p")).unwrap();
        }
        let removed = tree.delete(3).unwrap().unwrap();
        assert_eq!(removed.row_id, 3);
        assert!(tree.delete(3).unwrap().is_none());
        assert!(tree.find_row(3).unwrap().is_none());
        assert_eq!(tree.row_count().unwrap(), 4);
        // The tail row id is unaffected.
        assert_eq!(tree.insert(&person(6, "p")).unwrap(), 6);
    }

    #[test]
    fn test_update_in_place_and_relocate() {
        let (tree, _dir) = create_test_tree();
        for i in 1..=3 {
            tree.insert(&person(i, "abc")).unwrap();
        }

        let outcome = tree
            .update(2, 1, Attribute::new(Value::text("xyz")).unwrap())
            .unwrap()
            .unwrap();
        assert!(!outcome.relocated);
        assert_eq!(outcome.previous.attributes[1].value(), &Value::text("abc"));

        let outcome = tree
            .update(2, 1, Attribute::new(Value::text("longer value")).unwrap())
            .unwrap()
            .unwrap();
        assert!(outcome.relocated);

        let (_, record) = tree.find_row(2).unwrap().unwrap();
        assert_eq!(record.attributes[1].value(), &Value::text("longer value"));
        assert_eq!(record.slot, 1);
        assert!(tree.update(99, 1, Attribute::null()).unwrap().is_none());
    }

    #[test]
    fn test_next_row_id_after_split() {
        let (tree, _dir) = create_test_tree();
        for i in 1..=100 {
            tree.insert(&person(i, "row")).unwrap();
        }
        let (leaf, next) = tree.insertion_target().unwrap();
        assert_eq!(next, 101);
        assert_eq!(tree.leaf_for_row(100).unwrap(), leaf);
    }

    #[test]
    fn test_row_id_space_exhausted() {
        let (tree, _dir) = create_test_tree();
        tree.insert(&person(1, "first")).unwrap();
        let mut leaf = Page::load(tree.file(), 0).unwrap();
        leaf.append_cell(&TableRecord::encode(u32::MAX, &person(2, "last")).unwrap()).unwrap();
        leaf.save(tree.file()).unwrap();

        let err = tree.insert(&person(3, "overflow")).unwrap_err();
        assert!(matches!(err, TabulaError::Capacity(_)));
        assert_eq!(tree.row_count().unwrap(), 2);
    }

    /// Walks the subtree under `page_no`, checking parent pointers and that
    /// every row id lies in `(low, high]`. Returns the row ids in tree order.
    fn check_subtree(tree: &TableTree, page_no: PageNo, parent: PageNo, low: u32, high: u32, interiors: &mut usize) -> Vec<u32> {
        let page = Page::load(tree.file(), page_no).unwrap();
        assert_eq!(page.parent_page(), parent, "parent of page {}", page_no);
        if page.is_leaf() {
            let ids: Vec<u32> = page.records().unwrap().iter().map(|r| r.row_id).collect();
            assert!(ids.iter().all(|&id| id > low && id <= high), "page {} out of range", page_no);
            return ids;
        }
        *interiors += 1;
        let mut ids = Vec::new();
        let mut lower = low;
        for entry in page.interior_entries().unwrap() {
            assert!(entry.row_id > lower && entry.row_id <= high);
            ids.extend(check_subtree(tree, entry.left_child, page_no, lower, entry.row_id, interiors));
            lower = entry.row_id;
        }
        ids.extend(check_subtree(tree, page.right_page(), page_no, lower, high, interiors));
        ids
    }

    fn check_tree(tree: &TableTree) -> (Vec<u32>, usize) {
        let mut interiors = 0;
        let ids = check_subtree(tree, tree.root().unwrap(), NO_PAGE, 0, u32::MAX, &mut interiors);
        (ids, interiors)
    }

    #[test]
    fn test_widening_middle_rows_splits_full_interior_pages() {
        let (tree, _dir) = create_test_tree();
        for i in 1..=2000 {
            tree.insert(&person(i, "row")).unwrap();
        }
        let (ids, interiors_before) = check_tree(&tree);
        assert_eq!(ids, (1..=2000).collect::<Vec<_>>());

        // Rows under the first, full interior page. Each one now needs more
        // room than its leaf has, so its leaf splits in the middle of the tree.
        let wide = "w".repeat(150);
        let widened: Vec<u32> = (5..=1300).step_by(10).collect();
        for &row_id in &widened {
            let outcome = tree
                .update(row_id, 1, Attribute::new(Value::text(wide.as_str())).unwrap())
                .unwrap()
                .unwrap();
            assert!(outcome.relocated);
        }

        let (ids, interiors_after) = check_tree(&tree);
        assert_eq!(ids, (1..=2000).collect::<Vec<_>>());
        assert!(interiors_after > interiors_before);
        for &row_id in &widened {
            let (leaf, record) = tree.find_row(row_id).unwrap().unwrap();
            assert_eq!(record.attributes[1].value(), &Value::text(wide.as_str()));
            assert_eq!(tree.leaf_for_row(row_id).unwrap(), leaf);
        }
        assert_eq!(tree.find_row(6).unwrap().unwrap().1.attributes[1].value(), &Value::text("row"));
        assert_eq!(tree.insertion_target().unwrap().1, 2001);
    }
}
