//! Value-keyed tree over the pages of one column index file.
//!
//! Every key appears exactly once in the tree, on a leaf or on an interior
//! page. An interior key separates its left child (smaller keys) from the
//! next child (larger keys). There are no sibling links between leaves, so
//! range lookups climb parent pointers and sweep the qualifying side of
//! each ancestor.

use crate::attribute::Attribute;
use crate::disk::PageFile;
use crate::page::{self, set_parent, Page};
use crate::predicate::{CompareOp, Predicate};
use crate::record::IndexEntry;
use std::collections::BTreeSet;
use std::sync::Arc;
use tabula_common::page::{PageNo, PageType, NO_PAGE};
use tabula_common::{Result, TabulaError};
use tracing::{debug, trace, warn};

/// Where a descent for a key stopped.
enum Position {
    /// The key is stored at `slot` of the page.
    Found(PageNo, usize),
    /// The key is absent; it belongs on this leaf.
    Leaf(PageNo),
}

/// Index tree handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct IndexTree {
    file: Arc<PageFile>,
}

impl IndexTree {
    pub fn new(file: Arc<PageFile>) -> Self {
        Self { file }
    }

    pub fn file(&self) -> &PageFile {
        &self.file
    }

    pub fn root(&self) -> Result<PageNo> {
        self.file.root()
    }

    /// Descends from the root toward `key`.
    fn locate(&self, key: &Attribute) -> Result<Position> {
        let mut page_no = self.root()?;
        loop {
            let page = Page::load(&self.file, page_no)?;
            let entries = page.index_entries()?;
            match entries.binary_search_by(|e| e.key.compare(key)) {
                Ok(slot) => return Ok(Position::Found(page_no, slot)),
                Err(_) if page.is_leaf() => return Ok(Position::Leaf(page_no)),
                // First key above `key`; past the end means the right pointer.
                Err(i) => page_no = page.child_at(i)?,
            }
            trace!(page_no, "index descent");
        }
    }

    /// Row ids whose key satisfies `predicate`, ascending.
    pub fn lookup(&self, predicate: &Predicate) -> Result<BTreeSet<u32>> {
        let mut out = BTreeSet::new();
        let op = predicate.op();

        if op == CompareOp::NotEqual {
            self.collect_subtree(self.root()?, predicate, &mut out)?;
            return Ok(out);
        }

        let (page_no, found) = match self.locate(predicate.value())? {
            Position::Found(page_no, slot) => (page_no, Some(slot)),
            Position::Leaf(page_no) => (page_no, None),
        };
        let page = Page::load(&self.file, page_no)?;
        let entries = page.index_entries()?;
        for entry in &entries {
            if predicate.matches(&entry.key) {
                out.extend(&entry.row_ids);
            }
        }
        if op == CompareOp::Equal {
            return Ok(out);
        }

        if let Some(slot) = found.filter(|_| !page.is_leaf()) {
            // Stopped on an interior key: sweep the children on the qualifying side.
            let children = if op.is_lower_range() {
                0..=slot
            } else {
                slot + 1..=entries.len()
            };
            for i in children {
                self.collect_subtree(page.child_at(i)?, predicate, &mut out)?;
            }
        }

        let mut child_no = page_no;
        let mut parent_no = page.parent_page();
        while parent_no != NO_PAGE {
            let parent = Page::load(&self.file, parent_no)?;
            let parent_entries = parent.index_entries()?;
            let s = parent
                .children()?
                .iter()
                .position(|&c| c == child_no)
                .ok_or_else(|| TabulaError::PageCorrupted {
                    page_no: parent_no,
                    reason: format!("page {} is not among its parent's children", child_no),
                })?;

            if op.is_lower_range() {
                for i in 0..s {
                    if predicate.matches(&parent_entries[i].key) {
                        out.extend(&parent_entries[i].row_ids);
                    }
                    self.collect_subtree(parent.child_at(i)?, predicate, &mut out)?;
                }
            } else {
                for i in s..parent_entries.len() {
                    if predicate.matches(&parent_entries[i].key) {
                        out.extend(&parent_entries[i].row_ids);
                    }
                    self.collect_subtree(parent.child_at(i + 1)?, predicate, &mut out)?;
                }
            }

            child_no = parent_no;
            parent_no = parent.parent_page();
        }

        Ok(out)
    }

    fn collect_subtree(&self, page_no: PageNo, predicate: &Predicate, out: &mut BTreeSet<u32>) -> Result<()> {
        let page = Page::load(&self.file, page_no)?;
        for entry in page.index_entries()? {
            if predicate.matches(&entry.key) {
                out.extend(&entry.row_ids);
            }
        }
        if !page.is_leaf() {
            for child in page.children()? {
                self.collect_subtree(child, predicate, out)?;
            }
        }
        Ok(())
    }

    /// Adds `row_ids` under `key`, merging with an existing entry.
    pub fn insert(&self, key: Attribute, row_ids: &[u32]) -> Result<()> {
        let entry = IndexEntry::new(key, row_ids.to_vec());
        entry.check_capacity()?;
        match self.locate(&entry.key)? {
            Position::Found(page_no, _) | Position::Leaf(page_no) => page::add_index_entry(&self.file, page_no, entry),
        }
    }

    /// Fails with a capacity error if adding `row_id` under `key` would
    /// overflow the entry. Writes nothing.
    pub fn check_insert(&self, key: &Attribute, row_id: u32) -> Result<()> {
        let entry = match self.locate(key)? {
            Position::Found(page_no, slot) => {
                let mut existing = Page::load(&self.file, page_no)?.index_entries()?.swap_remove(slot);
                existing.merge(&[row_id]);
                existing
            }
            Position::Leaf(_) => IndexEntry::new(key.clone(), vec![row_id]),
        };
        entry.check_capacity()
    }

    /// Removes one row id from `key`. The entry goes away with its last id.
    ///
    /// Returns false if the key or row id was not present.
    pub fn delete(&self, key: &Attribute, row_id: u32) -> Result<bool> {
        let (page_no, slot) = match self.locate(key)? {
            Position::Found(page_no, slot) => (page_no, slot),
            Position::Leaf(_) => {
                warn!(key = %key, row_id, "index key not found on delete");
                return Ok(false);
            }
        };

        let mut page = Page::load(&self.file, page_no)?;
        let mut entry = page.index_entries()?.swap_remove(slot);
        if !entry.remove(row_id) {
            warn!(key = %key, row_id, "row id not under index key on delete");
            return Ok(false);
        }

        if !entry.row_ids.is_empty() {
            page::replace_index_entry(&self.file, page_no, slot, entry)?;
            return Ok(true);
        }

        if page.is_leaf() {
            page.delete_cell(slot)?;
            page.save(&self.file)?;
            trace!(page_no, key = %key, "removed index entry");
            return Ok(true);
        }

        // Emptied interior key: pull up the largest key of its left subtree.
        let left_child = entry
            .left_child
            .ok_or_else(|| TabulaError::Internal(format!("interior key {} has no left child", key)))?;
        match self.take_max(left_child)? {
            Some(mut predecessor) => {
                predecessor.left_child = Some(left_child);
                debug!(page_no, removed = %key, replacement = %predecessor.key, "replaced interior key");
                page::replace_index_entry(&self.file, page_no, slot, predecessor)?;
            }
            None => {
                // Nothing left of it; its range folds into the next child.
                page.delete_cell(slot)?;
                page.save(&self.file)?;
                debug!(page_no, removed = %key, "dropped interior key over empty subtree");
            }
        }
        Ok(true)
    }

    /// Removes and returns the largest entry of the subtree at `page_no`.
    fn take_max(&self, page_no: PageNo) -> Result<Option<IndexEntry>> {
        let mut page = Page::load(&self.file, page_no)?;
        let count = page.cell_count();

        if !page.is_leaf() {
            if let Some(entry) = self.take_max(page.right_page())? {
                return Ok(Some(entry));
            }
            if count == 0 {
                return Ok(None);
            }
            // Right subtree is empty: the last key is the maximum and its
            // left subtree becomes the new right pointer.
            let mut last = page.index_entries()?.swap_remove(count - 1);
            let new_right = last
                .left_child
                .take()
                .ok_or_else(|| TabulaError::Internal(format!("interior key {} has no left child", last.key)))?;
            page.delete_cell(count - 1)?;
            page.set_right_page(new_right);
            page.save(&self.file)?;
            set_parent(&self.file, new_right, page_no)?;
            return Ok(Some(last));
        }

        if count == 0 {
            return Ok(None);
        }
        let last = page.index_entries()?.swap_remove(count - 1);
        page.delete_cell(count - 1)?;
        page.save(&self.file)?;
        Ok(Some(last))
    }

    /// Every entry in key order.
    pub fn entries(&self) -> Result<Vec<IndexEntry>> {
        let mut out = Vec::new();
        self.collect_in_order(self.root()?, &mut out)?;
        Ok(out)
    }

    fn collect_in_order(&self, page_no: PageNo, out: &mut Vec<IndexEntry>) -> Result<()> {
        let page = Page::load(&self.file, page_no)?;
        match page.page_type() {
            PageType::IndexLeaf => out.extend(page.index_entries()?),
            PageType::IndexInterior => {
                for mut entry in page.index_entries()? {
                    if let Some(child) = entry.left_child.take() {
                        self.collect_in_order(child, out)?;
                    }
                    out.push(entry);
                }
                self.collect_in_order(page.right_page(), out)?;
            }
            other => {
                return Err(TabulaError::PageCorrupted {
                    page_no,
                    reason: format!("{:?} page in an index tree", other),
                })
            }
        }
        Ok(())
    }
}
