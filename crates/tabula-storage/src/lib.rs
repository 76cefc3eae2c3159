//! Storage engine for Tabula.
//!
//! This crate provides:
//! - Page files of fixed 512-byte pages
//! - Slotted table and index pages with in-page compaction
//! - Attribute encoding for every column type
//! - Row-id keyed table trees and value-keyed index trees
//! - A catalog-backed database facade over a data directory

mod attribute;
mod database;
mod disk;
mod index_tree;
mod page;
mod predicate;
mod record;
mod schema;
mod table_tree;

pub use attribute::{Attribute, Value};
pub use database::{Database, ResultSet, ScanOptions};
pub use disk::{PageFile, PageFileOptions};
pub use index_tree::IndexTree;
pub use page::Page;
pub use predicate::{CompareOp, Predicate};
pub use record::{IndexEntry, TableInteriorEntry, TableRecord};
pub use schema::{ColumnDef, TableSchema, COLUMNS_CATALOG, TABLES_CATALOG};
pub use table_tree::{TableTree, UpdateOutcome};
