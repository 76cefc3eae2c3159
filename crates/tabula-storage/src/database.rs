//! Catalog-backed database over a directory of table and index files.
//!
//! Each table lives in `<table>.tbl` and each indexed column in
//! `<table>_<column>.ndx`. Table and column definitions are rows of the
//! `meta_tables` and `meta_columns` catalog tables, which are ordinary
//! table files seeded when a data directory is first opened.

use crate::attribute::{Attribute, Value};
use crate::disk::{PageFile, PageFileOptions};
use crate::index_tree::IndexTree;
use crate::predicate::{CompareOp, Predicate};
use crate::record::TableRecord;
use crate::schema::{self, normalize, ColumnDef, TableSchema, COLUMNS_CATALOG, TABLES_CATALOG};
use crate::table_tree::{TableTree, UpdateOutcome};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabula_common::page::PageType;
use tabula_common::types::DataType;
use tabula_common::{Result, StorageConfig, TabulaError};
use tracing::{debug, info, warn};

/// Whether a row write also maintains the `meta_tables` counters.
///
/// Seeding the catalogs writes their own rows before those counters exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bookkeeping {
    Catalog,
    Skip,
}

/// Options for [`Database::select`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Prepend a `rowid` column.
    #[serde(default)]
    pub include_row_id: bool,
}

/// Rendered rows of a select.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn write_line(f: &mut fmt::Formatter<'_>, cells: &[String], widths: &[usize]) -> fmt::Result {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{:<width$}", cell, width = width))
        .collect();
    writeln!(f, "{}", padded.join(" | ").trim_end())
}

impl fmt::Display for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }
        write_line(f, &self.columns, &widths)?;
        let rule: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
        writeln!(f, "{}", rule.join("-+-"))?;
        for row in &self.rows {
            write_line(f, row, &widths)?;
        }
        Ok(())
    }
}

/// Handle to an open data directory.
pub struct Database {
    config: StorageConfig,
    /// Open page files by path, shared by every tree handle.
    files: Mutex<HashMap<PathBuf, Arc<PageFile>>>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("data_dir", &self.config.data_dir)
            .field("open_files", &self.files.lock().len())
            .finish()
    }
}

fn catalog(table: &str) -> Result<TableSchema> {
    schema::catalog_schema(table).ok_or_else(|| TabulaError::Internal(format!("{} is not a catalog table", table)))
}

fn table_name_predicate(table: &str) -> Result<Predicate> {
    Ok(Predicate::new(
        "table_name",
        0,
        DataType::Text,
        CompareOp::Equal,
        Attribute::new(Value::text(table))?,
    ))
}

impl Database {
    /// Opens a data directory, seeding the catalogs if they are missing.
    pub fn open(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        let db = Self {
            config,
            files: Mutex::new(HashMap::new()),
        };

        let tables = db.config.table_path(TABLES_CATALOG).exists();
        let columns = db.config.table_path(COLUMNS_CATALOG).exists();
        match (tables, columns) {
            (true, true) => debug!(dir = %db.config.data_dir.display(), "opened database"),
            (false, false) => db.bootstrap()?,
            _ => {
                warn!(dir = %db.config.data_dir.display(), "catalog incomplete, reseeding");
                db.bootstrap()?;
            }
        }
        Ok(db)
    }

    /// Deletes every table and index file in the data directory and opens
    /// it with fresh catalogs.
    pub fn initialize(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        let mut removed = 0;
        for entry in fs::read_dir(&config.data_dir)? {
            let path = entry?.path();
            if matches!(path.extension().and_then(|e| e.to_str()), Some("tbl" | "ndx")) {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        info!(dir = %config.data_dir.display(), removed, "initialized data directory");
        Self::open(config)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn options(&self) -> PageFileOptions {
        PageFileOptions::from(&self.config)
    }

    /// Writes the catalog files and their self-describing rows.
    fn bootstrap(&self) -> Result<()> {
        let tables = catalog(TABLES_CATALOG)?;
        let columns = catalog(COLUMNS_CATALOG)?;

        for name in [TABLES_CATALOG, COLUMNS_CATALOG] {
            let path = self.config.table_path(name);
            self.forget_file(&path)?;
            self.create_file(&path, PageType::TableLeaf)?;
        }

        let column_rows = (tables.columns.len() + columns.columns.len()) as i32;
        for row in [
            schema::table_row(TABLES_CATALOG, 2, 0),
            schema::table_row(COLUMNS_CATALOG, column_rows, 0),
        ] {
            self.write_row(&tables, &tables.encode_row(row)?, Bookkeeping::Skip)?;
        }
        for described in [&tables, &columns] {
            for (ordinal, column) in described.columns.iter().enumerate() {
                let row = schema::column_row(&described.name, ordinal, column);
                self.write_row(&columns, &columns.encode_row(row)?, Bookkeeping::Skip)?;
            }
        }

        info!(dir = %self.config.data_dir.display(), "seeded catalog tables");
        Ok(())
    }

    fn create_file(&self, path: &Path, root_type: PageType) -> Result<Arc<PageFile>> {
        let file = Arc::new(PageFile::create(path, root_type, self.options())?);
        self.files.lock().insert(path.to_path_buf(), Arc::clone(&file));
        Ok(file)
    }

    fn open_file(&self, path: &Path) -> Result<Arc<PageFile>> {
        let mut files = self.files.lock();
        if let Some(file) = files.get(path) {
            return Ok(Arc::clone(file));
        }
        let file = Arc::new(PageFile::open(path, self.options())?);
        files.insert(path.to_path_buf(), Arc::clone(&file));
        Ok(file)
    }

    /// Closes and deletes a file if it exists.
    fn forget_file(&self, path: &Path) -> Result<()> {
        self.files.lock().remove(path);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn table_tree(&self, table: &str) -> Result<TableTree> {
        let path = self.config.table_path(table);
        if !path.exists() {
            return Err(TabulaError::TableNotFound(table.to_string()));
        }
        Ok(TableTree::new(self.open_file(&path)?))
    }

    fn index_tree(&self, table: &str, column: &str) -> Result<Option<IndexTree>> {
        let path = self.config.index_path(table, column);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(IndexTree::new(self.open_file(&path)?)))
    }

    /// Index trees of a table, paired with the ordinal of their column.
    fn indexes(&self, schema: &TableSchema) -> Result<Vec<(usize, IndexTree)>> {
        let mut found = Vec::new();
        for (ordinal, column) in schema.columns.iter().enumerate() {
            if let Some(index) = self.index_tree(&schema.name, &column.name)? {
                found.push((ordinal, index));
            }
        }
        Ok(found)
    }

    /// The tree of a table, sharing the database's open file.
    pub fn table(&self, table: &str) -> Result<TableTree> {
        self.table_tree(&normalize(table))
    }

    /// The index on `table.column`, if one exists.
    pub fn index(&self, table: &str, column: &str) -> Result<Option<IndexTree>> {
        self.index_tree(&normalize(table), &normalize(column))
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.config.table_path(&normalize(table)).exists()
    }

    /// Column definitions of a table, in ordinal order.
    pub fn table_schema(&self, table: &str) -> Result<TableSchema> {
        let name = normalize(table);
        if let Some(builtin) = schema::catalog_schema(&name) {
            return Ok(builtin);
        }

        let rows = self
            .table_tree(COLUMNS_CATALOG)?
            .scan(Some(&table_name_predicate(&name)?), None)?;
        let mut columns = rows
            .iter()
            .map(schema::column_from_record)
            .collect::<Result<Vec<_>>>()?;
        if columns.is_empty() {
            return Err(TabulaError::TableNotFound(name));
        }
        columns.sort_by_key(|(ordinal, _)| *ordinal);
        Ok(TableSchema {
            name,
            columns: columns.into_iter().map(|(_, column)| column).collect(),
        })
    }

    /// Names of all tables, catalogs included.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let rows = self.table_tree(TABLES_CATALOG)?.scan(None, None)?;
        Ok(rows
            .iter()
            .filter_map(|row| match row.attribute(0).map(Attribute::value) {
                Some(Value::Text(name)) => Some(name.clone()),
                _ => None,
            })
            .collect())
    }

    fn catalog_row(&self, table: &str) -> Result<Option<TableRecord>> {
        let rows = self
            .table_tree(TABLES_CATALOG)?
            .scan(Some(&table_name_predicate(table)?), None)?;
        Ok(rows.into_iter().next())
    }

    /// Row count recorded in `meta_tables`.
    pub fn record_count(&self, table: &str) -> Result<u32> {
        let name = normalize(table);
        let row = self
            .catalog_row(&name)?
            .ok_or_else(|| TabulaError::TableNotFound(name.clone()))?;
        match row.attribute(1).map(Attribute::value) {
            Some(Value::Int(count)) => Ok((*count).max(0) as u32),
            _ => Err(TabulaError::Format(format!("malformed {} row for {}", TABLES_CATALOG, name))),
        }
    }

    /// Applies a row count change and refreshes the recorded root page.
    fn adjust_catalog(&self, table: &str, delta: i32) -> Result<()> {
        let Some(row) = self.catalog_row(table)? else {
            warn!(table, "table missing from catalog");
            return Ok(());
        };
        let tables = self.table_tree(TABLES_CATALOG)?;

        if delta != 0 {
            let count = match row.attribute(1).map(Attribute::value) {
                Some(Value::Int(count)) => *count,
                _ => {
                    return Err(TabulaError::Format(format!(
                        "malformed {} row for {}",
                        TABLES_CATALOG, table
                    )))
                }
            };
            tables.update(row.row_id, 1, Attribute::new(Value::Int(count + delta))?)?;
        }

        let root = self.table_tree(table)?.root()? as i32;
        if !matches!(row.attribute(3).map(Attribute::value), Some(Value::Int(r)) if *r == root) {
            tables.update(row.row_id, 3, Attribute::new(Value::Int(root))?)?;
            debug!(table, root, "recorded new root page");
        }
        Ok(())
    }

    /// Creates a table and registers it in the catalogs.
    ///
    /// A primary key column gets an index immediately.
    pub fn create_table(&self, table: &str, columns: Vec<ColumnDef>) -> Result<TableSchema> {
        let name = normalize(table);
        if name.is_empty() || columns.is_empty() {
            return Err(TabulaError::Format(format!(
                "table '{}' needs a name and at least one column",
                table
            )));
        }
        if schema::is_catalog(&name) || self.config.table_path(&name).exists() {
            return Err(TabulaError::TableAlreadyExists(name));
        }

        let mut seen = HashSet::new();
        let mut columns: Vec<ColumnDef> = columns
            .into_iter()
            .map(|mut column| {
                column.name = normalize(&column.name);
                column
            })
            .collect();
        for column in &mut columns {
            if column.data_type == DataType::Null {
                return Err(TabulaError::Format(format!("column {} cannot be declared NULL", column.name)));
            }
            if column.name.is_empty() || !seen.insert(column.name.clone()) {
                return Err(TabulaError::Format(format!("duplicate or empty column name '{}'", column.name)));
            }
            if column.primary_key {
                column.nullable = false;
                column.unique = true;
            }
        }
        if columns.iter().filter(|c| c.primary_key).count() > 1 {
            return Err(TabulaError::Format(format!("table {} declares more than one primary key", name)));
        }

        let schema = TableSchema {
            name: name.clone(),
            columns,
        };
        let tables = catalog(TABLES_CATALOG)?;
        let catalog_columns = catalog(COLUMNS_CATALOG)?;

        // Catalog rows are encoded in full before the table file appears.
        let table_row = tables.encode_row(schema::table_row(&name, 0, 0))?;
        let column_rows = schema
            .columns
            .iter()
            .enumerate()
            .map(|(ordinal, column)| catalog_columns.encode_row(schema::column_row(&name, ordinal, column)))
            .collect::<Result<Vec<_>>>()?;
        for row in std::iter::once(&table_row).chain(&column_rows) {
            TableRecord::encode(0, row)?;
        }

        self.create_file(&self.config.table_path(&name), PageType::TableLeaf)?;
        self.write_row(&tables, &table_row, Bookkeeping::Catalog)?;
        for row in &column_rows {
            self.write_row(&catalog_columns, row, Bookkeeping::Catalog)?;
        }
        if let Some(key) = schema.primary_key() {
            self.create_index(&name, &key.name)?;
        }

        info!(table = %name, columns = schema.columns.len(), "created table");
        Ok(schema)
    }

    /// Builds an index on `table.column` from the table's current rows.
    ///
    /// If any key cannot be stored the index file is removed again.
    pub fn create_index(&self, table: &str, column: &str) -> Result<IndexTree> {
        let schema = self.table_schema(table)?;
        if schema::is_catalog(&schema.name) {
            return Err(TabulaError::Format(format!("catalog table {} cannot be indexed", schema.name)));
        }
        let ordinal = schema.ordinal(column)?;
        let column = &schema.columns[ordinal].name;
        let path = self.config.index_path(&schema.name, column);
        if path.exists() {
            return Err(TabulaError::IndexAlreadyExists(format!("{}.{}", schema.name, column)));
        }

        let rows = self.table_tree(&schema.name)?.scan(None, None)?;
        let index = IndexTree::new(self.create_file(&path, PageType::IndexLeaf)?);
        let populated = rows.iter().try_for_each(|row| match row.attribute(ordinal) {
            Some(key) => index.insert(key.clone(), &[row.row_id]),
            None => Err(TabulaError::Format(format!(
                "row {} of {} has no column {}",
                row.row_id, schema.name, column
            ))),
        });
        if let Err(err) = populated {
            drop(index);
            self.forget_file(&path)?;
            warn!(table = %schema.name, column = %column, error = %err, "index build failed");
            return Err(err);
        }

        info!(table = %schema.name, column = %column, rows = rows.len(), "created index");
        Ok(index)
    }

    pub fn drop_index(&self, table: &str, column: &str) -> Result<()> {
        let schema = self.table_schema(table)?;
        let column = &schema.column(column)?.name;
        let path = self.config.index_path(&schema.name, column);
        if !path.exists() {
            return Err(TabulaError::IndexNotFound(format!("{}.{}", schema.name, column)));
        }
        self.forget_file(&path)?;
        info!(table = %schema.name, column = %column, "dropped index");
        Ok(())
    }

    /// Removes a table, its indexes and its catalog rows.
    pub fn drop_table(&self, table: &str) -> Result<()> {
        let name = normalize(table);
        if schema::is_catalog(&name) {
            return Err(TabulaError::Format(format!("catalog table {} cannot be dropped", name)));
        }
        let schema = self.table_schema(&name)?;

        let by_name = table_name_predicate(&name)?;
        let columns = self.delete_where(COLUMNS_CATALOG, Some(&by_name))?;
        self.delete_where(TABLES_CATALOG, Some(&by_name))?;

        for column in &schema.columns {
            self.forget_file(&self.config.index_path(&name, &column.name))?;
        }
        self.forget_file(&self.config.table_path(&name))?;
        info!(table = %name, columns, "dropped table");
        Ok(())
    }

    /// Builds `column <op> value` against a table's schema.
    pub fn predicate(&self, table: &str, column: &str, op: CompareOp, value: Value) -> Result<Predicate> {
        let schema = self.table_schema(table)?;
        let ordinal = schema.ordinal(column)?;
        let column = &schema.columns[ordinal];
        let value = Attribute::for_column(&column.name, column.data_type, value)?;
        Ok(Predicate::new(column.name.clone(), ordinal, column.data_type, op, value))
    }

    /// Like [`Database::predicate`], parsing the value from a text literal.
    pub fn parse_predicate(&self, table: &str, column: &str, op: CompareOp, literal: &str) -> Result<Predicate> {
        let schema = self.table_schema(table)?;
        let ordinal = schema.ordinal(column)?;
        let column = &schema.columns[ordinal];
        let value = Attribute::parse(column.data_type, literal)?;
        Ok(Predicate::new(column.name.clone(), ordinal, column.data_type, op, value))
    }

    /// Rows satisfying `predicate`, in row id order.
    ///
    /// An index on the predicate column narrows the leaves visited.
    pub fn scan(&self, table: &str, predicate: Option<&Predicate>) -> Result<Vec<TableRecord>> {
        let name = normalize(table);
        let tree = self.table_tree(&name)?;
        let index = match predicate {
            Some(p) => self.index_tree(&name, p.column())?,
            None => None,
        };
        tree.scan(predicate, index.as_ref())
    }

    /// Scans and renders the chosen columns. An empty list or `*` selects all.
    pub fn select(
        &self,
        table: &str,
        columns: &[&str],
        predicate: Option<&Predicate>,
        options: ScanOptions,
    ) -> Result<ResultSet> {
        let schema = self.table_schema(table)?;
        let ordinals: Vec<usize> = match columns {
            [] | ["*"] => (0..schema.columns.len()).collect(),
            named => named.iter().map(|c| schema.ordinal(c)).collect::<Result<_>>()?,
        };

        let mut header = Vec::with_capacity(ordinals.len() + 1);
        if options.include_row_id {
            header.push("rowid".to_string());
        }
        header.extend(ordinals.iter().map(|&o| schema.columns[o].name.clone()));

        let rows = self
            .scan(&schema.name, predicate)?
            .into_iter()
            .map(|record| {
                let mut cells = Vec::with_capacity(header.len());
                if options.include_row_id {
                    cells.push(record.row_id.to_string());
                }
                for &ordinal in &ordinals {
                    cells.push(record.attribute(ordinal).map_or_else(|| "NULL".to_string(), ToString::to_string));
                }
                cells
            })
            .collect();

        Ok(ResultSet { columns: header, rows })
    }

    /// Inserts a row, one value per column. Returns the assigned row id.
    ///
    /// Every check runs before the first write, so a refused insert leaves
    /// the files unchanged.
    pub fn insert_row(&self, table: &str, values: Vec<Value>) -> Result<u32> {
        let schema = self.table_schema(table)?;
        let attributes = schema.encode_row(values)?;
        self.check_unique(&schema, &attributes)?;

        let tree = self.table_tree(&schema.name)?;
        let (_, next_row_id) = tree.insertion_target()?;
        TableRecord::encode(next_row_id, &attributes)?;
        for (ordinal, index) in self.indexes(&schema)? {
            index.check_insert(&attributes[ordinal], next_row_id)?;
        }

        self.write_row(&schema, &attributes, Bookkeeping::Catalog)
    }

    /// Inserts a row given as text literals.
    pub fn insert_literals(&self, table: &str, literals: &[&str]) -> Result<u32> {
        let values = self.table_schema(table)?.parse_row(literals)?;
        self.insert_row(table, values)
    }

    fn write_row(&self, schema: &TableSchema, attributes: &[Attribute], bookkeeping: Bookkeeping) -> Result<u32> {
        let row_id = self.table_tree(&schema.name)?.insert(attributes)?;
        for (ordinal, index) in self.indexes(schema)? {
            index.insert(attributes[ordinal].clone(), &[row_id])?;
        }
        if bookkeeping == Bookkeeping::Catalog {
            self.adjust_catalog(&schema.name, 1)?;
        }
        debug!(table = %schema.name, row_id, "inserted row");
        Ok(row_id)
    }

    fn check_unique(&self, schema: &TableSchema, attributes: &[Attribute]) -> Result<()> {
        for (ordinal, attribute) in attributes.iter().enumerate() {
            self.check_unique_value(schema, ordinal, attribute, None)?;
        }
        Ok(())
    }

    /// Fails if another row already holds `value` in a unique column.
    /// NULLs never clash.
    fn check_unique_value(&self, schema: &TableSchema, ordinal: usize, value: &Attribute, skip: Option<u32>) -> Result<()> {
        let column = &schema.columns[ordinal];
        if !column.unique || value.is_null() {
            return Ok(());
        }
        let same = Predicate::new(column.name.clone(), ordinal, column.data_type, CompareOp::Equal, value.clone());
        if self
            .scan(&schema.name, Some(&same))?
            .iter()
            .any(|row| Some(row.row_id) != skip)
        {
            return Err(TabulaError::UniqueViolation {
                table: schema.name.clone(),
                column: column.name.clone(),
            });
        }
        Ok(())
    }

    /// Sets column `ordinal` of one row, keeping its index in step.
    pub fn update_column(&self, table: &str, row_id: u32, ordinal: usize, value: Value) -> Result<UpdateOutcome> {
        let schema = self.table_schema(table)?;
        let column = schema
            .columns
            .get(ordinal)
            .ok_or_else(|| TabulaError::ColumnNotFound(format!("{} column #{}", schema.name, ordinal)))?;
        let value = schema.encode_value(column, value)?;
        self.update_in(&schema, row_id, ordinal, value)
    }

    /// Sets `column` on every row matching `predicate`. Returns the number updated.
    pub fn update_where(
        &self,
        table: &str,
        predicate: Option<&Predicate>,
        column: &str,
        value: Value,
    ) -> Result<usize> {
        let schema = self.table_schema(table)?;
        let ordinal = schema.ordinal(column)?;
        let value = schema.encode_value(&schema.columns[ordinal], value)?;

        let row_ids: Vec<u32> = self.scan(&schema.name, predicate)?.iter().map(|r| r.row_id).collect();
        for &row_id in &row_ids {
            self.update_in(&schema, row_id, ordinal, value.clone())?;
        }
        debug!(table = %schema.name, column = %schema.columns[ordinal].name, updated = row_ids.len(), "updated rows");
        Ok(row_ids.len())
    }

    fn update_in(&self, schema: &TableSchema, row_id: u32, ordinal: usize, value: Attribute) -> Result<UpdateOutcome> {
        self.check_unique_value(schema, ordinal, &value, Some(row_id))?;
        let index = self.index_tree(&schema.name, &schema.columns[ordinal].name)?;
        if let Some(index) = &index {
            index.check_insert(&value, row_id)?;
        }

        let outcome = self
            .table_tree(&schema.name)?
            .update(row_id, ordinal, value.clone())?
            .ok_or_else(|| TabulaError::RowNotFound {
                table: schema.name.clone(),
                row_id,
            })?;

        if let Some(index) = &index {
            if let Some(previous) = outcome.previous.attribute(ordinal) {
                index.delete(previous, row_id)?;
            }
            index.insert(value, &[row_id])?;
        }
        if outcome.relocated {
            self.adjust_catalog(&schema.name, 0)?;
        }
        Ok(outcome)
    }

    /// Deletes one row and its index entries. Returns the removed row.
    pub fn delete_row(&self, table: &str, row_id: u32) -> Result<TableRecord> {
        let schema = self.table_schema(table)?;
        self.delete_in(&schema, row_id)
    }

    /// Deletes every row matching `predicate`. Returns the number deleted.
    pub fn delete_where(&self, table: &str, predicate: Option<&Predicate>) -> Result<usize> {
        let schema = self.table_schema(table)?;
        let row_ids: Vec<u32> = self.scan(&schema.name, predicate)?.iter().map(|r| r.row_id).collect();
        for &row_id in &row_ids {
            self.delete_in(&schema, row_id)?;
        }
        debug!(table = %schema.name, deleted = row_ids.len(), "deleted rows");
        Ok(row_ids.len())
    }

    fn delete_in(&self, schema: &TableSchema, row_id: u32) -> Result<TableRecord> {
        let removed = self
            .table_tree(&schema.name)?
            .delete(row_id)?
            .ok_or_else(|| TabulaError::RowNotFound {
                table: schema.name.clone(),
                row_id,
            })?;
        for (ordinal, index) in self.indexes(schema)? {
            if let Some(key) = removed.attribute(ordinal) {
                index.delete(key, row_id)?;
            }
        }
        self.adjust_catalog(&schema.name, -1)?;
        Ok(removed)
    }

    /// Flushes every open file.
    pub fn sync(&self) -> Result<()> {
        let files: Vec<Arc<PageFile>> = self.files.lock().values().cloned().collect();
        for file in files {
            file.sync()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let mut config = StorageConfig::with_data_dir(dir.path());
        config.fsync_enabled = false;
        (Database::open(config).unwrap(), dir)
    }

    fn people(db: &Database) {
        db.create_table(
            "people",
            vec![
                ColumnDef::new("id", DataType::Int).primary_key(),
                ColumnDef::new("name", DataType::Text),
                ColumnDef::new("email", DataType::Text).unique(),
            ],
        )
        .unwrap();
    }

    #[test]
    fn test_bootstrap_describes_catalogs() {
        let (db, _dir) = create_test_db();
        assert_eq!(db.table_names().unwrap(), vec![TABLES_CATALOG, COLUMNS_CATALOG]);
        assert_eq!(db.record_count(TABLES_CATALOG).unwrap(), 2);
        assert_eq!(db.record_count(COLUMNS_CATALOG).unwrap(), 11);
        assert_eq!(db.scan(COLUMNS_CATALOG, None).unwrap().len(), 11);
    }

    #[test]
    fn test_reopen_keeps_catalog() {
        let (db, dir) = create_test_db();
        people(&db);
        drop(db);

        let mut config = StorageConfig::with_data_dir(dir.path());
        config.fsync_enabled = false;
        let db = Database::open(config).unwrap();
        let schema = db.table_schema("PEOPLE").unwrap();
        assert_eq!(schema.columns.len(), 3);
        assert!(schema.columns[0].primary_key);
        assert!(!schema.columns[0].nullable);
        assert!(schema.columns[2].unique);
        assert_eq!(db.record_count(COLUMNS_CATALOG).unwrap(), 14);
    }

    #[test]
    fn test_initialize_wipes_tables() {
        let (db, dir) = create_test_db();
        people(&db);
        drop(db);

        let mut config = StorageConfig::with_data_dir(dir.path());
        config.fsync_enabled = false;
        let db = Database::initialize(config).unwrap();
        assert!(!db.table_exists("people"));
        assert!(!dir.path().join("people_id.ndx").exists());
        assert_eq!(db.table_names().unwrap().len(), 2);
    }

    #[test]
    fn test_create_table_rejects_bad_definitions() {
        let (db, _dir) = create_test_db();
        people(&db);
        assert!(matches!(
            db.create_table("People", vec![ColumnDef::new("x", DataType::Int)]),
            Err(TabulaError::TableAlreadyExists(_))
        ));
        assert!(matches!(
            db.create_table("meta_tables", vec![ColumnDef::new("x", DataType::Int)]),
            Err(TabulaError::TableAlreadyExists(_))
        ));
        assert!(db
            .create_table("t", vec![ColumnDef::new("a", DataType::Int), ColumnDef::new("A", DataType::Int)])
            .is_err());
        assert!(db
            .create_table(
                "t",
                vec![
                    ColumnDef::new("a", DataType::Int).primary_key(),
                    ColumnDef::new("b", DataType::Int).primary_key()
                ]
            )
            .is_err());
        assert!(!db.table_exists("t"));
    }

    #[test]
    fn test_over_long_names_leave_catalog_untouched() {
        let (db, dir) = create_test_db();
        let long_table = "t".repeat(244);
        let err = db
            .create_table(&long_table, vec![ColumnDef::new("id", DataType::Int)])
            .unwrap_err();
        assert!(err.is_format());
        assert!(!db.table_exists(&long_table));
        assert!(!dir.path().join(format!("{}.tbl", long_table)).exists());

        let long_column = "c".repeat(244);
        let err = db
            .create_table(
                "t2",
                vec![ColumnDef::new("id", DataType::Int), ColumnDef::new(&long_column, DataType::Int)],
            )
            .unwrap_err();
        assert!(err.is_format());
        assert!(!db.table_exists("t2"));
        assert!(!dir.path().join("t2.tbl").exists());
        assert_eq!(db.table_names().unwrap(), vec![TABLES_CATALOG, COLUMNS_CATALOG]);
        assert_eq!(db.record_count(TABLES_CATALOG).unwrap(), 2);
        assert_eq!(db.record_count(COLUMNS_CATALOG).unwrap(), 11);

        db.create_table("t2", vec![ColumnDef::new("id", DataType::Int)]).unwrap();
        assert_eq!(db.table_schema("t2").unwrap().columns.len(), 1);
    }

    #[test]
    fn test_primary_key_index_created() {
        let (db, dir) = create_test_db();
        people(&db);
        assert!(dir.path().join("people_id.ndx").exists());
        assert!(db.index("people", "id").unwrap().is_some());
        assert!(db.index("people", "name").unwrap().is_none());
    }

    #[test]
    fn test_insert_and_counts() {
        let (db, _dir) = create_test_db();
        people(&db);
        let a = db
            .insert_row("people", vec![Value::Int(1), Value::text("Ada"), Value::text("ada@x")])
            .unwrap();
        let b = db.insert_literals("people", &["2", "'Bob'", "null"]).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(db.record_count("people").unwrap(), 2);

        let pred = db.predicate("people", "id", CompareOp::Equal, Value::Int(2)).unwrap();
        let rows = db.scan("people", Some(&pred)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].attributes[1].value(), &Value::text("Bob"));
    }

    #[test]
    fn test_constraint_violations_write_nothing() {
        let (db, _dir) = create_test_db();
        people(&db);
        db.insert_row("people", vec![Value::Int(1), Value::text("Ada"), Value::text("ada@x")])
            .unwrap();

        let dup_key = db.insert_row("people", vec![Value::Int(1), Value::text("Eve"), Value::Null]);
        assert!(matches!(dup_key, Err(TabulaError::UniqueViolation { .. })));
        let dup_email = db.insert_row("people", vec![Value::Int(2), Value::text("Eve"), Value::text("ADA@X")]);
        assert!(matches!(dup_email, Err(TabulaError::UniqueViolation { .. })));
        let null_key = db.insert_row("people", vec![Value::Null, Value::text("Eve"), Value::Null]);
        assert!(matches!(null_key, Err(TabulaError::NullNotAllowed { .. })));
        let wrong_type = db.insert_row("people", vec![Value::BigInt(2), Value::text("Eve"), Value::Null]);
        assert!(matches!(wrong_type, Err(TabulaError::TypeMismatch { .. })));

        assert_eq!(db.record_count("people").unwrap(), 1);
        assert_eq!(db.scan("people", None).unwrap().len(), 1);
        assert_eq!(db.index("people", "id").unwrap().unwrap().entries().unwrap().len(), 1);
    }

    #[test]
    fn test_null_unique_values_do_not_clash() {
        let (db, _dir) = create_test_db();
        people(&db);
        db.insert_row("people", vec![Value::Int(1), Value::text("a"), Value::Null]).unwrap();
        db.insert_row("people", vec![Value::Int(2), Value::text("b"), Value::Null]).unwrap();
        assert_eq!(db.record_count("people").unwrap(), 2);
    }

    #[test]
    fn test_update_keeps_index_in_step() {
        let (db, _dir) = create_test_db();
        people(&db);
        for id in 1..=5 {
            db.insert_row("people", vec![Value::Int(id), Value::text(format!("p{}", id)), Value::Null])
                .unwrap();
        }
        db.update_column("people", 3, 0, Value::Int(30)).unwrap();

        let index = db.index("people", "id").unwrap().unwrap();
        let keys: Vec<Value> = index.entries().unwrap().into_iter().map(|e| e.key.into_value()).collect();
        assert_eq!(keys, vec![Value::Int(1), Value::Int(2), Value::Int(4), Value::Int(5), Value::Int(30)]);

        let clash = db.update_column("people", 4, 0, Value::Int(30));
        assert!(matches!(clash, Err(TabulaError::UniqueViolation { .. })));
        // Re-setting a row's own value is not a clash.
        db.update_column("people", 4, 0, Value::Int(4)).unwrap();

        assert!(matches!(
            db.update_column("people", 99, 1, Value::text("x")),
            Err(TabulaError::RowNotFound { row_id: 99, .. })
        ));
    }

    #[test]
    fn test_update_where_and_delete_where() {
        let (db, _dir) = create_test_db();
        people(&db);
        for id in 1..=10 {
            db.insert_row("people", vec![Value::Int(id), Value::text("old"), Value::Null])
                .unwrap();
        }
        let upper = db.predicate("people", "id", CompareOp::Greater, Value::Int(6)).unwrap();
        assert_eq!(db.update_where("people", Some(&upper), "name", Value::text("new")).unwrap(), 4);

        let renamed = db.predicate("people", "name", CompareOp::Equal, Value::text("NEW")).unwrap();
        assert_eq!(db.scan("people", Some(&renamed)).unwrap().len(), 4);

        assert_eq!(db.delete_where("people", Some(&renamed)).unwrap(), 4);
        assert_eq!(db.record_count("people").unwrap(), 6);
        let index = db.index("people", "id").unwrap().unwrap();
        assert_eq!(index.entries().unwrap().len(), 6);
        assert!(index.lookup(&upper).unwrap().is_empty());
    }

    #[test]
    fn test_delete_row_missing() {
        let (db, _dir) = create_test_db();
        people(&db);
        assert!(matches!(db.delete_row("people", 1), Err(TabulaError::RowNotFound { .. })));
    }

    #[test]
    fn test_create_index_from_existing_rows() {
        let (db, _dir) = create_test_db();
        people(&db);
        for id in 1..=20 {
            let name = if id % 2 == 0 { "even" } else { "odd" };
            db.insert_row("people", vec![Value::Int(id), Value::text(name), Value::Null])
                .unwrap();
        }
        let index = db.create_index("people", "Name").unwrap();
        let entries = index.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].row_ids, (2..=20).step_by(2).collect::<Vec<u32>>());

        assert!(matches!(
            db.create_index("people", "name"),
            Err(TabulaError::IndexAlreadyExists(_))
        ));
        db.drop_index("people", "name").unwrap();
        assert!(db.index("people", "name").unwrap().is_none());
        assert!(matches!(db.drop_index("people", "name"), Err(TabulaError::IndexNotFound(_))));
    }

    #[test]
    fn test_create_index_refused_when_entry_too_wide() {
        let (db, dir) = create_test_db();
        db.create_table("t", vec![ColumnDef::new("v", DataType::Int)]).unwrap();
        for _ in 0..130 {
            db.insert_row("t", vec![Value::Int(7)]).unwrap();
        }
        assert!(matches!(db.create_index("t", "v"), Err(TabulaError::Capacity(_))));
        assert!(!dir.path().join("t_v.ndx").exists());
    }

    #[test]
    fn test_insert_refused_when_index_entry_full() {
        let (db, _dir) = create_test_db();
        db.create_table("t", vec![ColumnDef::new("v", DataType::Int)]).unwrap();
        db.create_index("t", "v").unwrap();
        for _ in 0..120 {
            db.insert_row("t", vec![Value::Int(7)]).unwrap();
        }
        assert!(matches!(db.insert_row("t", vec![Value::Int(7)]), Err(TabulaError::Capacity(_))));
        assert_eq!(db.record_count("t").unwrap(), 120);
        assert_eq!(db.scan("t", None).unwrap().len(), 120);
        db.insert_row("t", vec![Value::Int(8)]).unwrap();
    }

    #[test]
    fn test_drop_table_removes_everything() {
        let (db, dir) = create_test_db();
        people(&db);
        db.insert_row("people", vec![Value::Int(1), Value::text("a"), Value::Null]).unwrap();
        db.drop_table("people").unwrap();

        assert!(!db.table_exists("people"));
        assert!(!dir.path().join("people_id.ndx").exists());
        assert!(matches!(db.table_schema("people"), Err(TabulaError::TableNotFound(_))));
        assert_eq!(db.record_count(COLUMNS_CATALOG).unwrap(), 11);
        assert_eq!(db.record_count(TABLES_CATALOG).unwrap(), 2);
        assert!(db.drop_table(TABLES_CATALOG).is_err());

        // The name can be reused.
        people(&db);
    }

    #[test]
    fn test_select_renders_columns() {
        let (db, _dir) = create_test_db();
        people(&db);
        db.insert_row("people", vec![Value::Int(1), Value::text("Ada"), Value::Null]).unwrap();

        let all = db.select("people", &[], None, ScanOptions::default()).unwrap();
        assert_eq!(all.columns, vec!["id", "name", "email"]);
        assert_eq!(all.rows, vec![vec!["1", "Ada", "NULL"]]);

        let options = ScanOptions { include_row_id: true };
        let some = db.select("people", &["NAME"], None, options).unwrap();
        assert_eq!(some.columns, vec!["rowid", "name"]);
        assert_eq!(some.rows, vec![vec!["1", "Ada"]]);

        let rendered = some.to_string();
        assert!(rendered.starts_with("rowid | name"));
        assert!(matches!(
            db.select("people", &["age"], None, options),
            Err(TabulaError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_scan_options_serde_default() {
        let parsed: ScanOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, ScanOptions::default());
        let parsed: ScanOptions = serde_json::from_str(r#"{"include_row_id":true}"#).unwrap();
        assert!(parsed.include_row_id);
    }
}
