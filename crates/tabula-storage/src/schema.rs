//! Table schemas and the two catalog tables that store them.

use crate::attribute::{Attribute, Value};
use crate::record::TableRecord;
use serde::{Deserialize, Serialize};
use tabula_common::types::DataType;
use tabula_common::{Result, TabulaError};

/// Catalog of tables: one row per table.
pub const TABLES_CATALOG: &str = "meta_tables";

/// Catalog of columns: one row per column of every table.
pub const COLUMNS_CATALOG: &str = "meta_columns";

/// Lower-cases and trims a table or column name.
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

pub fn is_catalog(table: &str) -> bool {
    table == TABLES_CATALOG || table == COLUMNS_CATALOG
}

/// Definition of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
}

impl ColumnDef {
    /// A nullable, non-unique column.
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: normalize(name),
            data_type,
            nullable: true,
            primary_key: false,
            unique: false,
        }
    }

    /// Marks the column as the primary key, which implies NOT NULL and UNIQUE.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self.unique = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Ordered column list of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(name: &str, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: normalize(name),
            columns,
        }
    }

    /// Zero-based position of a column.
    pub fn ordinal(&self, column: &str) -> Result<usize> {
        let column = normalize(column);
        self.columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| TabulaError::ColumnNotFound(format!("{}.{}", self.name, column)))
    }

    pub fn column(&self, column: &str) -> Result<&ColumnDef> {
        Ok(&self.columns[self.ordinal(column)?])
    }

    pub fn primary_key(&self) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.primary_key)
    }

    /// Checks arity, declared types and nullability, returning encoded values.
    pub fn encode_row(&self, values: Vec<Value>) -> Result<Vec<Attribute>> {
        if values.len() != self.columns.len() {
            return Err(TabulaError::ColumnCountMismatch {
                expected: self.columns.len(),
                actual: values.len(),
            });
        }
        self.columns
            .iter()
            .zip(values)
            .map(|(column, value)| self.encode_value(column, value))
            .collect()
    }

    /// Checks and encodes a single value for `column`.
    pub fn encode_value(&self, column: &ColumnDef, value: Value) -> Result<Attribute> {
        if value.is_null() && !column.nullable {
            return Err(TabulaError::NullNotAllowed {
                column: column.name.clone(),
            });
        }
        Attribute::for_column(&column.name, column.data_type, value)
    }

    /// Parses text literals, one per column, into typed values.
    pub fn parse_row(&self, literals: &[&str]) -> Result<Vec<Value>> {
        if literals.len() != self.columns.len() {
            return Err(TabulaError::ColumnCountMismatch {
                expected: self.columns.len(),
                actual: literals.len(),
            });
        }
        self.columns
            .iter()
            .zip(literals)
            .map(|(column, literal)| Attribute::parse(column.data_type, literal).map(Attribute::into_value))
            .collect()
    }
}

/// Schemas of the catalog tables, which are not themselves looked up.
pub fn catalog_schema(table: &str) -> Option<TableSchema> {
    match table {
        TABLES_CATALOG => Some(TableSchema::new(
            TABLES_CATALOG,
            vec![
                ColumnDef::new("table_name", DataType::Text).not_null(),
                ColumnDef::new("record_count", DataType::Int).not_null(),
                ColumnDef::new("avg_length", DataType::SmallInt).not_null(),
                ColumnDef::new("root_page", DataType::Int).not_null(),
            ],
        )),
        COLUMNS_CATALOG => Some(TableSchema::new(
            COLUMNS_CATALOG,
            vec![
                ColumnDef::new("table_name", DataType::Text).not_null(),
                ColumnDef::new("column_name", DataType::Text).not_null(),
                ColumnDef::new("data_type", DataType::TinyInt).not_null(),
                ColumnDef::new("ordinal_position", DataType::SmallInt).not_null(),
                ColumnDef::new("is_nullable", DataType::Text).not_null(),
                ColumnDef::new("column_key", DataType::Text),
                ColumnDef::new("is_unique", DataType::Text).not_null(),
            ],
        )),
        _ => None,
    }
}

fn yes_no(flag: bool) -> Value {
    Value::text(if flag { "YES" } else { "NO" })
}

/// Row of `meta_tables` describing a table.
pub fn table_row(table: &str, record_count: i32, root_page: u32) -> Vec<Value> {
    vec![
        Value::text(table),
        Value::Int(record_count),
        Value::SmallInt(0),
        Value::Int(root_page as i32),
    ]
}

/// Row of `meta_columns` describing column `ordinal` of a table.
pub fn column_row(table: &str, ordinal: usize, column: &ColumnDef) -> Vec<Value> {
    vec![
        Value::text(table),
        Value::text(column.name.as_str()),
        Value::TinyInt(column.data_type.code() as i8),
        Value::SmallInt(ordinal as i16 + 1),
        yes_no(column.nullable),
        if column.primary_key {
            Value::text("PRI")
        } else {
            Value::Null
        },
        yes_no(column.unique),
    ]
}

/// Decodes a `meta_columns` row into its ordinal position and definition.
pub fn column_from_record(record: &TableRecord) -> Result<(usize, ColumnDef)> {
    let bad = || {
        TabulaError::Format(format!(
            "malformed {} row {}",
            COLUMNS_CATALOG, record.row_id
        ))
    };
    let values: Vec<&Value> = record.attributes.iter().map(Attribute::value).collect();
    let [_, Value::Text(name), Value::TinyInt(code), Value::SmallInt(position), Value::Text(nullable), key, Value::Text(unique)] =
        values.as_slice()
    else {
        return Err(bad());
    };

    let data_type = DataType::from_code(*code as u8).ok_or_else(bad)?;
    let column = ColumnDef {
        name: name.clone(),
        data_type,
        nullable: nullable == "YES",
        primary_key: matches!(key, Value::Text(k) if k == "PRI"),
        unique: unique == "YES",
    };
    let ordinal = usize::try_from(*position - 1).map_err(|_| bad())?;
    Ok((ordinal, column))
}
