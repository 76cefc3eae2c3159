//! Column data types and their on-disk type codes.

use crate::error::TabulaError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Type code of TEXT with zero length. A TEXT value of `n` bytes is
/// stored with the code `TEXT_BASE + n`.
pub const TEXT_BASE: u8 = 0x0C;

/// Longest TEXT value a cell can describe with a single type byte.
pub const MAX_TEXT_LEN: usize = (u8::MAX - TEXT_BASE) as usize;

/// Declared column types.
///
/// The discriminant is the type code written into table cells. TEXT is
/// the exception: its cell code also carries the byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    Null = 0x00,
    TinyInt = 0x01,
    SmallInt = 0x02,
    Int = 0x03,
    BigInt = 0x04,
    Float = 0x05,
    Double = 0x06,
    Year = 0x08,
    Time = 0x09,
    DateTime = 0x0A,
    Date = 0x0B,
    Text = 0x0C,
}

impl DataType {
    /// Decodes a declared type code, as stored in the columns catalog.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(DataType::Null),
            0x01 => Some(DataType::TinyInt),
            0x02 => Some(DataType::SmallInt),
            0x03 => Some(DataType::Int),
            0x04 => Some(DataType::BigInt),
            0x05 => Some(DataType::Float),
            0x06 => Some(DataType::Double),
            0x08 => Some(DataType::Year),
            0x09 => Some(DataType::Time),
            0x0A => Some(DataType::DateTime),
            0x0B => Some(DataType::Date),
            0x0C => Some(DataType::Text),
            _ => None,
        }
    }

    /// Decodes a cell type code into a type and its encoded width.
    ///
    /// Any code at or above TEXT_BASE is TEXT of length `code - TEXT_BASE`.
    pub fn from_cell_code(code: u8) -> Option<(Self, usize)> {
        if code >= TEXT_BASE {
            return Some((DataType::Text, (code - TEXT_BASE) as usize));
        }
        let data_type = Self::from_code(code)?;
        data_type.fixed_size().map(|size| (data_type, size))
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Returns the encoded width, or None for TEXT.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            DataType::Null => Some(0),
            DataType::TinyInt | DataType::Year => Some(1),
            DataType::SmallInt => Some(2),
            DataType::Int | DataType::Float | DataType::Time => Some(4),
            DataType::BigInt | DataType::Double | DataType::DateTime | DataType::Date => Some(8),
            DataType::Text => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::TinyInt | DataType::SmallInt | DataType::Int | DataType::BigInt
        )
    }

    pub fn is_floating_point(&self) -> bool {
        matches!(self, DataType::Float | DataType::Double)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_floating_point()
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            DataType::Year | DataType::Time | DataType::DateTime | DataType::Date
        )
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::Null => "NULL",
            DataType::TinyInt => "TINYINT",
            DataType::SmallInt => "SMALLINT",
            DataType::Int => "INT",
            DataType::BigInt => "BIGINT",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::Year => "YEAR",
            DataType::Time => "TIME",
            DataType::DateTime => "DATETIME",
            DataType::Date => "DATE",
            DataType::Text => "TEXT",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for DataType {
    type Err = TabulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NULL" => Ok(DataType::Null),
            "TINYINT" => Ok(DataType::TinyInt),
            "SMALLINT" => Ok(DataType::SmallInt),
            "INT" | "INTEGER" => Ok(DataType::Int),
            "BIGINT" | "LONG" => Ok(DataType::BigInt),
            "FLOAT" | "REAL" => Ok(DataType::Float),
            "DOUBLE" => Ok(DataType::Double),
            "YEAR" => Ok(DataType::Year),
            "TIME" => Ok(DataType::Time),
            "DATETIME" => Ok(DataType::DateTime),
            "DATE" => Ok(DataType::Date),
            "TEXT" => Ok(DataType::Text),
            other => Err(TabulaError::Format(format!("unknown data type '{}'", other))),
        }
    }
}
