//! Typed column values and their byte encodings.
//!
//! | Type     | Width | Encoding                               |
//! |----------|-------|----------------------------------------|
//! | NULL     | 0     | empty                                  |
//! | TINYINT  | 1     | signed byte                            |
//! | SMALLINT | 2     | signed big-endian                      |
//! | INT      | 4     | signed big-endian                      |
//! | BIGINT   | 8     | signed big-endian                      |
//! | FLOAT    | 4     | IEEE-754 big-endian                    |
//! | DOUBLE   | 8     | IEEE-754 big-endian                    |
//! | YEAR     | 1     | year - 2000 as an unsigned byte        |
//! | TIME     | 4     | milliseconds since midnight            |
//! | DATETIME | 8     | UTC epoch milliseconds                 |
//! | DATE     | 8     | UTC epoch milliseconds at midnight     |
//! | TEXT     | n     | raw UTF-8 bytes                        |

use std::cmp::Ordering;
use std::fmt;
use tabula_common::types::{DataType, MAX_TEXT_LEN, TEXT_BASE};
use tabula_common::{Result, TabulaError};

/// First year representable by a YEAR column.
pub const YEAR_BASE: i32 = 2000;

/// Last year representable by a YEAR column.
pub const YEAR_MAX: i32 = YEAR_BASE + u8::MAX as i32;

const MILLIS_PER_SECOND: i64 = 1000;
const MILLIS_PER_DAY: i64 = 86_400 * MILLIS_PER_SECOND;

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    /// Full calendar year, e.g. 2024.
    Year(i32),
    /// Milliseconds since midnight.
    Time(i32),
    /// UTC epoch milliseconds.
    DateTime(i64),
    /// UTC epoch milliseconds.
    Date(i64),
    Text(String),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::TinyInt(_) => DataType::TinyInt,
            Value::SmallInt(_) => DataType::SmallInt,
            Value::Int(_) => DataType::Int,
            Value::BigInt(_) => DataType::BigInt,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::Year(_) => DataType::Year,
            Value::Time(_) => DataType::Time,
            Value::DateTime(_) => DataType::DateTime,
            Value::Date(_) => DataType::Date,
            Value::Text(_) => DataType::Text,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convenience constructor for TEXT.
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(*v as i64),
            Value::SmallInt(v) => Some(*v as i64),
            Value::Int(v) => Some(*v as i64),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    fn temporal(&self) -> Option<i64> {
        match self {
            Value::Year(v) | Value::Time(v) => Some(*v as i64),
            Value::DateTime(v) | Value::Date(v) => Some(*v),
            _ => None,
        }
    }

    /// Total order used by predicates and index keys.
    ///
    /// NULL equals only NULL and sorts after every other value. TEXT is
    /// compared case-insensitively.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Greater,
            (_, Value::Null) => Ordering::Less,
            (Value::Text(a), Value::Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
            (a, b) => {
                if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                    return x.cmp(&y);
                }
                if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
                    return x.partial_cmp(&y).unwrap_or_else(|| x.total_cmp(&y));
                }
                if let (Some(x), Some(y)) = (a.temporal(), b.temporal()) {
                    return x.cmp(&y);
                }
                a.to_string().to_lowercase().cmp(&b.to_string().to_lowercase())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::TinyInt(v) => write!(f, "{}", v),
            Value::SmallInt(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Year(v) => write!(f, "{}", v),
            Value::Time(ms) => {
                let secs = *ms as i64 / MILLIS_PER_SECOND;
                write!(f, "{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
            }
            Value::Date(ms) => {
                let (y, m, d) = days_to_ymd(ms.div_euclid(MILLIS_PER_DAY));
                write!(f, "{:04}-{:02}-{:02}", y, m, d)
            }
            Value::DateTime(ms) => {
                let (y, m, d) = days_to_ymd(ms.div_euclid(MILLIS_PER_DAY));
                let secs = ms.rem_euclid(MILLIS_PER_DAY) / MILLIS_PER_SECOND;
                write!(
                    f,
                    "{:04}-{:02}-{:02}_{:02}:{:02}:{:02}",
                    y,
                    m,
                    d,
                    secs / 3600,
                    (secs / 60) % 60,
                    secs % 60
                )
            }
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A value together with its declared type and encoded bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    data_type: DataType,
    value: Value,
    bytes: Vec<u8>,
}

impl Attribute {
    /// Encodes a value. The type is taken from the value itself.
    pub fn new(value: Value) -> Result<Self> {
        let bytes = encode(&value)?;
        Ok(Self {
            data_type: value.data_type(),
            value,
            bytes,
        })
    }

    pub fn null() -> Self {
        Self {
            data_type: DataType::Null,
            value: Value::Null,
            bytes: Vec::new(),
        }
    }

    /// Encodes a value for a column of the declared type.
    ///
    /// NULL is accepted for every type; nullability is the caller's concern.
    pub fn for_column(column: &str, declared: DataType, value: Value) -> Result<Self> {
        if !value.is_null() && value.data_type() != declared {
            return Err(TabulaError::TypeMismatch {
                column: column.to_string(),
                expected: declared.to_string(),
                actual: value.data_type().to_string(),
            });
        }
        Self::new(value)
    }

    /// Parses a text literal as the declared type.
    ///
    /// `NULL` (any case) yields the NULL attribute. DATE uses `yyyy-MM-dd`,
    /// DATETIME uses `yyyy-MM-dd_HH:mm:ss`, TIME accepts `HH:mm:ss` or a
    /// plain number of milliseconds.
    pub fn parse(declared: DataType, text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("null") {
            return Ok(Self::null());
        }
        let literal = strip_quotes(trimmed);
        let bad = || TabulaError::Format(format!("cannot parse '{}' as {}", literal, declared));

        let value = match declared {
            DataType::Null => return Err(bad()),
            DataType::TinyInt => Value::TinyInt(literal.parse().map_err(|_| bad())?),
            DataType::SmallInt => Value::SmallInt(literal.parse().map_err(|_| bad())?),
            DataType::Int => Value::Int(literal.parse().map_err(|_| bad())?),
            DataType::BigInt => Value::BigInt(literal.parse().map_err(|_| bad())?),
            DataType::Float => Value::Float(literal.parse().map_err(|_| bad())?),
            DataType::Double => Value::Double(literal.parse().map_err(|_| bad())?),
            DataType::Year => Value::Year(literal.parse().map_err(|_| bad())?),
            DataType::Time => {
                if literal.contains(':') {
                    Value::Time(parse_clock(literal).ok_or_else(bad)? as i32)
                } else {
                    Value::Time(literal.parse().map_err(|_| bad())?)
                }
            }
            DataType::Date => Value::Date(parse_date(literal).ok_or_else(bad)? * MILLIS_PER_DAY),
            DataType::DateTime => {
                let (date, clock) = literal.split_once('_').ok_or_else(bad)?;
                let days = parse_date(date).ok_or_else(bad)?;
                let millis = parse_clock(clock).ok_or_else(bad)?;
                Value::DateTime(days * MILLIS_PER_DAY + millis)
            }
            DataType::Text => Value::Text(literal.to_string()),
        };

        Self::new(value)
    }

    /// Decodes bytes stored for the declared type.
    pub fn decode(declared: DataType, bytes: &[u8]) -> Result<Self> {
        if let Some(width) = declared.fixed_size() {
            if bytes.len() != width {
                return Err(TabulaError::Format(format!(
                    "{} expects {} bytes, found {}",
                    declared,
                    width,
                    bytes.len()
                )));
            }
        }

        let value = match declared {
            DataType::Null => Value::Null,
            DataType::TinyInt => Value::TinyInt(bytes[0] as i8),
            DataType::SmallInt => Value::SmallInt(i16::from_be_bytes([bytes[0], bytes[1]])),
            DataType::Int => Value::Int(i32::from_be_bytes(array(bytes)?)),
            DataType::BigInt => Value::BigInt(i64::from_be_bytes(array(bytes)?)),
            DataType::Float => Value::Float(f32::from_be_bytes(array(bytes)?)),
            DataType::Double => Value::Double(f64::from_be_bytes(array(bytes)?)),
            DataType::Year => Value::Year(YEAR_BASE + bytes[0] as i32),
            DataType::Time => Value::Time(i32::from_be_bytes(array(bytes)?)),
            DataType::DateTime => Value::DateTime(i64::from_be_bytes(array(bytes)?)),
            DataType::Date => Value::Date(i64::from_be_bytes(array(bytes)?)),
            DataType::Text => Value::Text(
                String::from_utf8(bytes.to_vec())
                    .map_err(|e| TabulaError::Format(format!("TEXT is not UTF-8: {}", e)))?,
            ),
        };

        Ok(Self {
            data_type: declared,
            value,
            bytes: bytes.to_vec(),
        })
    }

    /// Decodes bytes described by a cell type code.
    pub fn from_cell_code(code: u8, bytes: &[u8]) -> Result<Self> {
        let (data_type, _) = DataType::from_cell_code(code)
            .ok_or_else(|| TabulaError::Format(format!("unknown type code 0x{:02X}", code)))?;
        Self::decode(data_type, bytes)
    }

    /// Type code written into a cell. TEXT folds its length into the code.
    pub fn cell_code(&self) -> Result<u8> {
        match self.data_type {
            DataType::Text => {
                if self.bytes.len() > MAX_TEXT_LEN {
                    return Err(TabulaError::Format(format!(
                        "TEXT of {} bytes exceeds the {} byte cell limit",
                        self.bytes.len(),
                        MAX_TEXT_LEN
                    )));
                }
                Ok(TEXT_BASE + self.bytes.len() as u8)
            }
            other => Ok(other.code()),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    pub fn compare(&self, other: &Attribute) -> Ordering {
        self.value.compare(&other.value)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.value, f)
    }
}

fn encode(value: &Value) -> Result<Vec<u8>> {
    let bytes = match value {
        Value::Null => Vec::new(),
        Value::TinyInt(v) => v.to_be_bytes().to_vec(),
        Value::SmallInt(v) => v.to_be_bytes().to_vec(),
        Value::Int(v) => v.to_be_bytes().to_vec(),
        Value::BigInt(v) => v.to_be_bytes().to_vec(),
        Value::Float(v) => v.to_be_bytes().to_vec(),
        Value::Double(v) => v.to_be_bytes().to_vec(),
        Value::Year(y) => {
            if !(YEAR_BASE..=YEAR_MAX).contains(y) {
                return Err(TabulaError::Format(format!(
                    "YEAR {} outside {}..={}",
                    y, YEAR_BASE, YEAR_MAX
                )));
            }
            vec![(y - YEAR_BASE) as u8]
        }
        Value::Time(ms) => {
            if !(0..MILLIS_PER_DAY).contains(&(*ms as i64)) {
                return Err(TabulaError::Format(format!("TIME {} ms outside one day", ms)));
            }
            ms.to_be_bytes().to_vec()
        }
        Value::DateTime(ms) | Value::Date(ms) => ms.to_be_bytes().to_vec(),
        Value::Text(s) => s.as_bytes().to_vec(),
    };
    Ok(bytes)
}

fn array<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| TabulaError::Format(format!("expected {} bytes, found {}", N, bytes.len())))
}

fn strip_quotes(s: &str) -> &str {
    for quote in ['\'', '"'] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

// =============================================================================
// Calendar arithmetic
// =============================================================================

fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

fn days_in_month(year: i64, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

/// Parses `yyyy-MM-dd` into days since 1970-01-01.
fn parse_date(s: &str) -> Option<i64> {
    let mut parts = s.split('-');
    let (year, month, day) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || year.len() != 4 || month.len() != 2 || day.len() != 2 {
        return None;
    }
    let year: i64 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    let day: u32 = day.parse().ok()?;
    if !(1..=12).contains(&month) || day < 1 || day > days_in_month(year, month) {
        return None;
    }
    Some(ymd_to_days(year, month, day))
}

/// Parses `HH:mm:ss` into milliseconds since midnight.
fn parse_clock(s: &str) -> Option<i64> {
    let mut parts = s.split(':');
    let (h, m, sec) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let h: i64 = h.parse().ok()?;
    let m: i64 = m.parse().ok()?;
    let sec: i64 = sec.parse().ok()?;
    if !(0..24).contains(&h) || !(0..60).contains(&m) || !(0..60).contains(&sec) {
        return None;
    }
    Some((h * 3600 + m * 60 + sec) * MILLIS_PER_SECOND)
}

/// Days since the Unix epoch for a proleptic Gregorian date.
fn ymd_to_days(year: i64, month: u32, day: u32) -> i64 {
    let (y, m) = if month <= 2 {
        (year - 1, month as i64 + 9)
    } else {
        (year, month as i64 - 3)
    };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let doy = (153 * m + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Inverse of `ymd_to_days`, via the Julian day number.
fn days_to_ymd(days: i64) -> (i64, u32, u32) {
    let a = days + 2_440_588 + 32_044;
    let b = (4 * a + 3) / 146_097;
    let c = a - (146_097 * b) / 4;
    let d = (4 * c + 3) / 1461;
    let e = c - (1461 * d) / 4;
    let m = (5 * e + 2) / 153;

    let day = (e - (153 * m + 2) / 5 + 1) as u32;
    let month = (m + 3 - 12 * (m / 10)) as u32;
    let year = 100 * b + d - 4800 + m / 10;

    (year, month, day)
}
