//! Typed comparison predicates over a single column.

use crate::attribute::Attribute;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tabula_common::types::DataType;
use tabula_common::TabulaError;

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Less,
    LessOrEqual,
    Equal,
    NotEqual,
    GreaterOrEqual,
    Greater,
}

impl CompareOp {
    /// Returns the operator selecting exactly the complement.
    pub fn negate(self) -> Self {
        match self {
            CompareOp::Less => CompareOp::GreaterOrEqual,
            CompareOp::LessOrEqual => CompareOp::Greater,
            CompareOp::Equal => CompareOp::NotEqual,
            CompareOp::NotEqual => CompareOp::Equal,
            CompareOp::GreaterOrEqual => CompareOp::Less,
            CompareOp::Greater => CompareOp::LessOrEqual,
        }
    }

    /// True when the operator selects values below the operand.
    pub fn is_lower_range(self) -> bool {
        matches!(self, CompareOp::Less | CompareOp::LessOrEqual)
    }

    /// True when the operator selects values above the operand.
    pub fn is_upper_range(self) -> bool {
        matches!(self, CompareOp::Greater | CompareOp::GreaterOrEqual)
    }

    /// Applies the operator to the result of `value.compare(operand)`.
    pub fn accepts(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Less => ordering == Ordering::Less,
            CompareOp::LessOrEqual => ordering != Ordering::Greater,
            CompareOp::Equal => ordering == Ordering::Equal,
            CompareOp::NotEqual => ordering != Ordering::Equal,
            CompareOp::GreaterOrEqual => ordering != Ordering::Less,
            CompareOp::Greater => ordering == Ordering::Greater,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOp::Less => "<",
            CompareOp::LessOrEqual => "<=",
            CompareOp::Equal => "=",
            CompareOp::NotEqual => "<>",
            CompareOp::GreaterOrEqual => ">=",
            CompareOp::Greater => ">",
        };
        write!(f, "{}", symbol)
    }
}

impl FromStr for CompareOp {
    type Err = TabulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "<" => Ok(CompareOp::Less),
            "<=" => Ok(CompareOp::LessOrEqual),
            "=" => Ok(CompareOp::Equal),
            "<>" | "!=" => Ok(CompareOp::NotEqual),
            ">=" => Ok(CompareOp::GreaterOrEqual),
            ">" => Ok(CompareOp::Greater),
            other => Err(TabulaError::Format(format!("unknown operator '{}'", other))),
        }
    }
}

/// `column <op> value`, already resolved against a table schema.
#[derive(Debug, Clone)]
pub struct Predicate {
    column: String,
    ordinal: usize,
    data_type: DataType,
    op: CompareOp,
    value: Attribute,
}

impl Predicate {
    pub fn new(
        column: impl Into<String>,
        ordinal: usize,
        data_type: DataType,
        op: CompareOp,
        value: Attribute,
    ) -> Self {
        Self {
            column: column.into(),
            ordinal,
            data_type,
            op,
            value,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Zero-based position of the column in the row.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn op(&self) -> CompareOp {
        self.op
    }

    pub fn value(&self) -> &Attribute {
        &self.value
    }

    /// Returns the predicate with its operator negated (`NOT`).
    pub fn negate(mut self) -> Self {
        self.op = self.op.negate();
        self
    }

    pub fn matches(&self, candidate: &Attribute) -> bool {
        self.op.accepts(candidate.compare(&self.value))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.op, self.value)
    }
}
