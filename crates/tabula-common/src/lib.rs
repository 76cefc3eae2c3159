//! Tabula common types, errors, and page format definitions.
//!
//! This crate provides shared definitions used by the storage engine.

pub mod config;
pub mod error;
pub mod page;
pub mod types;

pub use config::StorageConfig;
pub use error::{Result, TabulaError};
pub use page::{PageHeader, PageNo, PageType, MAX_CELL_SIZE, NO_PAGE, PAGE_SIZE};
pub use types::{DataType, MAX_TEXT_LEN, TEXT_BASE};
