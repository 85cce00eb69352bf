//! Core types for QuarryDB.

mod ids;
mod rid;
pub mod varint;

pub use ids::{FileId, PageId, PageNumber, TxnId};
pub use rid::Rid;
