//! # quarry-common
//!
//! Common types, errors, and configuration for QuarryDB.
//!
//! This crate provides the foundational pieces shared by every QuarryDB
//! component:
//!
//! - **Types**: core identifiers (`FileId`, `PageNumber`, `PageId`, `TxnId`,
//!   `Rid`) and the variable-length integer codec used by on-page layouts
//! - **Errors**: unified error handling with `QuarryError`
//! - **Config**: database configuration and durability modes
//! - **Constants**: system-wide constants and limits
//!
//! ## Example
//!
//! ```rust
//! use quarry_common::types::{FileId, PageId, PageNumber, Rid};
//! use quarry_common::error::QuarryResult;
//!
//! fn example() -> QuarryResult<()> {
//!     let page = PageId::new(FileId::new(3), PageNumber::new(0));
//!     let rid = Rid::new(FileId::new(3), 42);
//!     assert_eq!(rid.bucket_id(), page.file_id());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::{DatabaseConfig, SyncMode};
pub use constants::*;
pub use error::{QuarryError, QuarryResult};
pub use types::{FileId, PageId, PageNumber, Rid, TxnId};
