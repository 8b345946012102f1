//! Versioned columnar tables.
//!
//! A table is a directory of parquet data files plus an append-only log of
//! JSON commits. Every write produces a new version that replaces the visible
//! contents; earlier versions remain readable by number.
//!
//! ## Core Types
//!
//! - [`Table`]: handle to a table directory (read, scan, overwrite)
//! - [`Frame`]: in-memory named columns
//! - [`Commit`]: one version in the log
//! - [`Scan`]: lazy fixed-size batch stream
mod column;
mod commit;
mod frame;
mod store;

pub use column::*;
pub use commit::*;
pub use frame::*;
pub use store::*;
