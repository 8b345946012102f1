//! Batch loading from feature tables.
//!
//! - [`DataModule`]: serialisable description of the train/test tables and fields
//! - [`Loader`]: restartable, optionally sharded batch source over one table
//! - [`Batch`]: ids plus named numeric vectors
mod batch;
mod module;

pub use batch::*;
pub use module::*;
