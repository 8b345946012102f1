//! Data-parallel training on a group of in-process replicas.
//!
//! Every replica reads its own shard of the train table, and parameters are
//! averaged across the group at the end of each epoch.
mod collective;
mod distributor;
mod driver;
mod task;

pub use collective::*;
pub use distributor::*;
pub use driver::*;
pub use task::*;
