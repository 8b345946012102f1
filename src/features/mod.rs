//! Feature preparation: bronze table in, temporally split train/test tables out.
mod builder;
mod synthetic;

pub use builder::*;
pub use synthetic::*;
