//! The epoch loop, early stopping, and the seam where replicas synchronise.
mod reduce;
mod stopping;
mod trainer;

pub use reduce::*;
pub use stopping::*;
pub use trainer::*;
