//! Defect autoencoder and its loss.
mod autoencoder;
mod loss;

pub use autoencoder::*;
pub use loss::*;
