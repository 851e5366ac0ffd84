//! Hybrid retrieval: vector ANN + tag filter + multi-factor re-ranking +
//! spreading activation + diversity + related-trace attachment.

pub mod activation;
pub mod diversity;
pub mod pipeline;
pub mod side_effects;
pub mod vector;

pub use side_effects::SideEffects;
pub use vector::{Neighbor, VectorIndex, VectorIndexError};
