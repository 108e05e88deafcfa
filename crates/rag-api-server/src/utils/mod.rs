pub mod error;
pub mod limiters;
pub mod similarity;
pub mod token_estimator;

pub use similarity::{min_max_normalize, cosine_similarity};
