pub mod error;
pub mod limiters;
pub mod similarity;
pub mod token_estimator;

pub use error::{CoreError, CoreResult};
pub use similarity::cosine_similarity;
