pub mod media;
pub mod populator;
pub mod predictor;
pub mod score;
pub mod store;

pub use populator::{Admission, Populator};
pub use predictor::Predictor;
pub use store::{CacheStore, CleanupReport};
