pub mod endpoint;
pub mod engine;
pub mod envelope;

pub use engine::{FetchEngine, FetchOutcome, FetchStatus};
