pub mod config;
pub mod constants;
pub mod disguise;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod metrics;
pub mod parser;
pub mod pipeline;
pub mod queue;
pub mod rate_limiter;
pub mod server;
pub mod storage;
pub mod types;
pub mod worker;

// Layered boundaries: ports the core depends on, adapters that implement them
pub mod app;
pub mod infra;
