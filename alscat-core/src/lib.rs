pub mod analyze;
pub mod config;
pub mod error;
pub mod ingest;
pub mod maintenance;
pub mod pipeline;
pub mod progress;
pub mod query;
pub mod scan;
pub mod store;
pub mod types;
