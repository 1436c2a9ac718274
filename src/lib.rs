pub mod classify;
pub mod config;
pub mod exporter;
pub mod http;
pub mod metrics;
pub mod quorum;
pub mod scan;
pub mod version;
