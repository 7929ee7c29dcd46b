pub mod analytics;
pub mod config;
pub mod env;
pub mod experiment;
pub mod logging;
pub mod telemetry;
