pub mod channel;
pub mod config;
pub mod correlate;
pub mod orchestrator;
pub mod report;
pub mod suite;
