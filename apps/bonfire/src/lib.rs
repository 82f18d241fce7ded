pub mod cli;
pub mod config;
pub mod error;
pub mod provider;
pub mod relay;
pub mod session;
pub mod telemetry;
pub mod ui;
