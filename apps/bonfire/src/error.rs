use crate::config::ConfigError;
use crate::provider::ProviderError;
use crate::relay::RelayError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Provider(#[from] ProviderError),
    #[error("{0}")]
    Relay(#[from] RelayError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("logging initialization failed: {0}")]
    Logging(String),
}
