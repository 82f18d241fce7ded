use clap::{Args, Parser};
use std::path::PathBuf;

use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "bonfire",
    about = "🔥 Chat around the fire — a terminal widget for a shared realtime channel",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "BONFIRE_SERVICE_BASE",
        default_value = "https://chat.bonfire.sh",
        help = "Base URL for the bonfire chat service"
    )]
    pub service_base: String,

    #[arg(
        long,
        env = "BONFIRE_CHANNEL",
        default_value = "chat",
        help = "Channel to join"
    )]
    pub channel: String,

    #[arg(
        long,
        env = "BONFIRE_NICKNAME",
        help = "Prefill the nickname input (connecting still requires pressing Enter)"
    )]
    pub nickname: Option<String>,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "BONFIRE_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "BONFIRE_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}
