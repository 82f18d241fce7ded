use bonfire_client_core::cli::Cli;
use bonfire_client_core::config::ServiceConfig;
use bonfire_client_core::error::CliError;
use bonfire_client_core::provider::websocket::WebSocketProvider;
use bonfire_client_core::relay::RelayClient;
use bonfire_client_core::session::controller::ChatController;
use bonfire_client_core::telemetry::logging as logctl;
use bonfire_client_core::ui::ChatApp;
use clap::Parser;
use std::sync::Arc;
use tracing::debug;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_config = cli.logging.to_config();
    logctl::init(&log_config).map_err(|err| CliError::Logging(err.to_string()))?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    let config = ServiceConfig::new(&cli.service_base, cli.channel)?;
    debug!(service_base = %config.base_url(), channel = config.channel(), "service configured");

    let provider = Arc::new(WebSocketProvider::new(config.realtime_url()?)?);
    let relay = RelayClient::new(config.relay_url()?)?;
    let (controller, effects_rx) = ChatController::new(
        config.token_request_url()?,
        config.channel(),
        provider,
        relay,
    );

    let app = ChatApp::new(controller, effects_rx, cli.nickname.unwrap_or_default());
    app.run().await
}
