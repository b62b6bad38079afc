use canvas_sync::config::Config;
use canvas_sync::http;
use canvas_sync::server::RelayServer;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting canvas-sync...");

    let config = Config::load().unwrap_or_else(|e| {
        log::error!("Failed to load configuration: {e}");
        log::warn!("Using default configuration");
        Config::default()
    });

    let server_config = config.server_config().unwrap_or_else(|e| {
        log::error!("Invalid configuration: {e}");
        std::process::exit(1);
    });

    let http_addr = config.http_address();
    let server = RelayServer::new(server_config);
    let registry = server.registry().clone();

    // Relay and HTTP surface run as sibling listeners sharing one registry
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            log::error!("Relay server error: {e}");
            std::process::exit(1);
        }
    });

    if let Err(e) = http::serve(registry, &http_addr).await {
        log::error!("HTTP server error: {e}");
        std::process::exit(1);
    }
}
