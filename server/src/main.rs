use clap::Parser;
use log::{error, info};
use server::config::Config;
use server::network::SyncServer;

/// Main-method of the application.
/// Parses command-line arguments, then runs the sync server until it stops or Ctrl+C is pressed.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    info!(
        "Starting server with {:?} roles, keepalive every {:?}",
        config.roles,
        config.keepalive_interval()
    );

    let server = SyncServer::bind(&config).await?;
    let server_handle = tokio::spawn(server.run());

    // Handle shutdown gracefully
    tokio::select! {
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server stopped"),
                Ok(Err(e)) => error!("Server failed: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
