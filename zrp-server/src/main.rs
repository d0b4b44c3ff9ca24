use clap::Parser;

use zrp_server::core::config::Cli;
use zrp_server::core::{Config, Server};
use zrp_server::utils::logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_cli(cli);

    let log_dir = std::path::Path::new(&config.db_path)
        .parent()
        .map(|p| p.join("logs"))
        .unwrap_or_else(|| "logs".into());
    let _log_guard = if std::fs::create_dir_all(&log_dir).is_ok() {
        logger::init_logger_with_file(&log_dir)
    } else {
        logger::init_logger();
        None
    };

    tracing::info!(
        port = config.port,
        db = %config.db_path,
        "Starting ZRP server"
    );

    let server = Server::build(config).await?;
    server.run().await?;
    Ok(())
}
