use std::process::ExitCode;

use log::error;
use tracing_subscriber::EnvFilter;

use passage_proxy::{serve, ProxyConfig};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ProxyConfig::from_env();
    match serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("passage proxy stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}
