use gopulse_core::{Config, PulseClient};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,gopulse_core=debug";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = Config::from_env()?;
    info!(
        site = %config.site_url,
        reconnect_delay_ms = config.reconnect_delay.as_millis() as u64,
        keepalive_ms = config.keepalive_interval.as_millis() as u64,
        heartbeat_ms = config.heartbeat_interval.as_millis() as u64,
        user = config.credentials.as_ref().map(|c| c.username.as_str()),
        "starting gopulse"
    );

    let mut client = PulseClient::new(config)?;
    client
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for ctrl-c, shutting down");
            }
        })
        .await?;

    info!("finished");
    Ok(())
}
