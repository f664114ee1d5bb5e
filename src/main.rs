use live_match_tracker::config::{ServerConfig, TrackerConfig};
use live_match_tracker::live::HttpEventSource;
use live_match_tracker::registry::MatchRegistry;
use live_match_tracker::{http, printer};

use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "live_match_tracker=info".into()),
        )
        .init();

    let tracker_config = TrackerConfig::from_env()?;
    let server_config = ServerConfig::from_env()?;

    let source = HttpEventSource::new(&tracker_config.upstream_url, tracker_config.connect_timeout)?;
    tracing::info!("Upstream live events at {}", tracker_config.upstream_url);
    let registry = MatchRegistry::new(source, tracker_config);

    if let Some(period) = server_config.print_interval {
        tokio::spawn(printer::run_state_printer(registry.clone(), period));
    }

    let listener = TcpListener::bind(server_config.listen_addr).await?;
    tracing::info!("Starting server on {}", server_config.listen_addr);
    axum::serve(listener, http::router(registry)).await?;

    Ok(())
}
