// tweetmux: entry point. Wires config, the shared upstream transport, one
// controller per stream kind, and the axum server together.

use std::process;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use tweetmux::config::Config;
use tweetmux::controller::{StreamController, Tuning};
use tweetmux::event::EventFilter;
use tweetmux::transport::TwitterTransport;
use tweetmux::ws::{self, AppState};

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            process::exit(1);
        }
    };

    let default_filter = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        languages = ?config.languages,
        "tweetmux starting"
    );

    // One signed HTTP client for the whole process; both controllers share
    // its connection pool.
    let transport = Arc::new(TwitterTransport::new(config.credentials.clone()));
    let event_filter = EventFilter::new(config.languages.clone());
    let state = AppState {
        sample: Arc::new(StreamController::sample(
            transport.clone(),
            event_filter.clone(),
            Tuning::default(),
        )),
        filter: Arc::new(StreamController::filter(
            transport,
            event_filter,
            Tuning::default(),
        )),
    };

    let app = ws::router(state);
    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("FATAL: failed to bind port {}: {e}", config.port);
            process::exit(1);
        }
    };
    info!(port = config.port, "listening");
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("FATAL: server error: {e}");
        process::exit(1);
    }
}
