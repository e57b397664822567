use std::sync::Arc;

use parlor::build_app;
use parlor::chess::RelayRules;
use parlor::config::{self, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    config::init();

    let server_config = ServerConfig::from_env();
    let words = config::load_word_pairs();
    let port = server_config.port;

    let (app, _state) = build_app(server_config, words, Arc::new(RelayRules));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .expect("Failed to bind");

    tracing::info!("Parlor server running on port {}", port);

    axum::serve(listener, app).await.unwrap();
}
