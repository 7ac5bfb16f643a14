use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let http_port = std::env::var("POINTGATE_HTTP_PORT").unwrap_or_else(|_| "8080".to_string());
    let store_kind = std::env::var("POINTGATE_STORE").unwrap_or_else(|_| "postgres".to_string());
    let db_host = std::env::var("POINTGATE_DB_HOST").unwrap_or_else(|_| "localhost".to_string());
    let db_name = std::env::var("POINTGATE_DB_NAME").unwrap_or_else(|_| "point_management".to_string());
    info!(
        target: "pointgate",
        "pointgate starting: RUST_LOG='{}', http_port={}, store={}, db_host='{}', db_name='{}'",
        rust_log, http_port, store_kind, db_host, db_name
    );

    pointgate::server::run().await
}
