//! Process-wide configuration, read once from the environment at startup.
//! Every data-access call receives a handle to the same `StoreConfig`; there
//! is no per-call connection string assembly anywhere else in the crate.

use std::time::Duration;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key).ok().and_then(|s| s.parse::<u16>().ok()).unwrap_or(default)
}

fn env_millis(key: &str, default_ms: u64) -> Duration {
    let ms = std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(default_ms);
    Duration::from_millis(ms)
}

/// Which backing store implementation to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    /// In-memory store; lets the server run without a database.
    Memory,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
}

impl StoreConfig {
    pub fn from_env() -> Self {
        let kind = match env_or("POINTGATE_STORE", "postgres").to_ascii_lowercase().as_str() {
            "memory" | "mem" => StoreKind::Memory,
            _ => StoreKind::Postgres,
        };
        Self {
            kind,
            host: env_or("POINTGATE_DB_HOST", "localhost"),
            port: env_u16("POINTGATE_DB_PORT", 5432),
            user: env_or("POINTGATE_DB_USER", "pointgate"),
            password: env_or("POINTGATE_DB_PASSWORD", ""),
            dbname: env_or("POINTGATE_DB_NAME", "point_management"),
            connect_timeout: env_millis("POINTGATE_DB_CONNECT_TIMEOUT_MS", 3_000),
            query_timeout: env_millis("POINTGATE_DB_QUERY_TIMEOUT_MS", 5_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_port: u16,
    /// Session lifetime bound. The source portal had no expiry of its own;
    /// this is the implementer-chosen configuration point.
    pub session_ttl: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let ttl_secs = std::env::var("POINTGATE_SESSION_TTL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(3_600);
        Self {
            http_port: env_u16("POINTGATE_HTTP_PORT", 8080),
            session_ttl: Duration::from_secs(ttl_secs),
        }
    }
}
