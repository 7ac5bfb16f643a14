//!
//! pointgate tracker CLI
//! ---------------------
//! Command-line viewer for the live vehicle position feed. Polls a running
//! pointgate server on a fixed cadence and prints every fresh sample until
//! interrupted. Fetch failures are logged and the loop keeps going; this is
//! the same never-stop policy the portal's map page uses.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Local;
use tracing_subscriber::{fmt, EnvFilter};

use pointgate::poller::{spawn_poller, HttpFeed, PollerConfig, PositionSink};
use pointgate::store::PositionSample;

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--base <url>] [--interval-ms <n>] [--timeout-ms <n>]\n\nFlags:\n  --base <url>         Server base URL (default: http://127.0.0.1:8080)\n  --interval-ms <n>    Poll cadence in milliseconds (default: 1000)\n  --timeout-ms <n>     Per-request timeout in milliseconds (default: 2000)\n  -h, --help           Show this help\n\nExamples:\n  {program} --base http://127.0.0.1:8080\n  {program} --interval-ms 500"
    );
}

struct ConsoleSink;

impl PositionSink for ConsoleSink {
    fn update(&self, sample: PositionSample) {
        println!(
            "[{}] position: lat={:.6} lng={:.6}",
            Local::now().format("%H:%M:%S"),
            sample.lat,
            sample.lng
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(|s| s.as_str()).unwrap_or("point_tracker");

    let mut base = "http://127.0.0.1:8080".to_string();
    let mut interval_ms: u64 = 1_000;
    let mut timeout_ms: u64 = 2_000;

    let mut i = 1usize;
    while i < args.len() {
        match args[i].as_str() {
            "--base" => {
                i += 1;
                base = args.get(i).cloned().ok_or_else(|| anyhow!("--base requires a value"))?;
            }
            "--interval-ms" => {
                i += 1;
                interval_ms = args
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| anyhow!("--interval-ms requires a number"))?;
            }
            "--timeout-ms" => {
                i += 1;
                timeout_ms = args
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| anyhow!("--timeout-ms requires a number"))?;
            }
            "-h" | "--help" => {
                print_usage(program);
                return Ok(());
            }
            other => {
                print_usage(program);
                return Err(anyhow!("unknown flag: {other}"));
            }
        }
        i += 1;
    }

    let feed = Arc::new(HttpFeed::new(&base, Duration::from_millis(timeout_ms))?);
    let handle = spawn_poller(
        feed,
        Arc::new(ConsoleSink),
        PollerConfig { interval: Duration::from_millis(interval_ms) },
    );
    println!("tracking {base} every {interval_ms} ms; Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    handle.shutdown().await;
    Ok(())
}
