mod access;
mod backup;
mod cache;
mod calc;
mod config;
mod db;
mod grading;
mod ipc;
mod render;
mod roster;

use std::io::{self, BufRead, Write};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cache::ReportCache;
use config::Config;

/// Logs go to stderr; stdout carries responses only.
fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn main() {
    let _ = dotenvy::dotenv();

    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("schoolbookd: {}", e);
            std::process::exit(2);
        }
    };
    init_tracing(&cfg.log_filter);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        cache_ttl_secs = cfg.report_cache_ttl.as_secs(),
        "schoolbookd starting"
    );

    let mut state = ipc::AppState::new(ReportCache::new(cfg.report_cache_ttl));
    if let Some(path) = cfg.workspace.clone() {
        if let Err(e) = ipc::open_workspace(&mut state, path.clone()) {
            error!(workspace = %path.display(), error = %e, "failed to open configured workspace");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => ipc::bad_json(e.to_string()),
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    info!("stdin closed, exiting");
}
