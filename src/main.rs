mod config;
mod db;
mod ipc;
mod scoresheet;
mod store;

use std::io::{self, BufRead, Write};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(cfg: &config::Config) {
    // stdout carries the IPC stream; logs go to stderr.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_directive))
        .unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_DIRECTIVE));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() {
    let cfg = config::Config::from_env();
    init_logging(&cfg);
    info!(version = env!("CARGO_PKG_VERSION"), "scoresheetd starting");

    let mut state = ipc::AppState::default();
    if let Some(path) = cfg.workspace.as_ref() {
        if let Err(e) = state.open_workspace(path) {
            warn!(workspace = %path.display(), error = %e, "startup workspace not opened");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                let _ = writeln!(stdout, "{}", ipc::err("", "bad_json", e.to_string(), None));
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    info!("stdin closed; exiting");
}
