//! skillbuddy.
//!
//! Watches a game window, matches skill cooldown icons and resource fill
//! against calibrated templates, and drives synthetic key input under a
//! file-configured policy.

mod capture;
mod config;
mod engine;
mod input;
mod resources;
mod scheduler;
mod skills;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::engine::Engine;
use crate::input::{ActionSink, EnigoBackend, KeyQueue};

fn main() -> Result<()> {
    // Structured logging. Use `RUST_LOG=info` etc.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = Config::load_or_default();

    // First run: write the defaults so there is a file to edit (and watch).
    if let Ok(path) = Config::path() {
        if !path.exists() {
            if let Err(err) = cfg.save() {
                tracing::warn!(error = %err, "could not write initial config");
            } else {
                tracing::info!(path = %path.display(), "wrote default config");
            }
        }
    }

    if cfg.window.app_name.is_empty() {
        tracing::warn!("no target window configured; set window.app_name in the config");
        match capture::list_windows() {
            Ok(windows) => {
                for w in windows {
                    tracing::info!(app_name = %w.app_name, title = %w.title, "capturable window");
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to enumerate windows"),
        }
    }

    let backend = EnigoBackend::new().context("initialize input backend")?;
    let sink: Arc<dyn ActionSink> = Arc::new(KeyQueue::spawn(Box::new(backend)));

    let engine = Engine::new(cfg, sink, None);
    engine.prepare_templates();
    engine.start();

    // Apply config edits live until the process is terminated.
    let watched = engine.clone();
    let _watcher =
        config::watch(move |cfg| watched.apply_config(cfg)).context("watch config file")?;

    loop {
        std::thread::park();
    }
}
