mod renderer;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use calltree_core::{Profile, ProfileConfig, load_event_log, replay};
use tracing_subscriber::EnvFilter;

/// Replay a recorded event log into a calltree profile and print it.
#[derive(Debug, Parser)]
#[command(name = "calltree", version)]
struct Args {
    /// Recorded event log (JSON).
    events: PathBuf,

    /// Profiling configuration; missing files fall back to defaults.
    #[arg(long, default_value = "calltree.toml")]
    config: PathBuf,

    #[arg(long, value_enum, default_value_t = Output::Text)]
    output: Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Output {
    /// Indented text tree.
    Text,
    /// Snapshot as JSON.
    Json,
    /// Raw node dump.
    Dump,
}

fn load_config(path: &Path) -> ProfileConfig {
    let config = ProfileConfig::load_optional(path).with_env_overrides();
    tracing::debug!(?config, "configuration loaded");
    config
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = load_config(&args.config);
    let log = load_event_log(&args.events)
        .with_context(|| format!("failed to read {}", args.events.display()))?;
    let profile = Profile::new(config, log.num_dense_metrics)?;
    profile.initialize();
    let result = replay(&profile, &log)?;
    profile.finalize();
    tracing::info!(
        threads = result.calltree.roots().len(),
        nodes = result.calltree.node_count(),
        "calltree unified"
    );

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match args.output {
        Output::Text => {
            let snapshot = result.calltree.snapshot(Some(&result.definitions));
            renderer::render_text(&mut out, &snapshot, Some(&result.definitions))?;
        }
        Output::Json => {
            serde_json::to_writer_pretty(&mut out, &result.calltree.snapshot(Some(&result.definitions)))?;
            writeln!(out)?;
        }
        Output::Dump => write!(out, "{}", result.calltree.dump(Some(&result.definitions)))?,
    }
    Ok(())
}
