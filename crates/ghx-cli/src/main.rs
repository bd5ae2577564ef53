//! 🚀 ghx-cli: the front door. Parses flags, loads config, wires up Ctrl+C, and then
//! gets out of the way.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 🎬 "...and a config file somebody swore was in the current directory." 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ghx::app_config::{AppConfig, RunMode, load_config};
use ghx::shutdown::{Shutdown, ShutdownVerdict, forward_os_signals, watch_interrupts};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// 🦆 Bulk-load GH Archive into partitioned MySQL and keep the aggregates fresh.
#[derive(Parser, Debug)]
#[command(name = "ghx-cli", version, about)]
struct Args {
    /// 📄 TOML config file. Optional: env vars (GHX_*) and defaults cover the rest.
    #[arg(value_name = "CONFIG")]
    config_path: Option<PathBuf>,

    /// 📄 Same thing, for people who like their flags spelled out.
    #[arg(long = "config", value_name = "CONFIG", conflicts_with = "config_path")]
    config_flag: Option<PathBuf>,

    /// 📡 Log filter (`info`, `debug`, `ghx=trace`...). Wins over RUST_LOG.
    #[arg(long)]
    log_level: Option<String>,

    /// 🧵 Insertion workers.
    #[arg(long)]
    threads: Option<usize>,

    /// 🧮 Backend partitions.
    #[arg(long)]
    backends: Option<usize>,

    /// 🗂️ Where downloaded archive hours are cached.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 🗜️ `bulk` or `live`.
    #[arg(long)]
    mode: Option<RunMode>,
}

impl Args {
    /// 🔧 Flags win over the file and the environment. Applied once, before anything runs.
    fn apply_overrides(&self, app_config: &mut AppConfig) {
        if let Some(threads) = self.threads {
            app_config.runtime.worker_count = threads;
        }
        if let Some(backends) = self.backends {
            app_config.runtime.partitions = backends;
        }
        if let Some(data_dir) = &self.data_dir {
            app_config.archive.cache_dir = data_dir.clone();
        }
        if let Some(mode) = self.mode {
            app_config.runtime.mode = mode;
        }
    }
}

/// 🚀 main(): where it all begins. The "I pressed F5 and held my breath" moment.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 📡 RUST_LOG unless told otherwise, `info` unless nobody said anything
    let filter = match &args.log_level {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("💀 '{level}' is not a log filter I understand"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // 🔒 A config path that was given but isn't there is a mistake, not a default
    let config_file = args.config_flag.as_ref().or(args.config_path.as_ref());
    if let Some(path) = config_file {
        let exists = path.try_exists().with_context(|| {
            format!(
                "💀 Couldn't check whether the config file exists. If it's a relative path, \
                 try an absolute one. Was checking here: '{}'",
                path.display()
            )
        })?;
        anyhow::ensure!(exists, "💀 Config file '{}' doesn't exist", path.display());
    }

    let mut app_config = load_config(config_file.map(PathBuf::as_path))
        .context("💀 In ghx-cli, main, we couldn't load the config. Check the TOML and the GHX_* env vars")?;
    args.apply_overrides(&mut app_config);
    let grace = app_config.runtime.shutdown_grace();

    // 🛑 first signal cancels, second one (or the grace timer) pulls the plug
    let shutdown = Shutdown::new();
    let interrupts = forward_os_signals()?;
    let verdict = watch_interrupts(interrupts, &shutdown, grace, ghx::run(app_config, &shutdown)).await;

    let result = match verdict {
        ShutdownVerdict::Clean(result) => result,
        forced => {
            error!(verdict = ?forced, "💥 forced exit, in-flight work is abandoned");
            std::process::exit(1);
        }
    };

    if let Err(err) = result {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
                || cause_str.contains("pool timed out")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like something isn't reachable. Check that the MySQL frontend \
                 and every backend are up and the URLs in [store.Mysql] are right. If you're \
                 using Docker, `docker ps` will tell you who's napping. ☕"
            );
        }

        // 🗑️ Exit with prejudice.
        std::process::exit(1);
    }

    info!("👋 bye");
    Ok(())
}
