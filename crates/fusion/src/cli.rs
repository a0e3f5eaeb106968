//! Exposes the command line application.
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fusion_cache::config::Config;
use fusion_cache::metrics;
use url::Url;

use crate::fetch;
use crate::logging;

/// Fusion commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a template document through the cache and print it as JSON.
    Fetch {
        /// The URL of the template document, either YAML or JSON.
        url: Url,

        /// How often to fetch the document. Every fetch after the first should be a cache hit.
        #[arg(long, default_value_t = 1)]
        repeat: usize,

        /// Overrides the configured `default_timeout`, e.g. `90s` or `1h`.
        #[arg(long, value_parser = humantime::parse_duration)]
        max_age: Option<Duration>,
    },

    /// Load the configuration file and print the effective configuration.
    CheckConfig,
}

/// Command line interface parser.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config.as_deref()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: The runtime is started further down, this is still single-threaded.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        let mut tags = config.metrics.custom_tags.clone();
        if let Some(tag) = config.metrics.hostname_tag.clone() {
            if let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok()) {
                tags.insert(tag, hostname);
            }
        }
        if let Err(error) = metrics::configure_statsd(&config.metrics.prefix, statsd.as_str(), tags) {
            tracing::warn!(error = &error as &dyn std::error::Error, "Failed to configure statsd");
        }
    }

    match cli.command {
        Command::Fetch {
            url,
            repeat,
            max_age,
        } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .thread_name("fusion")
                .enable_all()
                .build()
                .context("failed to start the runtime")?;
            runtime.block_on(fetch::run(config, url, repeat, max_age))?;
        }
        Command::CheckConfig => {
            println!("{config:#?}");
            if config.cache.is_none() {
                println!("note: no `cache` section, caching is disabled");
            }
        }
    }

    Ok(())
}
