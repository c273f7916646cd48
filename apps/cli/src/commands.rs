//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use etlflow_core::Step;
use etlflow_shared::{AppConfig, init_config, load_config, load_config_from};
use etlflow_wiki::{CityRecord, WikiClient, city_pipeline};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// etlflow: asynchronous batch pipelines.
#[derive(Parser)]
#[command(
    name = "etlflow",
    version,
    about = "Run asynchronous batch pipelines, such as the Wikipedia city expansion.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.etlflow/etlflow.toml.
    #[arg(long, global = true, env = "ETLFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Expand city names into the cities of their counties via Wikipedia.
    Cities {
        /// City names, e.g. "Norwood, Ohio".
        #[arg(required = true)]
        names: Vec<String>,

        /// MediaWiki api.php endpoint (overrides the config file).
        #[arg(long)]
        api_url: Option<String>,

        /// Print one JSON object per line instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "etlflow={level},etlflow_core={level},etlflow_shared={level},etlflow_wiki={level}"
        ))
    });

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Cities {
            names,
            api_url,
            json,
        } => cmd_cities(config, names, api_url, json).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

async fn cmd_cities(
    mut config: AppConfig,
    names: Vec<String>,
    api_url: Option<String>,
    json: bool,
) -> Result<()> {
    if let Some(url) = api_url {
        config.wikipedia.api_url = url;
    }

    let client = Arc::new(WikiClient::new(&config.wikipedia)?);
    info!(
        cities = names.len(),
        api_url = %client.api_url(),
        "expanding cities"
    );

    let mut pipeline = city_pipeline(client, &config, names);
    let progress = CliProgress::new(pipeline.steps().to_vec());

    let outcome = pipeline.run().await;
    progress.finish();
    let results = outcome?;

    if json {
        for record in &results {
            println!("{}", serde_json::to_string(record)?);
        }
        return Ok(());
    }

    println!();
    if results.is_empty() {
        println!("  No county members found.");
    }
    for record in &results {
        if let CityRecord::CountyMember { origin, city, seat } = record {
            println!("  {city:<40} seat: {seat:<30} via: {origin}");
        }
    }
    println!();
    println!("  Total: {}", results.len());
    println!();

    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Created default config at {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config)
        .map_err(|e| eyre!("failed to render config: {e}"))?;
    println!("{rendered}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner showing per-step queue depth while a pipeline runs.
struct CliProgress {
    spinner: ProgressBar,
    ticker: tokio::task::JoinHandle<()>,
}

impl CliProgress {
    fn new(steps: Vec<Arc<Step<CityRecord>>>) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));

        let bar = spinner.clone();
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(250));
            loop {
                interval.tick().await;
                let status: Vec<String> = steps
                    .iter()
                    .map(|step| {
                        format!(
                            "{} [{} queued, {} running]",
                            step.name(),
                            step.queued(),
                            step.in_flight()
                        )
                    })
                    .collect();
                bar.set_message(status.join("  "));
            }
        });

        Self { spinner, ticker }
    }

    fn finish(self) {
        self.ticker.abort();
        self.spinner.finish_and_clear();
    }
}
