//! Process Profiler CLI
//!
//! A command-line tool for starting profiling runs, reading their
//! parameters and results, and querying the custom metrics the adapter
//! serves.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::{ApiClient, ApiError, JobParams};
use commands::{metrics, runs};
use output::{color_status, print_error, print_success, OutputFormat};

const DEFAULT_API_URL: &str = "http://localhost:8080";
const DEFAULT_BASE_PATH: &str = "/profiler";

/// Process Profiler CLI
#[derive(Parser)]
#[command(name = "pctl")]
#[command(author, version, about = "CLI for the Process Profiler adapter", long_about = None)]
pub struct Cli {
    /// Adapter URL (can also be set via PCTL_API_URL env var)
    #[arg(long, env = "PCTL_API_URL")]
    pub api_url: Option<String>,

    /// Path the adapter serves profiling endpoints under
    #[arg(long, env = "PCTL_BASE_PATH")]
    pub base_path: Option<String>,

    /// Output format
    #[arg(long, short, value_enum)]
    pub format: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Args)]
pub struct TargetArgs {
    /// Namespace of the target pod
    pub namespace: String,
    /// Target pod name
    pub pod: String,
    /// Process ID inside the pod
    pub pid: String,
}

impl TargetArgs {
    fn target(&self) -> runs::Target<'_> {
        runs::Target {
            namespace: &self.namespace,
            pod: &self.pod,
            pid: &self.pid,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start profiling a process
    Run {
        #[command(flatten)]
        target: TargetArgs,

        /// Query frequency
        #[arg(long, default_value_t = 10)]
        freq: u32,

        /// Number of query iterations
        #[arg(long, default_value_t = 1000)]
        iter: u32,

        /// Reported percentile
        #[arg(long, default_value_t = 99)]
        pert: u32,
    },

    /// Show the parameters a run was started with
    Params {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Show the measured result of a run
    Result {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Remove a run's stored values and its profiling job
    Close {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Query the custom metrics API
    #[command(subcommand)]
    Metrics(MetricsCommands),

    /// Manage the CLI configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum MetricsCommands {
    /// List the metrics the adapter serves
    List,

    /// Get a metric value
    Get {
        /// Namespace of the object
        namespace: String,
        /// Resource, e.g. pods or deployments.apps
        resource: String,
        /// Object name, or * to select by label
        name: String,
        /// Metric name, e.g. 7-cpu
        metric: String,

        /// Label selector used when name is *
        #[arg(long, short)]
        selector: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Store defaults in the configuration file
    Set {
        #[arg(long)]
        api_url: Option<String>,

        #[arg(long)]
        base_path: Option<String>,

        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = execute(cli).await {
        match err.downcast_ref::<ApiError>() {
            Some(ApiError::Status { status, message }) => {
                print_error(&format!("{} {}", color_status(*status), message))
            }
            _ => print_error(&format!("{:#}", err)),
        }
        std::process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let file = config::Config::load()?;

    let api_url = cli
        .api_url
        .or_else(|| file.api_url.clone())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let base_path = cli
        .base_path
        .or_else(|| file.base_path.clone())
        .unwrap_or_else(|| DEFAULT_BASE_PATH.to_string());
    let format = cli
        .format
        .or_else(|| file.default_format.as_deref().and_then(|f| f.parse().ok()))
        .unwrap_or_default();

    // Built lazily: `config` commands must not need a valid URL
    let client = || ApiClient::new(&api_url, &base_path);

    // Execute command
    match cli.command {
        Commands::Config(config_cmd) => {
            configure(config_cmd, file, &api_url, &base_path, format)?;
        }
        Commands::Run {
            target,
            freq,
            iter,
            pert,
        } => {
            let params = JobParams { freq, iter, pert };
            runs::run(&client()?, &target.target(), &params, format).await?;
        }
        Commands::Params { target } => {
            runs::show_params(&client()?, &target.target(), format).await?;
        }
        Commands::Result { target } => {
            runs::show_result(&client()?, &target.target(), format).await?;
        }
        Commands::Close { target } => {
            runs::close(&client()?, &target.target(), format).await?;
        }
        Commands::Metrics(metrics_cmd) => match metrics_cmd {
            MetricsCommands::List => {
                metrics::list(&client()?, format).await?;
            }
            MetricsCommands::Get {
                namespace,
                resource,
                name,
                metric,
                selector,
            } => {
                metrics::get(
                    &client()?,
                    &namespace,
                    &resource,
                    &name,
                    &metric,
                    selector.as_deref(),
                    format,
                )
                .await?;
            }
        },
    }

    Ok(())
}

fn configure(
    command: ConfigCommands,
    file: config::Config,
    api_url: &str,
    base_path: &str,
    format: OutputFormat,
) -> Result<()> {
    match command {
        ConfigCommands::Show => output::print_json(&config::Config {
            api_url: Some(api_url.to_string()),
            base_path: Some(base_path.to_string()),
            default_format: Some(format.as_str().to_string()),
        }),
        ConfigCommands::Set {
            api_url,
            base_path,
            format,
        } => {
            let updated = config::Config {
                api_url: api_url.or(file.api_url),
                base_path: base_path.or(file.base_path),
                default_format: format
                    .map(|f| f.as_str().to_string())
                    .or(file.default_format),
            };
            let path = updated.save()?;
            print_success(&format!("Saved configuration to {}", path.display()));
            Ok(())
        }
    }
}
