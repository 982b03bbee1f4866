//! healwatch operator CLI
//!
//! Inspects and changes the self-heal policy of a running agent, lists its
//! monitoring sessions and polls `/monitor` endpoints directly.

mod client;
mod commands;
mod output;

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{policy, poll, sessions};

/// healwatch operator CLI
#[derive(Parser)]
#[command(name = "hwctl")]
#[command(author, version, about = "CLI for the healwatch monitoring agent", long_about = None)]
pub struct Cli {
    /// Agent API URL (can also be set via HWCTL_API_URL env var)
    #[arg(long, env = "HWCTL_API_URL", default_value = "http://localhost:5000")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect or change the self-heal policy
    #[command(subcommand)]
    Policy(PolicyCommands),

    /// List open monitoring sessions
    Sessions,

    /// Poll a /monitor endpoint and print each reading
    Poll {
        /// Endpoint to poll
        #[arg(long)]
        url: String,

        /// Seconds between polls
        #[arg(long, default_value_t = 1.2)]
        interval: f64,

        /// Stop after this many polls
        #[arg(long)]
        count: Option<u32>,

        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
}

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Show the current policy and runtime state
    Show,

    /// Change one or more policy fields
    Set {
        /// Enable or disable self-healing
        #[arg(long)]
        enabled: Option<bool>,

        /// dry-run or armed
        #[arg(long)]
        mode: Option<String>,

        /// Rate limit window for a spike; leaks get multiples of it, all clamped to [5,300]
        #[arg(long)]
        rate_limit_seconds: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Policy(policy_cmd) => {
            let client = client::ApiClient::new(&cli.api_url)?;
            match policy_cmd {
                PolicyCommands::Show => policy::show_policy(&client, cli.format).await?,
                PolicyCommands::Set {
                    enabled,
                    mode,
                    rate_limit_seconds,
                } => {
                    let update = client::PolicyUpdate {
                        enabled,
                        mode,
                        rate_limit_seconds,
                    };
                    policy::set_policy(&client, update, cli.format).await?;
                }
            }
        }
        Commands::Sessions => {
            let client = client::ApiClient::new(&cli.api_url)?;
            sessions::list_sessions(&client, cli.format).await?;
        }
        Commands::Poll {
            url,
            interval,
            count,
            timeout,
        } => {
            let interval = poll_interval(interval)?;
            let client = client::MonitorClient::new(&url, Duration::from_secs(timeout.max(1)))?;
            poll::poll(&client, interval, count, cli.format).await?;
        }
    }

    Ok(())
}

/// Validate `--interval` seconds as a tick period
fn poll_interval(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        anyhow::bail!("--interval must be a positive number of seconds");
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|_| anyhow::anyhow!("--interval of {} seconds is too large", secs))
}
