//! Broker autoscaler control client
//!
//! Queries or stops a running autoscaler through its control port, and
//! can follow its output rate live.

mod client;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::ControlClient;
use std::time::Duration;

/// Broker autoscaler control client
#[derive(Parser)]
#[command(name = "brokerctl")]
#[command(author, version, about = "Control client for the broker autoscaler", long_about = None)]
pub struct Cli {
    /// Control port address (can also be set via BROKERCTL_ADDRESS env var)
    #[arg(long, env = "BROKERCTL_ADDRESS", default_value = "127.0.0.1:8888")]
    pub address: String,

    /// Give up on a reply after this long; one controller tick is ~3 s
    #[arg(long, default_value_t = 10_000)]
    pub timeout_ms: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the most recent status line
    GetData {
        /// Print the line exactly as the controller sent it
        #[arg(long)]
        raw: bool,
    },

    /// End the run after the current tick
    Quit,

    /// Poll the status line and print one column as KB/s
    Watch {
        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Value column to show, 0-based after the timestamp (default: last)
        #[arg(long)]
        column: Option<usize>,

        /// Stop after this many rows
        #[arg(long)]
        count: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = ControlClient::new(&cli.address, Duration::from_millis(cli.timeout_ms));

    match cli.command {
        Commands::GetData { raw } => {
            let line = client.get_data().await?;
            if raw {
                println!("{}", line);
            } else {
                println!("{}  {}", output::format_timestamp(line.timestamp_ms), line);
            }
        }
        Commands::Quit => {
            client.quit().await?;
            output::print_success(&format!("Quit sent to {}", client.address()));
        }
        Commands::Watch {
            interval_ms,
            column,
            count,
        } => {
            watch(&client, Duration::from_millis(interval_ms), column, count).await?;
        }
    }

    Ok(())
}

/// Follow the controller until it goes away or `count` rows are printed
async fn watch(client: &ControlClient, interval: Duration, column: Option<usize>, count: Option<u64>) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    let mut printed = 0u64;
    let mut last_timestamp = None;

    loop {
        ticker.tick().await;

        let line = match client.get_data().await {
            Ok(line) => line,
            Err(e) if printed == 0 => return Err(e),
            Err(e) => {
                output::print_warning(&format!("Controller stopped responding: {:#}", e));
                return Ok(());
            }
        };

        // The controller only refreshes once per tick
        if last_timestamp == Some(line.timestamp_ms) {
            continue;
        }
        last_timestamp = Some(line.timestamp_ms);

        if output::select_column(&line, column).is_none() {
            output::print_error(&format!("status line has no column {:?}", column));
        }
        println!("{}", output::format_watch_row(&line, column));

        printed += 1;
        if count.map(|c| printed >= c).unwrap_or(false) {
            return Ok(());
        }
    }
}
