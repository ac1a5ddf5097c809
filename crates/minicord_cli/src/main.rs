//! Minicord CLI
//!
//! Command-line client for minicord channels.
//!
//! # Commands
//!
//! - `history` - Print a channel's message history
//! - `tail` - Follow a channel live and send stdin lines to it

mod commands;

use clap::{Parser, Subcommand};
use minicord_protocol::{ChannelId, MessageId, ServerId, DEFAULT_PAGE_LIMIT};
use minicord_sync::{ChannelRef, ClientConfig, Credentials};
use tracing_subscriber::EnvFilter;

/// Minicord command-line client.
#[derive(Parser)]
#[command(name = "minicord")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the HTTP API
    #[arg(
        global = true,
        long,
        env = "MINICORD_API_URL",
        default_value = "http://localhost:8080/"
    )]
    api_url: String,

    /// Push-channel endpoint
    #[arg(
        global = true,
        long,
        env = "MINICORD_WS_URL",
        default_value = "ws://localhost:8080/ws"
    )]
    ws_url: String,

    /// Bearer token
    #[arg(global = true, long, env = "MINICORD_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a channel's message history
    History {
        /// Channel to read
        #[arg(short, long)]
        channel: u64,

        /// Only messages older than this id
        #[arg(short, long)]
        before: Option<MessageId>,

        /// Messages per page
        #[arg(short, long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: u32,

        /// Keep paging until the start of history
        #[arg(short, long)]
        all: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Follow a channel live; lines read from stdin are sent to it
    Tail {
        /// Channel to follow
        #[arg(short, long)]
        channel: u64,

        /// Server owning the channel
        #[arg(short, long)]
        server: u64,

        /// Older pages to load before following
        #[arg(short, long, default_value_t = 0)]
        backfill: u32,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::new(cli.ws_url, cli.api_url);

    match cli.command {
        Commands::History {
            channel,
            before,
            limit,
            all,
            format,
        } => {
            let token = cli.token.ok_or("API token required for history")?;
            let config = config.with_page_limit(limit);
            commands::history::run(
                &config,
                Credentials::new(token),
                ChannelId(channel),
                before,
                all,
                &format,
            )
            .await?;
        }
        Commands::Tail {
            channel,
            server,
            backfill,
        } => {
            let token = cli.token.ok_or("API token required for tail")?;
            let channel = ChannelRef::new(ServerId(server), ChannelId(channel));
            commands::tail::run(config, Credentials::new(token), channel, backfill).await?;
        }
        Commands::Version => {
            println!("minicord CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_history_arguments() {
        let cli = Cli::parse_from([
            "minicord", "--token", "t", "history", "-c", "7", "--before", "901", "--all",
        ]);
        assert_eq!(cli.token.as_deref(), Some("t"));
        match cli.command {
            Commands::History {
                channel,
                before,
                limit,
                all,
                ..
            } => {
                assert_eq!(channel, 7);
                assert_eq!(before, Some(MessageId::from(901)));
                assert_eq!(limit, DEFAULT_PAGE_LIMIT);
                assert!(all);
            }
            _ => panic!("expected history"),
        }
    }
}
