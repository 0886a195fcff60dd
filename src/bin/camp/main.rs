//! Camp Bug Hunter CLI
//!
//! Command-line companion for the Camp Bug Hunter server.

mod client;
mod commands;
mod style;

use clap::{Parser, Subcommand};
use client::BugQuery;
use style::*;

#[derive(Parser)]
#[command(name = "camp")]
#[command(version)]
#[command(about = "Camp Bug Hunter - bug reports and reward coins", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Camp Bug Hunter server URL
    #[arg(
        short,
        long,
        env = "CAMP_URL",
        default_value = "http://localhost:3000",
        global = true
    )]
    url: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the rewards on offer
    #[command(visible_alias = "r")]
    Rewards,

    /// Show a player's reward coin balance
    #[command(visible_alias = "b")]
    Balance {
        /// Minecraft username
        username: String,
    },

    /// List bug reports
    Bugs {
        /// Filter by status (BUG, ON_INVESTIGATION, FIXED, NOT_A_BUG)
        #[arg(long)]
        status: Option<String>,

        /// Filter by severity (LOW, MEDIUM, HIGH, URGENT)
        #[arg(long)]
        severity: Option<String>,

        /// Only reports from this Minecraft username
        #[arg(long)]
        owner: Option<String>,
    },

    /// Claim pending reward commands like the Minecraft plugin
    Poll {
        /// Plugin token sent as x-plugin-token
        #[arg(long, env = "MC_PLUGIN_TOKEN")]
        token: Option<String>,

        /// Keep polling every N seconds
        #[arg(short, long)]
        watch: Option<u64>,
    },

    /// Administration tasks run against the database
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Subcommand)]
enum AdminAction {
    /// Create or promote an administrator
    Bootstrap,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }

    let result = match cli.command {
        Commands::Rewards => commands::rewards::run(&cli.url).await,
        Commands::Balance { username } => commands::balance::run(&cli.url, &username).await,
        Commands::Bugs {
            status,
            severity,
            owner,
        } => {
            let query = BugQuery {
                status,
                severity,
                minecraft_ign: owner,
            };
            commands::bugs::run(&cli.url, query).await
        }
        Commands::Poll { token, watch } => {
            commands::poll::run(&cli.url, token.as_deref(), watch).await
        }
        Commands::Admin {
            action: AdminAction::Bootstrap,
        } => commands::admin::bootstrap().await,
    };

    if let Err(e) = result {
        print_error(&format!("{}", e));
        std::process::exit(1);
    }
}
