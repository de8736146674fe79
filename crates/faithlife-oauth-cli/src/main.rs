//! Faithlife OAuth - sign-in host and signing helpers
//!
//! Main entry point for the `faithlife-oauth` CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{header, serve, sso_url};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Faithlife OAuth - sign-in host and request signing helpers
#[derive(Parser)]
#[command(name = "faithlife-oauth")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a TOML file with token, secret and root_url
    #[arg(long, global = true, env = "FAITHLIFE_OAUTH_CONFIG")]
    pub config: Option<PathBuf>,

    /// OAuth consumer token (overrides config file)
    #[arg(long, global = true, env = "FAITHLIFE_CONSUMER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// OAuth consumer secret (overrides config file)
    #[arg(long, global = true, env = "FAITHLIFE_CONSUMER_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// Provider root URL (default: https://auth.logos.com/oauth)
    #[arg(long, global = true, env = "FAITHLIFE_OAUTH_ROOT_URL")]
    pub root_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the signin/verify/associate routes
    Serve(serve::ServeArgs),

    /// Print an Authorization header
    Header(header::HeaderArgs),

    /// Print a single-sign-on credential lookup URL
    SsoUrl(sso_url::SsoUrlArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "faithlife_oauth=debug,faithlife_oauth_cli=debug,tower_http=debug,info"
    } else {
        "faithlife_oauth=info,faithlife_oauth_cli=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .init();

    let ctx = commands::Context::load(
        cli.config.as_deref(),
        cli.token,
        cli.secret,
        cli.root_url,
    )?;

    match cli.command {
        Commands::Serve(args) => serve::run(args, &ctx).await,
        Commands::Header(args) => header::run(args, &ctx).await,
        Commands::SsoUrl(args) => sso_url::run(args, &ctx).await,
    }
}
