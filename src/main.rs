use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod db;
mod error;
mod leaderboard;
mod models;
mod report;

use auth::{AuthGate, HttpIdentityProvider, IdentityProvider};
use config::Config;
use db::PgXpStore;
use models::{BatchKey, RankedEntry};

#[derive(Parser)]
#[command(name = "xp-leaderboard")]
#[command(about = "Cohort XP leaderboard for Group Scholar", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the ranked XP board for one or more cohort batches
    Board {
        /// Batch to include, as TYPE:NUMBER (repeatable)
        #[arg(long = "cohort", required = true)]
        cohorts: Vec<String>,
        /// Only show students whose name contains this text
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 25)]
        limit: usize,
        /// Print the board as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown leaderboard report
    Report {
        #[arg(long = "cohort", required = true)]
        cohorts: Vec<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value = "leaderboard.md")]
        out: PathBuf,
    },
    /// Export the ranked board as CSV
    Export {
        #[arg(long = "cohort", required = true)]
        cohorts: Vec<String>,
        #[arg(long, default_value = "leaderboard.csv")]
        out: PathBuf,
    },
    /// Show the current gated session
    Whoami {
        /// Re-validate the session with the identity provider first
        #[arg(long)]
        refresh: bool,
    },
    /// Sign out of the current session
    SignOut,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let provider = Arc::new(HttpIdentityProvider::new(
        &config.auth_api_url,
        &config.auth_api_key,
        config.access_token.clone(),
    )?);
    let gate = AuthGate::init(provider, auth::REQUIRED_ROLE).await;

    match cli.command {
        Commands::Board {
            cohorts,
            search,
            limit,
            json,
        } => {
            require_student(&gate)?;
            let store = connect_store(&config).await?;
            let batches = parse_batches(&cohorts)?;
            let entries = leaderboard::aggregate(&store, &batches).await?;
            let view = match search.as_deref() {
                Some(needle) => leaderboard::filter_by_name(&entries, needle),
                None => entries,
            };

            if json {
                let top: Vec<&RankedEntry> = view.iter().take(limit).collect();
                println!("{}", serde_json::to_string_pretty(&top)?);
            } else if view.is_empty() {
                println!("No students found for these batches.");
            } else {
                println!("Top students by XP:");
                for entry in view.iter().take(limit) {
                    println!(
                        "- #{} {} ({}, {}:{}) {} xp",
                        entry.rank,
                        entry.record.full_name,
                        entry.record.email,
                        entry.record.cohort_type,
                        entry.record.cohort_number,
                        entry.record.xp
                    );
                }
            }
        }
        Commands::Report {
            cohorts,
            search,
            out,
        } => {
            require_student(&gate)?;
            let store = connect_store(&config).await?;
            let batches = parse_batches(&cohorts)?;
            let entries = leaderboard::aggregate(&store, &batches).await?;
            let view = match search.as_deref() {
                Some(needle) => leaderboard::filter_by_name(&entries, needle),
                None => entries,
            };

            let scope = batches
                .iter()
                .map(BatchKey::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            let report = report::build_report(&scope, &view);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { cohorts, out } => {
            require_student(&gate)?;
            let store = connect_store(&config).await?;
            let batches = parse_batches(&cohorts)?;
            let entries = leaderboard::aggregate(&store, &batches).await?;

            let file = std::fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            let written = report::write_csv(&entries, file)?;
            println!("Exported {written} rows to {}.", out.display());
        }
        Commands::Whoami { refresh } => {
            if refresh {
                gate.refresh_auth().await;
            }
            match gate.current_session() {
                Some(session) => println!(
                    "Signed in as {} ({}) with role {}",
                    session.user.email, session.user.id, session.user.role
                ),
                None => println!("Not signed in."),
            }
        }
        Commands::SignOut => {
            if gate.is_authenticated() {
                gate.sign_out().await;
                println!("Signed out.");
            } else {
                println!("Not signed in.");
            }
        }
    }

    Ok(())
}

fn require_student<P: IdentityProvider>(gate: &AuthGate<P>) -> anyhow::Result<()> {
    match gate.current_user() {
        Some(user) => {
            tracing::debug!(user = %user.email, "authenticated as student");
            Ok(())
        }
        None => anyhow::bail!("sign in with a student account to view the leaderboard"),
    }
}

async fn connect_store(config: &Config) -> anyhow::Result<PgXpStore> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to the XP store")?;
    Ok(PgXpStore::new(pool))
}

fn parse_batches(raw: &[String]) -> anyhow::Result<Vec<BatchKey>> {
    raw.iter().map(|value| BatchKey::parse(value)).collect()
}
