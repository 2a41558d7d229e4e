use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use bansho_common::credentials::{create_api_key, list_api_keys, revoke_api_key};

/// bansho API key admin CLI.
///
/// Creates, lists, and revokes API keys against the same Postgres
/// database `bansho-server` uses. The database URL is loaded from
/// `BANSHO_DATABASE_URL` only — never accepted as a CLI argument
/// (CWE-214).
#[derive(Parser, Debug)]
#[command(name = "bansho-keys", version, about)]
struct Cli {
    /// Postgres connection URL, loaded from BANSHO_DATABASE_URL.
    #[arg(skip)]
    database_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new API key.
    Create {
        /// Role to assign: admin, user, or readonly (default: readonly).
        #[arg(long)]
        role: Option<String>,
    },
    /// List every API key, newest first.
    List,
    /// Revoke an API key by id.
    Revoke {
        /// The API key's UUID.
        api_key_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    cli.database_url =
        std::env::var("BANSHO_DATABASE_URL").context("BANSHO_DATABASE_URL env var is required")?;

    let pg = connect(&cli.database_url).await?;

    match cli.command {
        Commands::Create { role } => create(&pg, role.as_deref()).await,
        Commands::List => list(&pg).await,
        Commands::Revoke { api_key_id } => revoke(&pg, &api_key_id).await,
    }
}

async fn connect(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn create(pg: &PgPool, role: Option<&str>) -> Result<()> {
    let created = create_api_key(pg, role.unwrap_or(""))
        .await
        .context("failed to create API key")?;
    println!("api_key_id\t{}", created.api_key_id);
    println!("api_key\t{}", created.api_key);
    Ok(())
}

async fn list(pg: &PgPool) -> Result<()> {
    let keys = list_api_keys(pg).await.context("failed to list API keys")?;
    for key in keys {
        println!(
            "{}\t{}\t{}",
            key.api_key_id,
            key.role,
            if key.revoked { "yes" } else { "no" },
        );
    }
    Ok(())
}

async fn revoke(pg: &PgPool, api_key_id: &str) -> Result<()> {
    let revoked = revoke_api_key(pg, api_key_id)
        .await
        .context("failed to revoke API key")?;
    if revoked {
        println!("revoked\t{api_key_id}");
        Ok(())
    } else {
        eprintln!("not found or already revoked\t{api_key_id}");
        std::process::exit(1);
    }
}
