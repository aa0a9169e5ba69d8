//! init_users - create the credential database with the default accounts

use anyhow::Result;
use clap::Parser;

use guava_scan::auth::DEFAULT_USERS;
use guava_scan::config::AppConfig;
use guava_scan::CredentialStore;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Database path (defaults to the configured db_path).
    #[arg(long)]
    db_path: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let db_path = match args.db_path {
        Some(path) => path,
        None => AppConfig::load()?.db_path,
    };

    let store = CredentialStore::open(&db_path)?;
    let added = store.seed_defaults()?;
    log::info!("{} of {} default users added to {}", added, DEFAULT_USERS.len(), db_path);
    println!("users in {}: {}", db_path, store.user_count()?);
    Ok(())
}
