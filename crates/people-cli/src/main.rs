use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use people_core::{Page, DEFAULT_PAGE_LIMIT};
use people_store_sqlite::SqliteStore;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "people")]
#[command(about = "People registry operator CLI")]
struct Cli {
    #[arg(long, default_value = "./database.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Users {
        #[command(subcommand)]
        command: UsersCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    /// Print the pending versions without applying them.
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum UsersCommand {
    List(UsersListArgs),
    Show(UsersShowArgs),
    Find(UsersFindArgs),
}

#[derive(Debug, Args)]
struct UsersListArgs {
    #[arg(long, default_value_t = 0)]
    skip: u32,
    #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
    limit: u32,
}

#[derive(Debug, Args)]
struct UsersShowArgs {
    #[arg(long)]
    id: i64,
}

#[derive(Debug, Args)]
struct UsersFindArgs {
    /// Case-insensitive prefix of the stored full name.
    #[arg(long)]
    prefix: String,
}

/// Every command prints one of these; `payload` is the command's own result.
#[derive(Debug, Serialize)]
struct Output<'a, T: Serialize> {
    contract_version: &'static str,
    payload: &'a T,
}

fn emit_json<T: Serialize>(payload: &T) -> Result<()> {
    let output = Output { contract_version: CLI_CONTRACT_VERSION, payload };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut store = SqliteStore::open(&cli.db)?;
    match cli.command {
        Command::Db { command } => run_db(command, &mut store),
        Command::Users { command } => {
            store.migrate()?;
            run_users(command, &store)
        }
    }
}

fn run_db(command: DbCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => emit_json(&store.schema_status()?),
        DbCommand::Migrate(args) if args.dry_run => emit_json(&store.plan_migrations()?),
        DbCommand::Migrate(_) => emit_json(&store.migrate()?),
    }
}

fn run_users(command: UsersCommand, store: &SqliteStore) -> Result<()> {
    match command {
        UsersCommand::List(args) => {
            emit_json(&store.list_people(Page { skip: args.skip, limit: args.limit })?)
        }
        UsersCommand::Show(args) => {
            let person =
                store.get_person(args.id)?.ok_or_else(|| anyhow!("user not found: id={}", args.id))?;
            emit_json(&person)
        }
        UsersCommand::Find(args) => {
            let person = store
                .find_by_name_prefix(&args.prefix)?
                .ok_or_else(|| anyhow!("user not found: name prefix={}", args.prefix))?;
            emit_json(&person)
        }
    }
}
