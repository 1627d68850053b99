//! Command-line front end over `verobj_core`.
//!
//! # Responsibility
//! - Resolve configuration from flags and `VEROBJ_*` environment variables.
//! - Run each mutation in its own immediate transaction.
//! - Print rows as JSON and errors as `error[<kind>]: <message>`.

use clap::{Parser, Subcommand};
use log::info;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use uuid::Uuid;
use verobj_core::{
    init_logging, open_db, provision_repository, run_in_transaction, sqlite_object_service,
    ConfigError, CoreConfig, CreatePayload, DataMap, DbError, ObjectNumber,
    ObjectNumberRepository, RepoError, ServiceError, SqliteObjectNumberRepository,
    VersionedObjectKey, VersionedObjectRow, FIRST_OBJECT_NUMBER,
};

/// Repository-scoped versioned objects over SQLite
#[derive(Parser, Debug)]
#[command(name = "verobj")]
#[command(version, about, long_about = None)]
struct Cli {
    /// SQLite database file [env: VEROBJ_DB_PATH]
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// trace|debug|info|warn|error [env: VEROBJ_LOG_LEVEL]
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Absolute directory for rolling log files; stderr when unset [env: VEROBJ_LOG_DIR]
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or migrate the database file
    Init,

    /// Register a repository and its object number counter
    Provision {
        /// Repository id; a random UUID when omitted
        #[arg(long)]
        repository_id: Option<String>,

        /// First object number handed out
        #[arg(long, default_value_t = FIRST_OBJECT_NUMBER)]
        first: ObjectNumber,
    },

    /// Create a new object and print it
    Create {
        #[arg(long)]
        repository_id: String,

        /// JSON object of data columns
        #[arg(long, default_value = "{}")]
        data: String,

        #[arg(long)]
        actor: Option<String>,
    },

    /// Update data columns of the latest row of an object
    Update {
        #[arg(long)]
        repository_id: String,

        #[arg(long)]
        object_number: ObjectNumber,

        /// JSON object of data columns to overwrite
        #[arg(long)]
        data: String,

        #[arg(long)]
        actor: Option<String>,
    },

    /// Delete the latest row of an object
    Delete {
        #[arg(long)]
        repository_id: String,

        #[arg(long)]
        object_number: ObjectNumber,
    },

    /// Print one row
    Get {
        #[arg(long)]
        repository_id: String,

        #[arg(long)]
        object_number: ObjectNumber,

        /// Read the historical row instead of the latest one
        #[arg(long)]
        historical: bool,
    },

    /// Print the next object number of a repository
    Counter {
        #[arg(long)]
        repository_id: String,
    },
}

#[derive(Debug)]
enum CliError {
    Config(ConfigError),
    Logging(String),
    MissingDbPath,
    InvalidData(String),
    Db(DbError),
    Service(ServiceError),
    NotFound(String),
}

impl CliError {
    fn label(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::Logging(_) | Self::MissingDbPath => "config",
            Self::InvalidData(_) => "bad_request",
            Self::Db(_) => "persistence",
            Self::Service(err) => err.kind().as_str(),
            Self::NotFound(_) => "not_found",
        }
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Logging(message) => write!(f, "failed to initialize logging: {message}"),
            Self::MissingDbPath => write!(f, "no database path; pass --db or set VEROBJ_DB_PATH"),
            Self::InvalidData(message) => write!(f, "invalid --data: {message}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Service(err) => write!(f, "{err}"),
            Self::NotFound(what) => write!(f, "{what} not found"),
        }
    }
}

impl Error for CliError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Service(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<DbError> for CliError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<ServiceError> for CliError {
    fn from(value: ServiceError) -> Self {
        Self::Service(value)
    }
}

impl From<RepoError> for CliError {
    fn from(value: RepoError) -> Self {
        Self::Service(value.into())
    }
}

impl From<rusqlite::Error> for CliError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(value.into())
    }
}

fn main() {
    if let Err(err) = run(Cli::parse()) {
        eprintln!("error[{}]: {}", err.label(), err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = CoreConfig::from_env()?;
    config.apply_overrides(cli.db, cli.log_level, cli.log_dir)?;
    init_logging(config.log_level, config.log_target.clone()).map_err(CliError::Logging)?;

    let db_path = config.db_path.ok_or(CliError::MissingDbPath)?;
    let mut conn = open_db(&db_path)?;
    info!("event=cli_command module=cli status=start command={}", command_name(&cli.command));

    match cli.command {
        Command::Init => {
            println!("initialized {}", db_path.display());
            Ok(())
        }
        Command::Provision {
            repository_id,
            first,
        } => {
            let repository_id = repository_id.unwrap_or_else(|| Uuid::new_v4().to_string());
            run_in_transaction(&mut conn, |tx| -> Result<(), CliError> {
                Ok(provision_repository(tx, &repository_id, first)?)
            })?;
            println!("{repository_id}");
            Ok(())
        }
        Command::Create {
            repository_id,
            data,
            actor,
        } => {
            let payload = CreatePayload::new(repository_id, parse_data(&data)?);
            let service = sqlite_object_service(&conn)?;
            let row = run_in_transaction(&mut conn, |tx| {
                service.create(tx, payload, actor.as_deref())
            })?;
            print_json(&row)
        }
        Command::Update {
            repository_id,
            object_number,
            data,
            actor,
        } => {
            let changes = parse_data(&data)?;
            let key = VersionedObjectKey::latest(repository_id, object_number);
            let service = sqlite_object_service(&conn)?;
            let row = run_in_transaction(&mut conn, |tx| {
                service.update(tx, &key, &changes, actor.as_deref())
            })?;
            print_json(&row)
        }
        Command::Delete {
            repository_id,
            object_number,
        } => {
            let key = VersionedObjectKey::latest(repository_id, object_number);
            let service = sqlite_object_service(&conn)?;
            run_in_transaction(&mut conn, |tx| service.delete(tx, &key))?;
            println!("deleted {key}");
            Ok(())
        }
        Command::Get {
            repository_id,
            object_number,
            historical,
        } => {
            let key = VersionedObjectKey {
                repository_id,
                is_latest: !historical,
                object_number,
            };
            let service = sqlite_object_service(&conn)?;
            match service.get(&conn, &key)? {
                Some(row) => print_json(&row),
                None => Err(CliError::NotFound(format!("object {key}"))),
            }
        }
        Command::Counter { repository_id } => {
            let numbers = SqliteObjectNumberRepository::try_new(&conn)?;
            show_counter(&conn, &numbers, &repository_id)
        }
    }
}

fn show_counter(
    conn: &Connection,
    numbers: &impl ObjectNumberRepository,
    repository_id: &str,
) -> Result<(), CliError> {
    match numbers.current_counter(conn, repository_id)? {
        Some(next) => {
            println!("{next}");
            Ok(())
        }
        None => Err(CliError::NotFound(format!(
            "object number counter for repository {repository_id}"
        ))),
    }
}

fn parse_data(text: &str) -> Result<DataMap, CliError> {
    serde_json::from_str(text).map_err(|err| CliError::InvalidData(err.to_string()))
}

fn print_json(row: &VersionedObjectRow) -> Result<(), CliError> {
    let text =
        serde_json::to_string_pretty(row).map_err(|err| CliError::InvalidData(err.to_string()))?;
    println!("{text}");
    Ok(())
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Init => "init",
        Command::Provision { .. } => "provision",
        Command::Create { .. } => "create",
        Command::Update { .. } => "update",
        Command::Delete { .. } => "delete",
        Command::Get { .. } => "get",
        Command::Counter { .. } => "counter",
    }
}
