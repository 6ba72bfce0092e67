//! tablekv command-line interface
//!
//! Inspect and edit a persistent tablekv store:
//!
//! ```bash
//! # Create a table (creates the database too)
//! tablekv table create --db app users
//!
//! # Write and read rows (values are JSON)
//! tablekv row set --db app --table users 1 '{"name": "Ada"}'
//! tablekv row entries --db app --table users --start 10 --length 10
//!
//! # Drop everything in a database
//! tablekv db clear app
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::{self, Write};
use std::path::PathBuf;
use tablekv::error::Error;
use tablekv::{Datum, EngineConfig, Key, KeyRange, Page, Storage, Table};
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

/// tablekv - databases, tables and rows over a key-value engine
#[derive(Parser, Debug)]
#[command(name = "tablekv")]
#[command(version = tablekv::VERSION)]
#[command(about = "tablekv - databases, tables and rows over a key-value engine", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Data directory path (overrides the config file)
    #[arg(long, global = true, env = "TABLEKV_DATA")]
    data_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true, env = "TABLEKV_CONFIG")]
    config: Option<PathBuf>,

    /// Log directory path
    #[arg(long, global = true, default_value = "logs", env = "TABLEKV_LOG_DIR")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn", env = "RUST_LOG")]
    log_level: String,

    /// Console log format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty, env = "TABLEKV_LOG_FORMAT")]
    log_format: LogFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

/// Console log output format
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    /// Multi-line, human-readable
    Pretty,
    /// One line per event
    Compact,
    /// One JSON object per event
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Database operations
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },

    /// Table operations
    Table {
        #[command(subcommand)]
        command: TableCommands,
    },

    /// Row operations
    Row {
        #[command(subcommand)]
        command: RowCommands,
    },

    /// Show version
    Version,
}

/// Database commands
#[derive(Subcommand, Debug)]
enum DbCommands {
    /// List all databases
    List,

    /// Create a database
    Create {
        /// Database name
        name: String,
    },

    /// Delete a database
    Drop {
        /// Database name
        name: String,
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Drop every table of a database
    Clear {
        /// Database name
        name: String,
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

/// Table commands
#[derive(Subcommand, Debug)]
enum TableCommands {
    /// List tables in a database
    List {
        /// Database name
        #[arg(short, long)]
        db: String,
    },

    /// Create one or more tables
    Create {
        /// Database name
        #[arg(short, long)]
        db: String,
        /// Table names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Drop one or more tables
    Drop {
        /// Database name
        #[arg(short, long)]
        db: String,
        /// Table names
        #[arg(required = true)]
        names: Vec<String>,
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Remove every row of a table
    Clear {
        /// Database name
        #[arg(short, long)]
        db: String,
        /// Table name
        name: String,
    },
}

/// Which table a row command works on
#[derive(Args, Debug)]
struct TableArgs {
    /// Database name
    #[arg(short, long)]
    db: String,

    /// Table name
    #[arg(short, long)]
    table: String,

    /// Treat keys as numbers instead of strings
    #[arg(long)]
    numeric_keys: bool,
}

/// Pagination and range options
#[derive(Args, Debug)]
struct PageArgs {
    /// Rows to skip
    #[arg(long, default_value = "0")]
    start: u32,

    /// Maximum rows to return
    #[arg(long)]
    length: Option<u32>,

    /// Lowest key (inclusive)
    #[arg(long)]
    from: Option<String>,

    /// Highest key (inclusive)
    #[arg(long)]
    to: Option<String>,
}

/// Row commands
#[derive(Subcommand, Debug)]
enum RowCommands {
    /// List keys
    Keys {
        #[command(flatten)]
        table: TableArgs,
        #[command(flatten)]
        page: PageArgs,
    },

    /// List values
    Values {
        #[command(flatten)]
        table: TableArgs,
        #[command(flatten)]
        page: PageArgs,
    },

    /// List key/value pairs
    Entries {
        #[command(flatten)]
        table: TableArgs,
        #[command(flatten)]
        page: PageArgs,
    },

    /// Count rows
    Count {
        #[command(flatten)]
        table: TableArgs,
    },

    /// Read rows
    Get {
        #[command(flatten)]
        table: TableArgs,
        /// Keys to read
        #[arg(required = true)]
        keys: Vec<String>,
        /// JSON value written for absent keys
        #[arg(long)]
        default: Option<String>,
    },

    /// Write a row
    Set {
        #[command(flatten)]
        table: TableArgs,
        /// Row key
        key: String,
        /// JSON value (plain text is stored as a string)
        value: String,
    },

    /// Delete rows
    Del {
        #[command(flatten)]
        table: TableArgs,
        /// Keys to delete
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli)?;

    if let Commands::Version = cli.command {
        println!("tablekv {}", tablekv::VERSION);
        return Ok(());
    }

    let storage = open_storage(&cli)?;
    match cli.command {
        Commands::Db { command } => db_command(&storage, command).await,
        Commands::Table { command } => table_command(&storage, command).await,
        Commands::Row { command } => row_command(&storage, command).await,
        Commands::Version => Ok(()),
    }
}

/// Console layer in the chosen format plus a daily rolling log file
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cli.log_dir)
        .with_context(|| format!("creating log directory {}", cli.log_dir.display()))?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &cli.log_dir, "tablekv.log");

    let log_level = cli
        .log_level
        .trim()
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::WARN);

    let console: Box<dyn Layer<Registry> + Send + Sync> = match cli.log_format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(io::stderr)
            .with_ansi(!cli.no_color)
            .pretty()
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(io::stderr)
            .with_ansi(!cli.no_color)
            .compact()
            .boxed(),
        LogFormat::Json => fmt::layer().with_writer(io::stderr).json().boxed(),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(fmt::layer().with_writer(file_appender).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

/// Config file first, then `--data-dir`, then the default directory.
fn open_storage(cli: &Cli) -> anyhow::Result<Storage> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = Some(data_dir.clone());
    }
    if config.data_dir.is_none() {
        config.data_dir = Some(PathBuf::from("data/tablekv"));
    }

    info!(data_dir = ?config.data_dir, "Opening storage");
    Ok(config.build_storage()?)
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{} (yes/no): ", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("yes"))
}

/// Database commands
async fn db_command(storage: &Storage, command: DbCommands) -> anyhow::Result<()> {
    match command {
        DbCommands::List => {
            let names = storage.database_keys().await?;
            if names.is_empty() {
                println!("No databases.");
            } else {
                for name in names {
                    println!("{}", name);
                }
            }
        }
        DbCommands::Create { name } => {
            let db = storage.database_set(&name).await?;
            println!("Database '{}' at version {}", name, db.version());
        }
        DbCommands::Drop { name, force } => {
            if !force && !confirm(&format!("Drop database '{}'?", name))? {
                return Ok(());
            }
            storage.database_del(&name).await?;
            println!("Dropped database '{}'", name);
        }
        DbCommands::Clear { name, force } => {
            if !force && !confirm(&format!("Drop every table of '{}'?", name))? {
                return Ok(());
            }
            storage.database_clear(&name).await?;
            println!("Cleared database '{}'", name);
        }
    }
    Ok(())
}

/// Table commands
async fn table_command(storage: &Storage, command: TableCommands) -> anyhow::Result<()> {
    match command {
        TableCommands::List { db } => {
            let handle = storage.database_get(&db).await?;
            let tables = storage.table_keys(&handle);
            if tables.is_empty() {
                println!("No tables in database '{}'", db);
            } else {
                for table in tables {
                    println!("{}", table);
                }
            }
        }
        TableCommands::Create { db, names } => {
            storage.table_set(&db, names.iter().cloned()).await?;
            println!("Created {} in '{}'", names.join(", "), db);
        }
        TableCommands::Drop { db, names, force } => {
            if !force && !confirm(&format!("Drop {} from '{}'?", names.join(", "), db))? {
                return Ok(());
            }
            storage.table_del(&db, names.iter().cloned()).await?;
            println!("Dropped {} from '{}'", names.join(", "), db);
        }
        TableCommands::Clear { db, name } => {
            let handle = storage.database_get(&db).await?;
            let table = require_table(storage, &handle, &name)?;
            storage.table_clear(&table).await?;
            println!("Cleared table '{}.{}'", db, name);
        }
    }
    Ok(())
}

/// Row commands
async fn row_command(storage: &Storage, command: RowCommands) -> anyhow::Result<()> {
    match command {
        RowCommands::Keys { table, page } => {
            let page = page.to_page(table.numeric_keys)?;
            with_table(storage, &table, |t| async move {
                for key in t.keys(&page).await? {
                    println!("{}", key);
                }
                Ok(())
            })
            .await
        }
        RowCommands::Values { table, page } => {
            let page = page.to_page(table.numeric_keys)?;
            with_table(storage, &table, |t| async move {
                for value in t.values(&page).await? {
                    println!("{}", value);
                }
                Ok(())
            })
            .await
        }
        RowCommands::Entries { table, page } => {
            let page = page.to_page(table.numeric_keys)?;
            with_table(storage, &table, |t| async move {
                for (key, value) in t.entries(&page).await? {
                    println!("{}\t{}", key, value);
                }
                Ok(())
            })
            .await
        }
        RowCommands::Count { table } => {
            with_table(storage, &table, |t| async move {
                println!("{}", t.count(None).await?);
                Ok(())
            })
            .await
        }
        RowCommands::Get {
            table,
            keys,
            default,
        } => {
            let numeric = table.numeric_keys;
            let keys = keys
                .iter()
                .map(|key| parse_key(key, numeric))
                .collect::<anyhow::Result<Vec<_>>>()?;
            with_table(storage, &table, |t| async move {
                match default {
                    Some(default) => {
                        let default = Datum::parse(&default);
                        let pairs = keys.iter().cloned().map(|key| (key, default.clone()));
                        let values = t.get_or_init(pairs).await;
                        for (key, value) in keys.iter().zip(values) {
                            println!("{}\t{}", key, value);
                        }
                    }
                    None => {
                        let values = t.get(keys.iter().cloned()).await;
                        for (key, value) in keys.iter().zip(values) {
                            match value {
                                Some(value) => println!("{}\t{}", key, value),
                                None => println!("{}\t(absent)", key),
                            }
                        }
                    }
                }
                Ok(())
            })
            .await
        }
        RowCommands::Set { table, key, value } => {
            let key = parse_key(&key, table.numeric_keys)?;
            let value = Datum::parse(&value);
            with_table(storage, &table, |t| async move {
                if t.set([(key, value)]).await == 0 {
                    anyhow::bail!("write was not applied");
                }
                Ok(())
            })
            .await
        }
        RowCommands::Del { table, keys } => {
            let numeric = table.numeric_keys;
            let keys = keys
                .iter()
                .map(|key| parse_key(key, numeric))
                .collect::<anyhow::Result<Vec<_>>>()?;
            with_table(storage, &table, |t| async move {
                let requested = keys.len();
                let deleted = t.del(keys).await;
                if deleted < requested {
                    anyhow::bail!("{} of {} deletes failed", requested - deleted, requested);
                }
                Ok(())
            })
            .await
        }
    }
}

/// Opens the database, runs `f` on the table, then closes the database.
async fn with_table<F, Fut>(storage: &Storage, args: &TableArgs, f: F) -> anyhow::Result<()>
where
    F: FnOnce(Table) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let db = storage.database_get(&args.db).await?;
    let table = require_table(storage, &db, &args.table)?;
    let result = f(table).await;
    db.close();
    result
}

fn require_table(storage: &Storage, db: &tablekv::Database, name: &str) -> anyhow::Result<Table> {
    storage
        .table_get(db, name)?
        .ok_or_else(|| Error::NotFound(format!("table '{}.{}'", db.name(), name)).into())
}

impl PageArgs {
    fn to_page(&self, numeric: bool) -> anyhow::Result<Page> {
        let mut page = Page::new().start(self.start);
        if let Some(length) = self.length {
            page = page.length(length);
        }
        let from = self.from.as_deref().map(|k| parse_key(k, numeric)).transpose()?;
        let to = self.to.as_deref().map(|k| parse_key(k, numeric)).transpose()?;
        let range = match (from, to) {
            (Some(from), Some(to)) => Some(KeyRange::bound(from, to, false, false)?),
            (Some(from), None) => Some(KeyRange::lower_bound(from, false)),
            (None, Some(to)) => Some(KeyRange::upper_bound(to, false)),
            (None, None) => None,
        };
        if let Some(range) = range {
            page = page.range(range);
        }
        Ok(page)
    }
}

fn parse_key(raw: &str, numeric: bool) -> anyhow::Result<Key> {
    if !numeric {
        return Ok(Key::from(raw));
    }
    let number: f64 = raw
        .parse()
        .with_context(|| format!("'{}' is not a numeric key", raw))?;
    let key = Key::from(number);
    key.validate()?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_flag() {
        let cli = Cli::try_parse_from(["tablekv", "--log-format", "json", "version"])
            .expect("valid arguments");
        assert_eq!(cli.log_format, LogFormat::Json);

        let cli = Cli::try_parse_from(["tablekv", "db", "list", "--log-format", "compact"])
            .expect("global flag after subcommand");
        assert_eq!(cli.log_format, LogFormat::Compact);

        assert!(Cli::try_parse_from(["tablekv", "--log-format", "xml", "version"]).is_err());
    }
}
