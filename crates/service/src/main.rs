use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gatehouse::{Database, Gatehouse, GatehouseConfig, MigrationSet, shutdown_signal};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

mod logging;
mod routes;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Address to bind the server to
    #[arg(long, global = true)]
    addr: Option<SocketAddr>,
    /// Path to the SQLite database
    #[arg(long, global = true)]
    database: Option<PathBuf>,
    /// Directory holding NAME.up.sql / NAME.down.sql migrations
    #[arg(long, global = true)]
    migrations: Option<PathBuf>,
    /// Public URL of the server
    #[arg(long, global = true)]
    origin: Option<String>,
    /// Mark cookies Secure
    #[arg(long, global = true)]
    https: bool,
    /// Key used to sign session cookies
    #[arg(long, global = true, env = "GATEHOUSE_SESSION_SECRET", hide_env_values = true)]
    session_secret: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending migrations, then serve (default)
    Serve,
    /// Migration maintenance without serving
    Migrate {
        #[command(subcommand)]
        action: Option<MigrateAction>,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum MigrateAction {
    /// Apply every pending migration (default)
    Up,
    /// List applied and pending migrations
    Status,
    /// Revert the most recently applied migration
    Down,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli).await?;
    let _access_log = logging::init(&config).context("initializing logging")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Migrate { action } => migrate(config, action.unwrap_or(MigrateAction::Up)).await,
    }
}

async fn load_config(cli: &Cli) -> Result<GatehouseConfig> {
    let mut config = match &cli.config {
        Some(path) => GatehouseConfig::load(path)
            .await
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => GatehouseConfig::default(),
    };

    if let Some(addr) = cli.addr {
        config.server.addr = addr;
    }
    if let Some(path) = &cli.database {
        config.database.path = path.clone();
    }
    if let Some(dir) = &cli.migrations {
        config.migrations.dir = dir.clone();
    }
    if let Some(origin) = &cli.origin {
        config.server.origin = origin.clone();
    }
    if cli.https {
        config.server.https = true;
    }
    if let Some(secret) = &cli.session_secret {
        config.session.secret = secret.clone();
    }
    Ok(config)
}

async fn open(config: &GatehouseConfig) -> Result<(Database, MigrationSet)> {
    let migrations = MigrationSet::from_dir(&config.migrations.dir)
        .with_context(|| format!("reading migrations from {}", config.migrations.dir.display()))?;
    let database = Database::open(&config.database.path)
        .await
        .with_context(|| format!("opening database {}", config.database.path.display()))?;
    Ok((database, migrations))
}

async fn serve(config: GatehouseConfig) -> Result<()> {
    config.validate().context("invalid configuration")?;
    let (database, migrations) = open(&config).await?;

    let migrated = database
        .apply_pending(migrations)
        .await
        .context("migrations failed, not starting")?;
    if migrated.is_up_to_date() {
        info!("Database was up to date");
    } else {
        info!(
            count = migrated.applied().len(),
            "Executed migrations: {}",
            migrated.applied().join(" ")
        );
    }

    let origin = config.server.origin.clone();
    let addr = config.server.addr;
    let database = migrated.database().clone();
    let gatehouse = routes::install(Gatehouse::builder(migrated, config), database)
        .build()
        .context("building request pipeline")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Visit {origin}");

    gatehouse.serve(listener, shutdown_signal()).await?;
    Ok(())
}

async fn migrate(config: GatehouseConfig, action: MigrateAction) -> Result<()> {
    let (database, migrations) = open(&config).await?;

    match action {
        MigrateAction::Up => {
            let migrated = database.apply_pending(migrations).await?;
            if migrated.is_up_to_date() {
                println!("Database was up to date");
            } else {
                println!("Executed migrations: {}", migrated.applied().join(" "));
            }
        }
        MigrateAction::Status => {
            let status = database.migration_status(migrations).await?;
            for record in &status.applied {
                println!("applied  {}  {}", record.name, record.applied_at);
            }
            for name in &status.pending {
                println!("pending  {name}");
            }
            if status.pending.is_empty() {
                println!("Database is up to date");
            }
        }
        MigrateAction::Down => match database.revert_last(migrations).await? {
            Some(name) => println!("Reverted {name}"),
            None => println!("Nothing to revert"),
        },
    }
    Ok(())
}
