use crate::{infra, server};
use clap::{Args, Parser, Subcommand};
use escola::config::AppConfig;
use escola::error::AppError;
use escola::telemetry;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "escola-api",
    about = "Run the school enrollment service from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Create or update the database schema, then exit
    Migrate(MigrateArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Override the configured SQLite database URL
    #[arg(long)]
    pub(crate) database_url: Option<String>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct MigrateArgs {
    /// Override the configured SQLite database URL
    #[arg(long)]
    pub(crate) database_url: Option<String>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Migrate(args) => migrate(args).await,
    }
}

async fn migrate(args: MigrateArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;
    if let Some(url) = args.database_url {
        config.database.url = url;
    }
    telemetry::init(&config.telemetry)?;

    infra::open_store(&config).await?;
    info!(url = %config.database.url, "database schema is up to date");
    Ok(())
}
