//! querybatch - executes a batch of SQL queries on a single connection.

mod cli;
mod logging;

use std::io::Read;

use cli::Cli;
use querybatch::batch::{split_statements, BatchQueryExecutor, BatchRequest};
use querybatch::config::{Config, ConnectionConfig};
use querybatch::db::{self, Connection, DatabaseBackend, MockConnection};
use querybatch::error::{BatchError, Result};
use querybatch::output;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse_args();

    match &cli.log_file {
        Some(path) => logging::init_file_logging(path),
        None => logging::init_stderr_logging(),
    }

    match run(&cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{}: {}", e.category(), e);
            std::process::exit(e.exit_code());
        }
    }
}

/// Runs the batch and returns the process exit code.
async fn run(cli: &Cli) -> Result<i32> {
    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;

    let policy = cli.resolve_policy(&config.executor)?;
    let options = cli.resolve_options(&config.executor);
    let format = cli.parse_output_format()?;

    let connection = if cli.mock_db {
        None
    } else {
        Some(resolve_connection(cli, &config)?.ok_or_else(|| {
            BatchError::config("No database connection configured. Use --help for usage information.")
        })?)
    };

    let backend = connection
        .as_ref()
        .map(|c| c.backend)
        .unwrap_or(DatabaseBackend::Sqlite);
    let request = load_request(cli, backend)?;

    let mut conn: Box<dyn Connection> = match &connection {
        Some(config) => {
            info!("Connection: {}", config.display_string());
            db::connect(config).await?
        }
        None => {
            warn!("Using mock connection; nothing is sent to a database");
            Box::new(MockConnection::new())
        }
    };

    let executor = BatchQueryExecutor::new(options);
    let result = executor.execute(conn.as_mut(), &request, policy).await;

    if let Err(e) = conn.close().await {
        warn!("Failed to close connection: {}", e);
    }
    let result = result?;

    println!("{}", output::render(&request, &result, format)?);

    Ok(if result.all_succeeded() { 0 } else { 2 })
}

/// Resolves the final connection configuration from CLI args, config file, and environment.
fn resolve_connection(cli: &Cli, config: &Config) -> Result<Option<ConnectionConfig>> {
    let mut connection = cli.to_connection_config()?;

    if connection.is_none() {
        if let Some(name) = cli.connection_name() {
            connection = config.get_connection(Some(name)).cloned();
            if connection.is_none() {
                return Err(BatchError::config(format!(
                    "Connection '{}' not found in config file",
                    name
                )));
            }
        }
    }

    if connection.is_none() {
        connection = config.get_connection(None).cloned();
    }

    if let Some(ref mut conn) = connection {
        conn.apply_env_defaults();
    }

    Ok(connection)
}

/// Collects queries from `--query` arguments and the `--file` script, in that order.
fn load_request(cli: &Cli, backend: DatabaseBackend) -> Result<BatchRequest> {
    let mut statements = cli.queries.clone();

    if let Some(file) = &cli.file {
        let script = if file == "-" {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| BatchError::config(format!("Failed to read stdin: {e}")))?;
            buf
        } else {
            std::fs::read_to_string(file)
                .map_err(|e| BatchError::config(format!("Failed to read {file}: {e}")))?
        };
        statements.extend(split_statements(&script, backend)?);
    }

    Ok(BatchRequest::from_statements(statements))
}
