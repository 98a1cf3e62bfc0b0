use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use eyre::{Result, WrapErr};
use ssh_mcp_runtime::{CommandExecutor, Config, ConfigError, ConnectionPool, SshConnector};

use crate::app::{Args, Command};
use crate::render;

/// Run the selected subcommand, returning the process exit code
pub async fn dispatch(args: Args) -> Result<u8> {
    let path = args.config_path();
    tracing::debug!("Using configuration {}", path.display());

    match args.command {
        Command::Init { force } => init(&path, force),
        Command::ShowConfig => {
            let yaml = load(&path)?.sanitized().to_yaml()?;
            print!("{yaml}");
            Ok(0)
        }
        Command::ListConnections => {
            let config = load(&path)?;
            render::connections(&config.registry().list(), &mut io::stdout())?;
            Ok(0)
        }
        Command::ListCommands { connection } => {
            list_commands(&load(&path)?, connection.as_deref())
        }
        Command::Run {
            connection,
            command,
            timeout,
            json,
        } => {
            let command = command.join(" ");
            run(
                &load(&path)?,
                &connection,
                &command,
                timeout.map(Duration::from_secs),
                json,
            )
            .await
        }
    }
}

fn load(path: &Path) -> Result<Config> {
    Config::load(path).wrap_err_with(|| {
        format!(
            "could not load {} (create one with `ssh-mcp-run init`)",
            path.display()
        )
    })
}

fn init(path: &Path, force: bool) -> Result<u8> {
    match Config::init(path, force) {
        Ok(()) => {
            println!("Configuration file created at {}", path.display());
            println!("Edit this file to add your SSH connections.");
            Ok(0)
        }
        Err(ConfigError::AlreadyExists(path)) => {
            eprintln!("Configuration file {} already exists.", path.display());
            eprintln!("Use --force to overwrite it.");
            Ok(1)
        }
        Err(e) => Err(e.into()),
    }
}

fn list_commands(config: &Config, connection: Option<&str>) -> Result<u8> {
    match connection {
        Some(id) => {
            let profile = config
                .registry()
                .get(id)
                .ok_or_else(|| eyre::eyre!("connection '{id}' not found in configuration"))?;
            render::commands(
                profile.allowed_commands.iter().map(String::as_str),
                &mut io::stdout(),
            )?;
        }
        None => render::commands(
            config.defaults.allowed_commands.iter().map(String::as_str),
            &mut io::stdout(),
        )?,
    }
    Ok(0)
}

async fn run(
    config: &Config,
    connection: &str,
    command: &str,
    timeout: Option<Duration>,
    json: bool,
) -> Result<u8> {
    let pool = Arc::new(ConnectionPool::new(
        &config.registry(),
        Arc::new(SshConnector::new()),
        config.pool_settings(),
    ));
    let executor =
        CommandExecutor::new(pool.clone()).with_acquire_timeout(config.acquire_timeout());

    let outcome = executor.execute(connection, command, timeout).await;
    pool.shutdown().await;

    let result = outcome.wrap_err_with(|| format!("failed to run {command:?} on '{connection}'"))?;

    if json {
        let report = render::JsonReport {
            connection,
            command,
            result: &result,
        };
        render::json(&report, &mut io::stdout())?;
    } else {
        render::text(&result, &mut io::stdout(), &mut io::stderr())?;
    }

    Ok(render::exit_code(&result))
}
