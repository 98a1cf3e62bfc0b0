use std::process::ExitCode;

use clap::Parser;
use eyre::Result;

use crate::app::Args;

mod app;
mod commands;
mod render;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    ssh_mcp_runtime::init_tracing();

    let args = Args::parse();
    let code = commands::dispatch(args).await?;
    Ok(ExitCode::from(code))
}
