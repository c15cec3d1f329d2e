mod cli;
mod commands;
mod runtime;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, port, rotate_token } => {
            commands::serve(cli.config, bind, port, rotate_token).await
        }
        Command::Templates { long } => {
            commands::templates(cli.config, cli.remote, cli.token, long).await
        }
        Command::RequestMachines { template_id, count } => {
            commands::request_machines(cli.config, cli.remote, cli.token, template_id, count).await
        }
        Command::RequestReturnMachines { machine_ids, all } => {
            commands::request_return_machines(cli.config, cli.remote, cli.token, machine_ids, all).await
        }
        Command::RequestStatus { request_ids, all } => {
            commands::request_status(cli.config, cli.remote, cli.token, request_ids, all).await
        }
        Command::ReturnRequests { long } => {
            commands::return_requests(cli.config, cli.remote, cli.token, long).await
        }
    }
}
