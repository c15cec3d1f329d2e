use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "broker",
    about = "Host-provisioning broker: mediates between a workload scheduler and a cloud provider",
    version
)]
pub struct Cli {
    /// Connect to a remote broker server instead of running in-process.
    #[arg(long, env = "BROKER_URL", global = true)]
    pub remote: Option<String>,

    /// Bearer token for --remote requests. Falls back to ~/.broker/token.
    #[arg(long, env = "BROKER_TOKEN", global = true)]
    pub token: Option<String>,

    /// Path to the broker config file. Defaults to ~/.broker/config.yaml.
    #[arg(long, env = "BROKER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the broker's HTTP server (local only, ignores --remote).
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,

        #[arg(long, default_value_t = 8080)]
        port: u16,

        /// Rotate the server's bearer token even if one already exists.
        #[arg(long)]
        rotate_token: bool,
    },

    /// `getAvailableTemplates` — list templates this broker can provision from.
    Templates {
        /// Resolve cloud-side details (pricing, subnet, security group) per template.
        #[arg(long)]
        long: bool,
    },

    /// `requestMachines` — submit an acquire request against a template.
    RequestMachines {
        template_id: String,

        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// `requestReturnMachines` — submit a return request for specific machines, or all of them.
    RequestReturnMachines {
        machine_ids: Vec<String>,

        #[arg(long)]
        all: bool,
    },

    /// `getRequestStatus` — poll one or more requests, or all active ones.
    RequestStatus {
        request_ids: Vec<String>,

        #[arg(long)]
        all: bool,
    },

    /// `getReturnRequests` — list outstanding Return-type requests and their grace periods.
    ReturnRequests {
        #[arg(long)]
        long: bool,
    },
}
