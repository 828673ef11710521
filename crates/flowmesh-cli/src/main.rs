mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "flowmesh",
    version,
    about = "Deploy, verify, and tear down event-driven step flows on Kubernetes"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Path to a flowmesh YAML config file
    #[arg(long, env = "FLOWMESH_CONFIG", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Bind host (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Deploy a flow (when changed), then kick and verify it
    Deploy {
        #[command(flatten)]
        target: commands::FlowTarget,
        /// Ordered step object ids, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        steps: Vec<i64>,
        /// Create the user namespace when it does not exist
        #[arg(long)]
        create_namespace: bool,
        /// Verification budget in seconds (default from config)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Kick an already deployed flow once and verify the event crossed it
    Kick {
        #[command(flatten)]
        target: commands::FlowTarget,
        /// Ordered step object ids, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        steps: Vec<i64>,
        /// Verification budget in seconds (default from config)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Delete every resource a flow owns
    Delete {
        #[command(flatten)]
        target: commands::FlowTarget,
    },
    /// Run one step object in the sandbox
    Test {
        #[command(flatten)]
        target: commands::FlowTarget,
        /// Step object id to test
        #[arg(long)]
        object: i64,
        /// Sample event JSON, or `@path` to read it from a file; omit for a syntax check
        #[arg(long)]
        input: Option<String>,
        /// Total time budget in seconds (default from config)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Validate configuration and object store connectivity
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Serve { host, port } => commands::serve::execute(config, host, port).await,
        Commands::Deploy {
            target,
            steps,
            create_namespace,
            timeout,
        } => {
            let request = target.deploy_request("deploy", steps, create_namespace, timeout);
            commands::deploy::execute(config, request).await
        }
        Commands::Kick { target, steps, timeout } => {
            let request = target.deploy_request("kick", steps, false, timeout);
            commands::deploy::execute(config, request).await
        }
        Commands::Delete { target } => commands::delete::execute(config, &target).await,
        Commands::Test {
            target,
            object,
            input,
            timeout,
        } => commands::test::execute(config, &target, object, input.as_deref(), timeout).await,
        Commands::CheckConfig => commands::check_config::execute(config).await,
    }
}
