//! `berth` - build, ship and poke at containerized services.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::debug;

use berth_observe::{LoggerConfig, LoggerFormat, logger_init};

#[derive(Parser)]
#[command(name = "berth")]
#[command(about = "Deploy services to the cluster and open sessions against them")]
#[command(version)]
struct Cli {
    /// Project directory or configuration file
    #[arg(short, long, global = true, default_value = ".", env = "BERTH_PATH")]
    path: PathBuf,

    /// Log filter, e.g. `info` or `warn,berth.core=debug`
    #[arg(long, global = true, default_value = "info", env = "BERTH_LOG")]
    log_level: String,

    /// Log output: text, json or journald
    #[arg(long, global = true, default_value = "text", env = "BERTH_LOG_FORMAT")]
    log_format: LoggerFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, push and roll out the current commit
    Deploy {
        /// Environments to deploy (all when omitted)
        environments: Vec<String>,
    },

    /// Publish configuration and point every service at the new revision
    Config {
        /// Arguments passed to the config-store CLI
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Set the desired task count of a service
    Scale {
        environment: String,
        service: String,
        count: u32,

        /// Only this region
        #[arg(long)]
        region: Option<String>,
    },

    /// Run a one-off task and wait for it to exit
    Task {
        environment: String,
        service: String,

        /// Container command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,

        #[arg(long)]
        region: Option<String>,
    },

    /// Run a command interactively next to a running task
    Exec {
        environment: String,
        service: String,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,

        #[arg(long)]
        region: Option<String>,
    },

    /// Run a configured exec shortcut
    Shortcut {
        name: String,
        environment: String,
        service: String,

        /// Appended to the shortcut's command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        #[arg(long)]
        region: Option<String>,
    },

    /// List configured exec shortcuts
    Shortcuts,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log = LoggerConfig::default()
        .with_level(cli.log_level.clone())
        .with_format(cli.log_format);
    if let Err(e) = logger_init(&log) {
        eprintln!("berth: {e}");
        return ExitCode::FAILURE;
    }
    debug!(path = %cli.path.display(), "starting");

    let result = match cli.command {
        Commands::Deploy { environments } => commands::deploy::run(&cli.path, environments).await,
        Commands::Config { args } => commands::config::run(&cli.path, args).await,
        Commands::Scale {
            environment,
            service,
            count,
            region,
        } => commands::scale::run(&cli.path, &environment, &service, count, region).await,
        Commands::Task {
            environment,
            service,
            command,
            region,
        } => {
            let target = commands::exec::Target::new(environment, service, region);
            commands::exec::task(&cli.path, target, command).await
        }
        Commands::Exec {
            environment,
            service,
            command,
            region,
        } => {
            let target = commands::exec::Target::new(environment, service, region);
            commands::exec::interactive(&cli.path, target, command).await
        }
        Commands::Shortcut {
            name,
            environment,
            service,
            args,
            region,
        } => {
            let target = commands::exec::Target::new(environment, service, region);
            commands::exec::shortcut(&cli.path, &name, target, args).await
        }
        Commands::Shortcuts => commands::exec::list_shortcuts(&cli.path),
    };

    match result {
        Ok(code) => exit_code(code),
        Err(e) => {
            eprintln!("berth: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    match u8::try_from(code) {
        Ok(c) => ExitCode::from(c),
        Err(_) => ExitCode::FAILURE,
    }
}
