// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, ValueEnum};
use std::process::ExitCode;
use std::time::Duration;
use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use logharvest::init::BoxError;
use logharvest::init::agent::Agent;
use logharvest::init::args::HarvestArgs;
use logharvest::init::wait;
use logharvest::service::{
    self, AgentFuture, AgentMain, SERVICE_DESCRIPTION, SERVICE_NAME,
};

/// Time harvesters get to report their final offsets after a stop request
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Harvest files
    Run(Box<HarvestArgs>),

    /// Register logharvest as a system service (Windows only)
    Install,

    /// Remove the logharvest system service (Windows only)
    Uninstall,

    /// Return version
    Version,
}

#[derive(Debug, Parser)]
#[command(name = "logharvest")]
#[command(bin_name = "logharvest")]
#[command(version, about, long_about = None)]
#[command(subcommand_required = true)]
struct Arguments {
    #[arg(
        value_enum,
        long,
        global = true,
        env = "LOGHARVEST_LOG_FORMAT",
        default_value = "text"
    )]
    /// Log format
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    if let Some(Commands::Version) = opt.command {
        println!("{}", get_version());
        return ExitCode::SUCCESS;
    }

    let _guard = match setup_logging(&opt.log_format) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: failed to setup logging: {}", e);
            return ExitCode::from(1);
        }
    };

    let result = match opt.command {
        Some(Commands::Run(args)) => run(*args),
        Some(Commands::Install) => service::install_service(SERVICE_NAME, SERVICE_DESCRIPTION),
        Some(Commands::Uninstall) => service::uninstall_service(SERVICE_NAME),
        _ => {
            // subcommands are required, clap rejects anything else
            error!("Must specify a command");
            return ExitCode::from(2);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = e, "Failed to run logharvest.");
            ExitCode::from(1)
        }
    }
}

fn run(args: HarvestArgs) -> Result<(), BoxError> {
    let agent = Agent::new(args)?;
    let lifecycle = service::select_lifecycle();
    info!(lifecycle = lifecycle.name(), version = get_version(), "Starting logharvest");

    let main: AgentMain = Box::new(move |stop: CancellationToken| -> AgentFuture {
        Box::pin(run_agent(agent, stop))
    });
    lifecycle.run(main)
}

async fn run_agent(agent: Agent, stop: CancellationToken) -> Result<(), BoxError> {
    let mut agent_join_set = JoinSet::new();
    let agent_token = CancellationToken::new();
    {
        let token = agent_token.clone();
        agent_join_set.spawn(async move { agent.run(token).await });
    }

    select! {
        _ = stop.cancelled() => {
            info!("Stopping harvesters.");
            agent_token.cancel();
        },
        e = wait::wait_for_any_task(&mut agent_join_set) => {
            match e {
                Ok(()) => warn!("All harvesters finished."),
                Err(e) => return Err(e),
            }
        },
    }

    wait::wait_for_tasks_with_timeout(&mut agent_join_set, SHUTDOWN_TIMEOUT).await
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

// Events go to stdout, so logs are written to stderr.
fn setup_logging(log_format: &LogFormatArg) -> Result<LoggerGuard, BoxError> {
    LogTracer::init()?;

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), get_version());
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        use std::io::IsTerminal;

        let use_ansi = std::io::stderr().is_terminal();

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(guard)
}

fn get_version() -> String {
    // Set during CI
    let version_build = option_env!("BUILD_SHORT_SHA").unwrap_or("dev");

    format!("{}-{}", env!("CARGO_PKG_VERSION"), version_build)
}
