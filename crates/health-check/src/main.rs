use std::io::Write;

use clap::Parser;
use cluster_health_check::app;
use cluster_health_check::app::HealthCheck;
use cluster_health_check::config::CheckArgs;
use cluster_health_check::config::Cli;
use cluster_health_check::config::Commands;
use cluster_health_check::config::ProbeArgs;
use cluster_health_check::error::ExitCode;
use tokio_util::sync::CancellationToken;
use utils::logging;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    setup_global_hooks();

    let cli = Cli::parse();
    logging::init(cli.verbose);

    let code = match cli.command {
        Commands::Check(check_args) => run_check(&check_args).await,
        Commands::Probe(probe_args) => match run_probe(&probe_args).await {
            Ok(()) => ExitCode::Healthy,
            Err(e) => {
                tracing::error!("{e:#}");
                ExitCode::Failure
            }
        },
    };
    code.into()
}

async fn run_check(check_args: &CheckArgs) -> ExitCode {
    tracing::info!("Starting cluster health check {}", &**version::VERSION);

    let token = CancellationToken::new();
    let signal_handler = match app::spawn_signal_handler(token.clone()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!("Failed to install signal handlers: {e}");
            None
        }
    };

    let result = async {
        let check = HealthCheck::from_args(check_args).await?;
        check.run(&token, &mut std::io::stdout().lock()).await
    }
    .await;

    // release the signal task
    token.cancel();
    if let Some(handle) = signal_handler {
        let _ = handle.await;
    }

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Health check failed: {e:?}");
            e.current_context().exit_code()
        }
    }
}

async fn run_probe(probe_args: &ProbeArgs) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    app::run_probe(probe_args, &mut stdout)
        .await
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    stdout.flush()?;
    Ok(())
}
