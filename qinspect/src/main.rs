use clap::Parser;
use qinspect::{Application, Config, telemetry};

#[cfg(unix)]
async fn terminate() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate() -> std::io::Result<()> {
    std::future::pending().await
}

/// Resolve once the demo server should stop: on Ctrl+C or SIGTERM.
///
/// A signal handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
        "Ctrl+C"
    };
    let terminated = async {
        if let Err(e) = terminate().await {
            tracing::warn!("SIGTERM handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
        "SIGTERM"
    };

    let signal = tokio::select! {
        signal = interrupted => signal,
        signal = terminated => signal,
    };
    tracing::info!("{} received, stopping query inspector demo", signal);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args = qinspect::config::Args::parse();

    // Load configuration
    let config = Config::load(&args)?;

    // If --validate flag is set, exit successfully after config validation
    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry()?;

    tracing::debug!("{:?}", args);

    // Run the demo application with graceful shutdown on SIGTERM/Ctrl+C
    let shutdown = shutdown_signal();
    Application::new(config)?.serve(shutdown).await
}
