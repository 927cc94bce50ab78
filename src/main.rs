use clap::Parser;
use std::panic::{self, PanicHookInfo};
use swissinno_ble::app::{Cli, RunError};
use tracing_subscriber::EnvFilter;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// Log to stderr, leaving stdout for readings.
///
/// `RUST_LOG` takes precedence over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "info,swissinno_ble=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(feature = "bluer")]
async fn run(cli: Cli) -> Result<(), RunError> {
    use std::sync::Arc;
    use swissinno_ble::app::{Command, run_reset, run_with_io};
    use swissinno_ble::freshness::SystemClock;
    use swissinno_ble::scanner::bluer::BluerSource;
    use tokio_util::sync::CancellationToken;

    let source = Arc::new(BluerSource::new().await?);

    match cli.command {
        Command::Watch(options) => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupted, shutting down");
                }
                on_signal.cancel();
            });

            run_with_io(
                options,
                source,
                Arc::new(SystemClock),
                cancel,
                &mut std::io::stdout(),
            )
            .await
        }
        Command::Reset(options) => run_reset(options, source.as_ref()).await,
    }
}

#[cfg(not(feature = "bluer"))]
async fn run(_cli: Cli) -> Result<(), RunError> {
    Err(swissinno_ble::ScanError::BackendNotAvailable("bluer".to_string()).into())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
