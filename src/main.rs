use clap::Parser;
use screenshooter::{setup_logging, Cli, CliRunner};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    if let Err(e) = setup_logging(args.verbose) {
        eprintln!("Failed to set up logging: {e}");
    }

    info!("Starting screenshooter v{}", env!("CARGO_PKG_VERSION"));

    let outcome = match CliRunner::new(&args).await {
        Ok(runner) => runner.run().await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(summary) => {
            info!(
                "Screenshooter stopped: {} succeeded, {} failed",
                summary.succeeded, summary.failed
            );
        }
        Err(e) => {
            error!("Fatal error: {:#}", e);
            std::process::exit(1);
        }
    }
}
