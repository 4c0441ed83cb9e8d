use std::process::ExitCode;

use clap::Parser;
use splitplane::{cli::Args, observability::init_logging, startup, Settings, APP_NAME, VERSION};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug, args.log_json);

    info!(app_name = APP_NAME, version = VERSION, "Starting Envoy split control plane");

    let settings = match Settings::from_args(args) {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "Invalid settings");
            return ExitCode::FAILURE;
        }
    };

    match startup::run(settings).await {
        Ok(()) => {
            info!("Control plane shut down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Control plane failed");
            ExitCode::FAILURE
        }
    }
}
