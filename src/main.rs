use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use sentmail_sync::config::load_env_file;
use sentmail_sync::progress::LogProgress;
use sentmail_sync::{Config, SyncPipeline, init_logger};

#[derive(Parser, Debug)]
#[command(
    name = "sentmail-sync",
    version,
    about = "Sync per-recipient sent mail statistics from Microsoft Graph into Airtable"
)]
struct Args {
    /// Load environment variables from this file instead of `./.env`.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Fetch and diff, but do not write to Airtable.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let loaded = load_env_file(args.env_file.as_deref());

    init_logger();

    match loaded {
        Ok(Some(path)) => log::debug!("loaded environment from {}", path.display()),
        Ok(None) => {}
        Err(err) => {
            log::error!("{}", err);
            return ExitCode::from(2);
        }
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            log::error!("{}", err);
            return ExitCode::from(2);
        }
    };

    match SyncPipeline::new(&config, &LogProgress)
        .dry_run(args.dry_run)
        .run()
        .await
    {
        Ok(report) => {
            println!("{report}");
            if report.is_partial() {
                log::warn!("run {} finished with missing data", report.run_id);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("sync failed: {}", err);
            ExitCode::FAILURE
        }
    }
}
