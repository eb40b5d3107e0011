use clap::Parser;
use log::{error, info};

use cholecseg::config::SplitArgs;
use cholecseg::split::run_split;

fn main() {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = SplitArgs::parse();

    info!(
        "Splitting {} at test ratio {} (seed {})...",
        args.input.display(),
        args.test_ratio,
        args.seed
    );

    match run_split(&args) {
        Ok(()) => info!("Split completed successfully."),
        Err(e) => {
            error!("Failed to split dataset: {}", e);
            std::process::exit(1);
        }
    }
}
