use clap::Parser;
use log::{error, info};

use cholecseg::config::TrainArgs;
use cholecseg::trainer;

fn main() {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = TrainArgs::parse();

    info!(
        "Training for {} iterations (batch {}, lr {})...",
        args.max_iter, args.ims_per_batch, args.base_lr
    );

    if let Err(e) = trainer::train(&args) {
        error!("Training failed: {:#}", e);
        std::process::exit(1);
    }
    info!("Training completed successfully.");
}
