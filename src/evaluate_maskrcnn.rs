use clap::Parser;
use log::{error, info};

use cholecseg::config::EvalArgs;
use cholecseg::eval;

fn main() {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = EvalArgs::parse();

    info!("Running inference on test set...");

    if let Err(e) = eval::run_evaluation(&args) {
        error!("Evaluation failed: {:#}", e);
        std::process::exit(1);
    }
}
