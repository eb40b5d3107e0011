use clap::Parser;
use log::{error, info};

use cholecseg::config::ConvertArgs;
use cholecseg::convert::convert_dataset;

fn main() {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = ConvertArgs::parse();

    info!("Starting LabelMe to COCO conversion process...");

    match convert_dataset(&args) {
        Ok(_) => info!("COCO conversion process completed successfully."),
        Err(e) => {
            error!("Failed to convert dataset: {}", e);
            std::process::exit(1);
        }
    }
}
