use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

/// Command-line arguments for converting LabelMe annotations to one COCO
/// document.
#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
pub struct ConvertArgs {
    /// Directory containing the per-video annotation trees
    /// (`<ann_dir>/VIDxx_full/ann_dir/*.json`)
    #[arg(short = 'a', long = "ann_dir", default_value = "cholecinstanceseg/train")]
    pub ann_dir: PathBuf,

    /// Root directory of the frame images (`<image_dir>/videos/VIDxx/*.png`)
    #[arg(short = 'i', long = "image_dir", default_value = "CholecT50")]
    pub image_dir: PathBuf,

    /// Output path for the COCO JSON document
    #[arg(short = 'o', long = "output", default_value = "annotations/train_coco.json")]
    pub output: PathBuf,
}

/// Command-line arguments for splitting a COCO document into train and test
/// partitions.
#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
pub struct SplitArgs {
    /// Input COCO JSON document
    #[arg(short = 'i', long = "input", default_value = "annotations/train_coco.json")]
    pub input: PathBuf,

    /// Directory receiving train_split.json and test_split.json
    #[arg(short = 'o', long = "out_dir", default_value = "annotations")]
    pub out_dir: PathBuf,

    /// Proportion of images reserved for testing
    #[arg(long = "test_ratio", default_value_t = 0.1, value_parser = validate_ratio)]
    pub test_ratio: f64,

    /// Seed for the shuffle; a fixed seed makes the split reproducible
    #[arg(long = "seed", default_value_t = 42)]
    pub seed: u64,
}

/// Command-line arguments for the training driver.
#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
pub struct TrainArgs {
    /// Training split in COCO format
    #[arg(long = "train_json", default_value = "annotations/train_split.json")]
    pub train_json: PathBuf,

    /// Root directory of the frame images
    #[arg(long = "image_root", default_value = "CholecT50")]
    pub image_root: PathBuf,

    /// TorchScript export of the pretrained-backbone Mask R-CNN
    #[arg(long = "model", default_value = "models/mask_rcnn_R_50_FPN_3x.pt")]
    pub model: PathBuf,

    /// Directory receiving checkpoints and the metrics log
    #[arg(long = "output_dir", default_value = "output_maskrcnn")]
    pub output_dir: PathBuf,

    /// Number of instrument categories in the dataset
    #[arg(long = "num_classes", default_value_t = 7)]
    pub num_classes: usize,

    /// Number of images per batch
    #[arg(long = "ims_per_batch", default_value_t = 4)]
    pub ims_per_batch: usize,

    /// Base learning rate
    #[arg(long = "base_lr", default_value_t = 0.00025)]
    pub base_lr: f64,

    /// Total number of training iterations
    #[arg(long = "max_iter", default_value_t = 5000)]
    pub max_iter: usize,

    /// Save a checkpoint every this many iterations
    #[arg(long = "checkpoint_period", default_value_t = 1000)]
    pub checkpoint_period: usize,

    /// Append a metrics line every this many iterations
    #[arg(long = "log_period", default_value_t = 20)]
    pub log_period: usize,

    /// Seed for batch shuffling
    #[arg(long = "seed", default_value_t = 42)]
    pub seed: u64,

    /// Reload model_final.ot from the output directory before training
    #[arg(long = "resume")]
    pub resume: bool,
}

/// Command-line arguments for the evaluation driver.
#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
pub struct EvalArgs {
    /// Test split in COCO format
    #[arg(long = "test_json", default_value = "annotations/test_split.json")]
    pub test_json: PathBuf,

    /// Root directory of the frame images
    #[arg(long = "image_root", default_value = "CholecT50")]
    pub image_root: PathBuf,

    /// TorchScript export of the Mask R-CNN model
    #[arg(long = "model", default_value = "models/mask_rcnn_R_50_FPN_3x.pt")]
    pub model: PathBuf,

    /// Trained weights saved by the training driver
    #[arg(long = "weights", default_value = "output_maskrcnn/model_final.ot")]
    pub weights: PathBuf,

    /// Minimum score for a prediction to be kept
    #[arg(long = "score_thresh", default_value_t = 0.5, value_parser = validate_ratio)]
    pub score_thresh: f64,

    /// Maximum number of detections kept per image
    #[arg(long = "max_dets", default_value_t = 100)]
    pub max_dets: usize,

    /// Directory receiving the metrics JSON
    #[arg(long = "output_dir", default_value = "output")]
    pub output_dir: PathBuf,
}

// Validate that a ratio is between 0.0 and 1.0
fn validate_ratio(s: &str) -> Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if (0.0..=1.0).contains(&val) => Ok(val),
        _ => Err("RATIO must be between 0.0 and 1.0".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_bounds() {
        assert!(validate_ratio("0.5").is_ok());
        assert!(validate_ratio("1.0").is_ok());
        assert!(validate_ratio("0.0").is_ok());
        assert!(validate_ratio("-0.1").is_err());
        assert!(validate_ratio("1.1").is_err());
        assert!(validate_ratio("abc").is_err());
    }
}
