use indicatif::{ProgressBar, ProgressStyle};
use log::error;
use std::fs;
use std::path::Path;

use crate::types::ImageAnnotation;

/// Read and parse a single LabelMe JSON file into an ImageAnnotation struct.
/// Parses directly from the file stream instead of loading the whole file
/// into memory first.
pub fn read_and_parse_json(path: &Path) -> Option<ImageAnnotation> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) => {
            error!("Failed to open JSON file ({}): {:?}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_reader(std::io::BufReader::new(file)) {
        Ok(annotation) => Some(annotation),
        Err(e) => {
            error!("Failed to parse JSON ({}): {:?}", path.display(), e);
            None
        }
    }
}

/// Create a progress bar with the given length and label
pub fn create_progress_bar(len: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{}] [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} ({{eta}})",
                label
            ))
            .progress_chars("#>-"),
    );
    pb
}

/// Create the parent directory of an output file if it does not exist yet.
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Read the pixel dimensions of an image file from its header without
/// decoding the full image. Returns `(width, height)`.
pub fn read_image_dimensions(path: &Path) -> std::io::Result<(u32, u32)> {
    image::image_dimensions(path)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
