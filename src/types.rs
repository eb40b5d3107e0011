use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// The Shape struct representing annotated shapes
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Shape {
    pub label: String,
    pub points: Vec<(f64, f64)>,
    pub group_id: Option<i64>,
    #[serde(default)]
    pub shape_type: String,
    pub description: Option<String>,
}

// The ImageAnnotation struct representing one LabelMe document for one frame.
// CholecInstanceSeg files do not always carry image dimensions; when absent
// they are probed from the image file itself.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ImageAnnotation {
    #[serde(default)]
    pub version: Option<String>,
    pub flags: Option<HashMap<String, bool>>,
    pub shapes: Vec<Shape>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub image_height: Option<u32>,
    #[serde(default)]
    pub image_width: Option<u32>,
}

/// Video and frame identifiers parsed from an annotation file stem such as
/// `t50_VID01_000468`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRef {
    pub video_id: String,
    pub frame_id: String,
}

impl FrameRef {
    /// Parse a file stem of the form `<prefix>_<video>_<frame>`.
    ///
    /// The video id is the second underscore-separated field and the frame id
    /// is the last one. Returns `None` when the stem has fewer than three
    /// fields or an empty video/frame component.
    pub fn parse(stem: &str) -> Option<FrameRef> {
        let parts: Vec<&str> = stem.split('_').collect();
        if parts.len() < 3 {
            return None;
        }
        let video_id = parts[1];
        let frame_id = parts[parts.len() - 1];
        if video_id.is_empty() || frame_id.is_empty() {
            return None;
        }
        Some(FrameRef {
            video_id: video_id.to_string(),
            frame_id: frame_id.to_string(),
        })
    }
}

// Struct to hold conversion statistics
#[derive(Debug, Default, Clone)]
pub struct ConversionStats {
    pub files_scanned: usize,
    pub images_converted: usize,
    pub annotations_converted: usize,
    pub failed_parse: usize,
    pub skipped_bad_stem: usize,
    pub skipped_missing_image: usize,
    pub skipped_unreadable_image: usize,
    pub skipped_empty_shapes: usize,
}

impl ConversionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn print_summary(&self) {
        log::info!("=== Conversion Summary ===");
        log::info!("Annotation files scanned: {}", self.files_scanned);
        log::info!("Images converted: {}", self.images_converted);
        log::info!("Annotations converted: {}", self.annotations_converted);
        log::info!("Failed to parse: {}", self.failed_parse);

        let total_skipped =
            self.skipped_bad_stem + self.skipped_missing_image + self.skipped_unreadable_image;
        if total_skipped > 0 {
            log::warn!(
                "Skipped files: {} (bad stem: {}, missing image: {}, unreadable image: {})",
                total_skipped,
                self.skipped_bad_stem,
                self.skipped_missing_image,
                self.skipped_unreadable_image
            );
        }
        if self.skipped_empty_shapes > 0 {
            log::warn!(
                "Shapes without points skipped: {}",
                self.skipped_empty_shapes
            );
        }
    }
}
