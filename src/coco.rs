//! COCO format data structures and utilities
//!
//! The document layout follows the plain `{images, annotations, categories}`
//! schema consumed by COCO-style detection pipelines.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// COCO image information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: u32,
    pub file_name: String,
    pub height: u32,
    pub width: u32,
}

/// COCO annotation information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: u32,
    pub image_id: u32,
    pub category_id: u32,
    pub segmentation: Vec<Vec<f64>>,
    pub bbox: [f64; 4], // [x, y, width, height]
    pub area: f64,
    pub iscrowd: u32,
}

/// COCO category information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: u32,
    pub name: String,
}

/// Complete COCO dataset document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CocoFile {
    pub images: Vec<Image>,
    pub annotations: Vec<Annotation>,
    pub categories: Vec<Category>,
}

impl CocoFile {
    /// Read a COCO document from a JSON file.
    pub fn load(path: &Path) -> std::io::Result<CocoFile> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Write the document as a single JSON file, creating parent directories
    /// as needed.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        crate::utils::ensure_parent_dir(path)?;
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Check referential integrity: every annotation's `image_id` and
    /// `category_id` must resolve to an existing entry.
    ///
    /// A dangling reference aborts the pipeline before any output is written.
    pub fn validate(&self) -> std::io::Result<()> {
        let image_ids: HashSet<u32> = self.images.iter().map(|img| img.id).collect();
        let category_ids: HashSet<u32> = self.categories.iter().map(|cat| cat.id).collect();

        for ann in &self.annotations {
            if !image_ids.contains(&ann.image_id) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "annotation {} references non-existent image {}",
                        ann.id, ann.image_id
                    ),
                ));
            }
            if !category_ids.contains(&ann.category_id) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "annotation {} references non-existent category {}",
                        ann.id, ann.category_id
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Ids of all images, in document order.
    pub fn image_ids(&self) -> Vec<u32> {
        self.images.iter().map(|img| img.id).collect()
    }
}

/// Calculate the axis-aligned bounding box `[x, y, width, height]` of a point
/// list. Returns `None` for an empty list.
pub fn bbox_from_points(points: &[(f64, f64)]) -> Option<[f64; 4]> {
    if points.is_empty() {
        return None;
    }

    let (x_min, y_min, x_max, y_max) = points.iter().fold(
        (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
        |(x_min, y_min, x_max, y_max), &(x, y)| {
            (x_min.min(x), y_min.min(y), x_max.max(x), y_max.max(y))
        },
    );

    Some([x_min, y_min, x_max - x_min, y_max - y_min])
}

/// Flatten `[(x, y), ...]` into the `[x0, y0, x1, y1, ...]` layout COCO uses
/// for polygon segmentations.
pub fn flatten_points(points: &[(f64, f64)]) -> Vec<f64> {
    points.iter().flat_map(|&(x, y)| [x, y]).collect()
}
