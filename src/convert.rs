//! LabelMe to COCO conversion pipeline
//!
//! Walks the per-video annotation trees, pairs every annotation file with its
//! frame image, and assembles one COCO document with deterministic id
//! assignment.

use glob::glob;
use log::{info, warn};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::coco::{bbox_from_points, flatten_points, Annotation, Category, CocoFile, Image};
use crate::config::ConvertArgs;
use crate::types::{ConversionStats, FrameRef, ImageAnnotation};
use crate::utils::{create_progress_bar, read_and_parse_json, read_image_dimensions};

/// Collect all annotation files under `<ann_dir>/*_full/ann_dir/`, sorted so
/// that id assignment does not depend on filesystem enumeration order.
pub fn collect_annotation_files(ann_dir: &Path) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let pattern = format!("{}/*_full/ann_dir/*.json", ann_dir.display());
    let mut files: Vec<PathBuf> = glob(&pattern)?.filter_map(|entry| entry.ok()).collect();
    files.sort();
    Ok(files)
}

/// Find the frame image for an annotation file, trying `.png` before `.jpg`.
/// Returns the full path together with the relative `file_name` recorded in
/// the COCO document.
fn locate_image(image_dir: &Path, frame: &FrameRef) -> Option<(PathBuf, String)> {
    for ext in ["png", "jpg"] {
        let relative = format!("videos/{}/{}.{}", frame.video_id, frame.frame_id, ext);
        let full = image_dir.join("videos").join(&frame.video_id).join(format!(
            "{}.{}",
            frame.frame_id, ext
        ));
        if full.exists() {
            return Some((full, relative));
        }
    }
    None
}

/// Image dimensions for one frame: taken from the annotation file when it
/// carries them, probed from the image header otherwise.
fn frame_dimensions(
    annotation: &ImageAnnotation,
    image_path: &Path,
) -> std::io::Result<(u32, u32)> {
    if let (Some(width), Some(height)) = (annotation.image_width, annotation.image_height) {
        return Ok((width, height));
    }
    read_image_dimensions(image_path)
}

/// Convert a LabelMe annotation tree into one COCO document and write it to
/// `args.output`.
///
/// Policy for empty images: a frame appears in `images` if and only if its
/// annotation file was successfully converted, even when the file lists no
/// shapes; frames that were never annotated do not appear at all.
///
/// Ids are assigned in sorted-file order: images by first appearance of their
/// relative path, categories by first appearance of their label, annotations
/// sequentially. All three count from 1.
pub fn convert_dataset(
    args: &ConvertArgs,
) -> Result<(CocoFile, ConversionStats), Box<dyn std::error::Error>> {
    if !args.ann_dir.exists() {
        return Err(format!(
            "annotation directory does not exist: {}",
            args.ann_dir.display()
        )
        .into());
    }

    let files = collect_annotation_files(&args.ann_dir)?;
    info!("Found {} annotation files", files.len());

    // Parse in parallel; collect() keeps the sorted input order so the
    // assembly pass below stays deterministic.
    let pb = create_progress_bar(files.len() as u64, "Converting");
    let parsed: Vec<(PathBuf, Option<ImageAnnotation>)> = files
        .into_par_iter()
        .map(|path| {
            let annotation = read_and_parse_json(&path);
            pb.inc(1);
            (path, annotation)
        })
        .collect();
    pb.finish_with_message("Parsing complete");

    let mut stats = ConversionStats::new();
    let mut images: Vec<Image> = Vec::new();
    let mut annotations: Vec<Annotation> = Vec::new();
    let mut image_id_map: HashMap<String, u32> = HashMap::new();
    let mut category_id_map: HashMap<String, u32> = HashMap::new();
    let mut category_names: Vec<String> = Vec::new();
    let mut next_image_id: u32 = 1;
    let mut next_annotation_id: u32 = 1;

    for (path, annotation) in parsed {
        stats.files_scanned += 1;

        let annotation = match annotation {
            Some(annotation) => annotation,
            None => {
                stats.failed_parse += 1;
                continue;
            }
        };

        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem,
            None => {
                stats.skipped_bad_stem += 1;
                continue;
            }
        };
        let frame = match FrameRef::parse(stem) {
            Some(frame) => frame,
            None => {
                warn!("Unrecognized annotation file stem: {}", stem);
                stats.skipped_bad_stem += 1;
                continue;
            }
        };

        let (image_path, relative_path) = match locate_image(&args.image_dir, &frame) {
            Some(found) => found,
            None => {
                warn!(
                    "Image not found for frame {} in {}",
                    frame.frame_id, frame.video_id
                );
                stats.skipped_missing_image += 1;
                continue;
            }
        };

        let (width, height) = match frame_dimensions(&annotation, &image_path) {
            Ok(dims) => dims,
            Err(e) => {
                warn!("Could not read image {}: {}", image_path.display(), e);
                stats.skipped_unreadable_image += 1;
                continue;
            }
        };

        let image_id = match image_id_map.get(&relative_path) {
            Some(&id) => id,
            None => {
                let id = next_image_id;
                next_image_id += 1;
                image_id_map.insert(relative_path.clone(), id);
                images.push(Image {
                    id,
                    file_name: relative_path,
                    height,
                    width,
                });
                stats.images_converted += 1;
                id
            }
        };

        for shape in &annotation.shapes {
            let bbox = match bbox_from_points(&shape.points) {
                Some(bbox) => bbox,
                None => {
                    warn!("Shape without points in {}", path.display());
                    stats.skipped_empty_shapes += 1;
                    continue;
                }
            };

            let category_id = match category_id_map.get(&shape.label) {
                Some(&id) => id,
                None => {
                    let id = category_names.len() as u32 + 1;
                    category_id_map.insert(shape.label.clone(), id);
                    category_names.push(shape.label.clone());
                    id
                }
            };

            let [_, _, bbox_width, bbox_height] = bbox;
            annotations.push(Annotation {
                id: next_annotation_id,
                image_id,
                category_id,
                segmentation: vec![flatten_points(&shape.points)],
                bbox,
                area: bbox_width * bbox_height,
                iscrowd: 0,
            });
            next_annotation_id += 1;
            stats.annotations_converted += 1;
        }
    }

    let categories: Vec<Category> = category_names
        .iter()
        .enumerate()
        .map(|(idx, name)| Category {
            id: idx as u32 + 1,
            name: name.clone(),
        })
        .collect();

    let coco = CocoFile {
        images,
        annotations,
        categories,
    };
    coco.validate()?;
    coco.save(&args.output)?;

    info!("COCO JSON saved at: {}", args.output.display());
    info!("Total images: {}", coco.images.len());
    info!("Total annotations: {}", coco.annotations.len());
    info!(
        "Categories: {:?}",
        coco.categories
            .iter()
            .map(|cat| cat.name.as_str())
            .collect::<Vec<_>>()
    );
    stats.print_summary();

    Ok((coco, stats))
}
