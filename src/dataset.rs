//! COCO detection dataset access for the training and evaluation drivers.
//!
//! Wraps a split document with a per-image annotation index and converts
//! records into the tensor layout the detection runtime expects: float CHW
//! images in `[0, 1]`, `[N, 4]` xyxy box tensors and 1-based int64 labels
//! (label 0 is the implicit background class).

use anyhow::{bail, Context, Result};
use log::warn;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tch::{Device, Kind, Tensor};

use crate::coco::{Annotation, Category, CocoFile, Image};

#[derive(Debug)]
pub struct DetectionDataset {
    image_root: PathBuf,
    pub images: Vec<Image>,
    pub categories: Vec<Category>,
    annotations_by_image: HashMap<u32, Vec<Annotation>>,
}

impl DetectionDataset {
    /// Load a split document and build the per-image annotation index.
    /// Fails fast on referential integrity violations or an empty image list.
    pub fn load(json_path: &Path, image_root: &Path) -> Result<DetectionDataset> {
        let coco = CocoFile::load(json_path)
            .with_context(|| format!("failed to load dataset '{}'", json_path.display()))?;
        coco.validate()
            .with_context(|| format!("invalid dataset '{}'", json_path.display()))?;

        if coco.images.is_empty() {
            bail!("dataset '{}' contains no images", json_path.display());
        }

        // The runtime maps labels onto a contiguous 1..=num_classes range.
        let max_id = coco.categories.iter().map(|cat| cat.id).max().unwrap_or(0);
        if max_id as usize != coco.categories.len() {
            warn!(
                "category ids are not contiguous (max id {}, {} categories)",
                max_id,
                coco.categories.len()
            );
        }

        let mut annotations_by_image: HashMap<u32, Vec<Annotation>> = HashMap::new();
        for ann in coco.annotations {
            annotations_by_image
                .entry(ann.image_id)
                .or_default()
                .push(ann);
        }

        Ok(DetectionDataset {
            image_root: image_root.to_path_buf(),
            images: coco.images,
            categories: coco.categories,
            annotations_by_image,
        })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.categories.len()
    }

    /// Full path of the image at `idx`.
    pub fn image_path(&self, idx: usize) -> PathBuf {
        self.image_root.join(&self.images[idx].file_name)
    }

    pub fn image_id(&self, idx: usize) -> u32 {
        self.images[idx].id
    }

    /// Annotations for the image at `idx`, empty when the image has none.
    pub fn annotations(&self, idx: usize) -> &[Annotation] {
        self.annotations_by_image
            .get(&self.images[idx].id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Load the image at `idx` as a float CHW tensor scaled to `[0, 1]`.
    pub fn load_image(&self, idx: usize, device: Device) -> Result<Tensor> {
        let path = self.image_path(idx);
        let tensor = tch::vision::image::load(&path)
            .with_context(|| format!("failed to load image '{}'", path.display()))?;
        Ok(tensor.to_device(device).to_kind(Kind::Float) / 255.0)
    }

    /// Ground-truth targets for the image at `idx`: an `[N, 4]` xyxy box
    /// tensor and an `[N]` int64 label tensor.
    pub fn targets(&self, idx: usize, device: Device) -> (Tensor, Tensor) {
        let anns = self.annotations(idx);

        let mut boxes: Vec<f32> = Vec::with_capacity(anns.len() * 4);
        let mut labels: Vec<i64> = Vec::with_capacity(anns.len());
        for ann in anns {
            let [x, y, w, h] = ann.bbox;
            boxes.extend_from_slice(&[x as f32, y as f32, (x + w) as f32, (y + h) as f32]);
            labels.push(ann.category_id as i64);
        }

        let boxes = if boxes.is_empty() {
            Tensor::zeros([0, 4], (Kind::Float, device))
        } else {
            Tensor::from_slice(&boxes)
                .view((labels.len() as i64, 4))
                .to_device(device)
        };
        let labels = if labels.is_empty() {
            Tensor::zeros([0], (Kind::Int64, device))
        } else {
            Tensor::from_slice(&labels).to_device(device)
        };

        (boxes, labels)
    }
}
