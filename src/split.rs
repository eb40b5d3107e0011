//! Train/test splitting for COCO documents
//!
//! Partitions the image-id set at a fixed ratio and filters the annotation
//! collection by membership, leaving every record otherwise untouched.

use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;
use std::path::Path;

use crate::coco::CocoFile;
use crate::config::SplitArgs;

/// Number of images reserved for testing. Truncation, so the train partition
/// receives the rounding remainder.
pub fn test_partition_size(n_images: usize, test_ratio: f64) -> usize {
    (n_images as f64 * test_ratio) as usize
}

/// Partition a COCO document into train and test documents.
///
/// Image ids are shuffled with the seeded generator and the first
/// `floor(n * test_ratio)` ids form the test set, so the same input with the
/// same seed always yields the same partition. Images and annotations keep
/// their input order in both outputs; categories are copied to both.
pub fn split_dataset(coco: &CocoFile, test_ratio: f64, seed: u64) -> (CocoFile, CocoFile) {
    let mut image_ids = coco.image_ids();
    let mut rng = StdRng::seed_from_u64(seed);
    image_ids.shuffle(&mut rng);

    let n_test = test_partition_size(image_ids.len(), test_ratio);
    let test_ids: HashSet<u32> = image_ids[..n_test].iter().copied().collect();

    let train = CocoFile {
        images: coco
            .images
            .iter()
            .filter(|img| !test_ids.contains(&img.id))
            .cloned()
            .collect(),
        annotations: coco
            .annotations
            .iter()
            .filter(|ann| !test_ids.contains(&ann.image_id))
            .cloned()
            .collect(),
        categories: coco.categories.clone(),
    };

    let test = CocoFile {
        images: coco
            .images
            .iter()
            .filter(|img| test_ids.contains(&img.id))
            .cloned()
            .collect(),
        annotations: coco
            .annotations
            .iter()
            .filter(|ann| test_ids.contains(&ann.image_id))
            .cloned()
            .collect(),
        categories: coco.categories.clone(),
    };

    (train, test)
}

/// Load the input document, validate it, split it, and write
/// `train_split.json` and `test_split.json` into the output directory.
pub fn run_split(args: &SplitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let coco = CocoFile::load(&args.input)?;
    coco.validate()?;

    let (train, test) = split_dataset(&coco, args.test_ratio, args.seed);

    let train_path = args.out_dir.join("train_split.json");
    let test_path = args.out_dir.join("test_split.json");
    write_split(&train, &train_path)?;
    write_split(&test, &test_path)?;

    info!(
        "Wrote {} train images -> {}",
        train.images.len(),
        train_path.display()
    );
    info!(
        "Wrote {} test images -> {}",
        test.images.len(),
        test_path.display()
    );

    Ok(())
}

fn write_split(coco: &CocoFile, path: &Path) -> std::io::Result<()> {
    coco.save(path)
}
