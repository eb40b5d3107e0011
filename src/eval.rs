//! Evaluation driver and COCO-protocol detection metrics.
//!
//! Inference runs the trained model over the test split; the metric half is
//! plain arithmetic over box lists and has no tensor dependencies. Matching
//! follows the COCO protocol: per image and category, detections are matched
//! greedily in score order against unmatched ground truths at IoU thresholds
//! 0.50:0.05:0.95, AP is the 101-point interpolated area under the
//! precision/recall curve, and AR@k caps detections per image before
//! matching.

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufWriter;
use tch::{nn, Device};

use crate::config::EvalArgs;
use crate::dataset::DetectionDataset;
use crate::model::MaskRcnn;

/// IoU thresholds of the COCO protocol, 0.50 to 0.95 in steps of 0.05.
pub const IOU_THRESHOLDS: [f64; 10] = [
    0.50, 0.55, 0.60, 0.65, 0.70, 0.75, 0.80, 0.85, 0.90, 0.95,
];

const RECALL_POINTS: usize = 101;

/// One predicted box, in xyxy coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    pub image_id: u32,
    pub category_id: u32,
    pub bbox: [f64; 4],
    pub score: f64,
}

/// One ground-truth box, in xyxy coordinates.
#[derive(Debug, Clone)]
pub struct GroundTruth {
    pub image_id: u32,
    pub category_id: u32,
    pub bbox: [f64; 4],
}

/// Aggregated metrics over all categories that have ground truth.
#[derive(Debug, Clone, Serialize)]
pub struct EvalSummary {
    /// Mean AP over IoU 0.50:0.95
    pub ap: f64,
    pub ap50: f64,
    pub ap75: f64,
    pub ar1: f64,
    pub ar10: f64,
    pub ar100: f64,
    /// Per-category AP over IoU 0.50:0.95
    pub per_category: Vec<CategoryAp>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryAp {
    pub category: String,
    pub ap: f64,
}

/// Intersection-over-union of two xyxy boxes.
pub fn iou(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = ix * iy;
    if inter <= 0.0 {
        return 0.0;
    }
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    inter / (area_a + area_b - inter)
}

/// Match detections of one category against ground truth at one IoU
/// threshold. Detections must already be sorted by descending score.
/// Returns a true/false-positive flag per detection.
fn match_at_threshold(
    detections: &[&Detection],
    gts_by_image: &HashMap<u32, Vec<&GroundTruth>>,
    threshold: f64,
) -> Vec<bool> {
    let mut taken: HashMap<u32, Vec<bool>> = gts_by_image
        .iter()
        .map(|(&image_id, gts)| (image_id, vec![false; gts.len()]))
        .collect();

    detections
        .iter()
        .map(|det| {
            let (gts, flags) = match (gts_by_image.get(&det.image_id), taken.get_mut(&det.image_id))
            {
                (Some(gts), Some(flags)) => (gts, flags),
                _ => return false,
            };

            let mut best: Option<(usize, f64)> = None;
            for (i, gt) in gts.iter().enumerate() {
                if flags[i] {
                    continue;
                }
                let overlap = iou(&det.bbox, &gt.bbox);
                if overlap >= threshold && best.map_or(true, |(_, b)| overlap > b) {
                    best = Some((i, overlap));
                }
            }

            match best {
                Some((i, _)) => {
                    flags[i] = true;
                    true
                }
                None => false,
            }
        })
        .collect()
}

/// 101-point interpolated average precision from a true-positive sequence in
/// score order and the number of ground truths.
fn average_precision(tp_flags: &[bool], n_gt: usize) -> f64 {
    if n_gt == 0 {
        return 0.0;
    }

    let mut recalls = Vec::with_capacity(tp_flags.len());
    let mut precisions = Vec::with_capacity(tp_flags.len());
    let mut tp = 0usize;
    for (i, &is_tp) in tp_flags.iter().enumerate() {
        if is_tp {
            tp += 1;
        }
        recalls.push(tp as f64 / n_gt as f64);
        precisions.push(tp as f64 / (i + 1) as f64);
    }

    // Precision envelope: each point takes the maximum precision reachable
    // at an equal or higher recall.
    for i in (0..precisions.len().saturating_sub(1)).rev() {
        if precisions[i + 1] > precisions[i] {
            precisions[i] = precisions[i + 1];
        }
    }

    let mut sum = 0.0;
    for point in 0..RECALL_POINTS {
        let recall = point as f64 / (RECALL_POINTS - 1) as f64;
        let precision = recalls
            .iter()
            .position(|&r| r >= recall)
            .map(|idx| precisions[idx])
            .unwrap_or(0.0);
        sum += precision;
    }
    sum / RECALL_POINTS as f64
}

/// Recall of one category at one threshold with at most `k` detections kept
/// per image.
fn recall_at_k(
    detections: &[&Detection],
    gts_by_image: &HashMap<u32, Vec<&GroundTruth>>,
    threshold: f64,
    k: usize,
) -> f64 {
    let n_gt: usize = gts_by_image.values().map(Vec::len).sum();
    if n_gt == 0 {
        return 0.0;
    }

    // Keep the k best-scored detections per image; the input order already
    // is descending score, so a per-image counter suffices.
    let mut kept_count: HashMap<u32, usize> = HashMap::new();
    let capped: Vec<&Detection> = detections
        .iter()
        .filter(|det| {
            let count = kept_count.entry(det.image_id).or_insert(0);
            *count += 1;
            *count <= k
        })
        .copied()
        .collect();

    let matched = match_at_threshold(&capped, gts_by_image, threshold);
    let tp = matched.iter().filter(|&&m| m).count();
    tp as f64 / n_gt as f64
}

/// Compute the COCO detection metric set over all categories.
///
/// Categories without any ground truth are excluded from every mean, the
/// protocol's behavior. Detections must carry category ids present in
/// `categories`.
pub fn evaluate_detections(
    detections: &[Detection],
    ground_truths: &[GroundTruth],
    categories: &[crate::coco::Category],
) -> EvalSummary {
    let mut per_category = Vec::new();
    let mut ap_sum = 0.0;
    let mut ap50_sum = 0.0;
    let mut ap75_sum = 0.0;
    let mut ar1_sum = 0.0;
    let mut ar10_sum = 0.0;
    let mut ar100_sum = 0.0;
    let mut n_evaluated = 0usize;

    for category in categories {
        let gts: Vec<&GroundTruth> = ground_truths
            .iter()
            .filter(|gt| gt.category_id == category.id)
            .collect();
        if gts.is_empty() {
            continue;
        }
        let n_gt = gts.len();

        let mut gts_by_image: HashMap<u32, Vec<&GroundTruth>> = HashMap::new();
        for gt in gts {
            gts_by_image.entry(gt.image_id).or_default().push(gt);
        }

        let mut dets: Vec<&Detection> = detections
            .iter()
            .filter(|det| det.category_id == category.id)
            .collect();
        dets.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let mut category_ap = 0.0;
        // threshold indices 0 and 5 are the 0.50 and 0.75 entries
        for (t, &threshold) in IOU_THRESHOLDS.iter().enumerate() {
            let flags = match_at_threshold(&dets, &gts_by_image, threshold);
            let ap = average_precision(&flags, n_gt);
            category_ap += ap;
            if t == 0 {
                ap50_sum += ap;
            }
            if t == 5 {
                ap75_sum += ap;
            }
            ar1_sum += recall_at_k(&dets, &gts_by_image, threshold, 1);
            ar10_sum += recall_at_k(&dets, &gts_by_image, threshold, 10);
            ar100_sum += recall_at_k(&dets, &gts_by_image, threshold, 100);
        }
        category_ap /= IOU_THRESHOLDS.len() as f64;

        ap_sum += category_ap;
        per_category.push(CategoryAp {
            category: category.name.clone(),
            ap: category_ap,
        });
        n_evaluated += 1;
    }

    if n_evaluated == 0 {
        warn!("no category has ground truth; all metrics are zero");
        return EvalSummary {
            ap: 0.0,
            ap50: 0.0,
            ap75: 0.0,
            ar1: 0.0,
            ar10: 0.0,
            ar100: 0.0,
            per_category,
        };
    }

    let n = n_evaluated as f64;
    let n_thr = IOU_THRESHOLDS.len() as f64;
    EvalSummary {
        ap: ap_sum / n,
        ap50: ap50_sum / n,
        ap75: ap75_sum / n,
        ar1: ar1_sum / (n * n_thr),
        ar10: ar10_sum / (n * n_thr),
        ar100: ar100_sum / (n * n_thr),
        per_category,
    }
}

/// Ground-truth boxes of a dataset in the evaluator's xyxy layout.
pub fn ground_truths_of(dataset: &DetectionDataset) -> Vec<GroundTruth> {
    (0..dataset.len())
        .flat_map(|idx| {
            let image_id = dataset.image_id(idx);
            dataset.annotations(idx).iter().map(move |ann| {
                let [x, y, w, h] = ann.bbox;
                GroundTruth {
                    image_id,
                    category_id: ann.category_id,
                    bbox: [x, y, x + w, y + h],
                }
            })
        })
        .collect()
}

/// Run inference over the test split and compute the metric set.
pub fn run_evaluation(args: &EvalArgs) -> Result<EvalSummary> {
    let device = Device::cuda_if_available();
    info!("Evaluating on {:?}", device);

    let dataset = DetectionDataset::load(&args.test_json, &args.image_root)?;
    info!(
        "Loaded {} test images, {} categories",
        dataset.len(),
        dataset.num_classes()
    );

    let mut vs = nn::VarStore::new(device);
    let mut model = MaskRcnn::load(&args.model, &vs)?;
    vs.load(&args.weights)
        .with_context(|| format!("failed to load weights '{}'", args.weights.display()))?;
    model.set_eval();

    let pb = crate::utils::create_progress_bar(dataset.len() as u64, "Evaluating");
    let mut detections: Vec<Detection> = Vec::new();
    for idx in 0..dataset.len() {
        let image = match dataset.load_image(idx, device) {
            Ok(image) => image,
            Err(e) => {
                warn!("skipping test image {}: {}", idx, e);
                pb.inc(1);
                continue;
            }
        };

        let mut raw = tch::no_grad(|| model.predict(&image))?;
        raw.retain(|det| det.score >= args.score_thresh);
        raw.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        raw.truncate(args.max_dets);

        let image_id = dataset.image_id(idx);
        detections.extend(raw.into_iter().map(|det| Detection {
            image_id,
            category_id: det.label as u32,
            bbox: det.bbox,
            score: det.score,
        }));
        pb.inc(1);
    }
    pb.finish_with_message("Inference complete");

    let ground_truths = ground_truths_of(&dataset);
    let summary = evaluate_detections(&detections, &ground_truths, &dataset.categories);

    info!("=== COCO detection metrics (bbox) ===");
    info!("AP    (IoU 0.50:0.95): {:.4}", summary.ap);
    info!("AP50              : {:.4}", summary.ap50);
    info!("AP75              : {:.4}", summary.ap75);
    info!("AR@1              : {:.4}", summary.ar1);
    info!("AR@10             : {:.4}", summary.ar10);
    info!("AR@100            : {:.4}", summary.ar100);
    for entry in &summary.per_category {
        info!("AP[{}]: {:.4}", entry.category, entry.ap);
    }

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("failed to create '{}'", args.output_dir.display()))?;
    let metrics_path = args.output_dir.join("coco_metrics.json");
    let file = File::create(&metrics_path)
        .with_context(|| format!("failed to create '{}'", metrics_path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &summary)
        .context("failed to write metrics JSON")?;
    info!("Wrote {}", metrics_path.display());

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_identical_boxes() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert_eq!(iou(&a, &a), 1.0);
    }

    #[test]
    fn iou_disjoint_boxes() {
        let a = [0.0, 0.0, 10.0, 10.0];
        let b = [20.0, 20.0, 30.0, 30.0];
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn iou_partial_overlap() {
        let a = [0.0, 0.0, 10.0, 10.0];
        let b = [0.0, 0.0, 10.0, 6.0];
        let expected = 60.0 / 100.0;
        assert!((iou(&a, &b) - expected).abs() < 1e-12);
    }

    #[test]
    fn perfect_single_detection_has_unit_ap() {
        let flags = vec![true];
        assert_eq!(average_precision(&flags, 1), 1.0);
    }

    #[test]
    fn missed_ground_truth_halves_recall() {
        // One of two ground truths found: precision 1 up to recall 0.5, then 0.
        let flags = vec![true];
        let ap = average_precision(&flags, 2);
        assert!((ap - 51.0 / 101.0).abs() < 1e-12);
    }
}
