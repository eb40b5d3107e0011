//! Training driver.
//!
//! Configuration assembly around the external runtime: load the scripted
//! model, hand its parameters to the runtime's SGD optimizer, and iterate
//! minibatches for a fixed number of steps. Forward, backward and optimizer
//! state all live inside libtorch.

use anyhow::{bail, Context, Result};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs::{self, OpenOptions};
use std::io::Write;
use tch::nn::{self, OptimizerConfig};
use tch::{Device, Tensor};

use crate::config::TrainArgs;
use crate::dataset::DetectionDataset;
use crate::model::MaskRcnn;

const MOMENTUM: f64 = 0.9;
const WEIGHT_DECAY: f64 = 1e-4;

pub const FINAL_CHECKPOINT: &str = "model_final.ot";
pub const METRICS_FILE: &str = "metrics.json";

/// Run the training loop described by `args`.
pub fn train(args: &TrainArgs) -> Result<()> {
    let device = Device::cuda_if_available();
    info!("Training on {:?}", device);

    if args.ims_per_batch == 0 {
        bail!("ims_per_batch must be positive");
    }

    let dataset = DetectionDataset::load(&args.train_json, &args.image_root)?;
    info!(
        "Loaded {} training images, {} categories",
        dataset.len(),
        dataset.num_classes()
    );
    if dataset.num_classes() != args.num_classes {
        warn!(
            "dataset has {} categories but the driver was configured for {}",
            dataset.num_classes(),
            args.num_classes
        );
    }

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("failed to create '{}'", args.output_dir.display()))?;

    let mut vs = nn::VarStore::new(device);
    let mut model = MaskRcnn::load(&args.model, &vs)?;

    let final_path = args.output_dir.join(FINAL_CHECKPOINT);
    if args.resume && final_path.exists() {
        vs.load(&final_path)
            .with_context(|| format!("failed to resume from '{}'", final_path.display()))?;
        info!("Resumed weights from {}", final_path.display());
    }

    train_loop(args, &dataset, &mut model, vs)
}

fn train_loop(
    args: &TrainArgs,
    dataset: &DetectionDataset,
    model: &mut MaskRcnn,
    vs: nn::VarStore,
) -> Result<()> {
    let device = model.device;
    let mut opt = nn::Sgd {
        momentum: MOMENTUM,
        dampening: 0.0,
        wd: WEIGHT_DECAY,
        nesterov: false,
    }
    .build(&vs, args.base_lr)?;

    model.set_train();

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut order: Vec<usize> = Vec::new();
    let metrics_path = args.output_dir.join(METRICS_FILE);

    for iter in 1..=args.max_iter {
        // Refill and reshuffle the index pool once a pass over the dataset
        // is exhausted.
        while order.len() < args.ims_per_batch {
            let mut fresh: Vec<usize> = (0..dataset.len()).collect();
            fresh.shuffle(&mut rng);
            order.extend(fresh);
        }
        let batch: Vec<usize> = order.drain(..args.ims_per_batch).collect();

        let mut images: Vec<Tensor> = Vec::with_capacity(batch.len());
        let mut targets: Vec<(Tensor, Tensor)> = Vec::with_capacity(batch.len());
        for idx in batch {
            match dataset.load_image(idx, device) {
                Ok(image) => {
                    images.push(image);
                    targets.push(dataset.targets(idx, device));
                }
                Err(e) => warn!("skipping sample {}: {}", idx, e),
            }
        }
        if images.is_empty() {
            warn!("entire batch unreadable at iteration {}", iter);
            continue;
        }

        let losses = model.forward_loss(images, targets)?;
        let total = losses.total()?;
        opt.backward_step(&total);

        if args.log_period > 0 && iter % args.log_period == 0 {
            let total_value = total.double_value(&[]);
            let components = losses.scalar_components();
            info!(
                "iter {}/{}  total_loss {:.4}  lr {:.6}",
                iter, args.max_iter, total_value, args.base_lr
            );
            if let Err(e) = append_metrics(
                &metrics_path,
                iter,
                total_value,
                &components,
                args.base_lr,
            ) {
                warn!("failed to append metrics line: {}", e);
            }
        }

        if args.checkpoint_period > 0 && iter % args.checkpoint_period == 0 && iter < args.max_iter
        {
            let path = args.output_dir.join(format!("model_{:07}.ot", iter));
            vs.save(&path)
                .with_context(|| format!("failed to save checkpoint '{}'", path.display()))?;
            info!("Saved checkpoint {}", path.display());
        }
    }

    let final_path = args.output_dir.join(FINAL_CHECKPOINT);
    vs.save(&final_path)
        .with_context(|| format!("failed to save '{}'", final_path.display()))?;
    info!("Saved final weights to {}", final_path.display());

    Ok(())
}

/// Append one JSON line to the metrics log, one object per logging period.
fn append_metrics(
    path: &std::path::Path,
    iteration: usize,
    total_loss: f64,
    components: &[(String, f64)],
    lr: f64,
) -> std::io::Result<()> {
    let mut record = serde_json::Map::new();
    record.insert("iteration".to_string(), iteration.into());
    record.insert("total_loss".to_string(), total_loss.into());
    for (name, value) in components {
        record.insert(name.clone(), (*value).into());
    }
    record.insert("lr".to_string(), lr.into());
    record.insert(
        "time".to_string(),
        chrono::Utc::now().to_rfc3339().into(),
    );

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", serde_json::Value::Object(record))
}
