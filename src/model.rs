//! TorchScript Mask R-CNN wrapper.
//!
//! The network is supplied as a TorchScript export with a pretrained
//! backbone; this module only moves tensors across the scripted `forward`
//! boundary. The scripted detection interface takes a list of CHW float
//! images plus optional `{boxes, labels}` target dicts and returns a
//! `(losses, detections)` tuple: the loss dictionary is populated in training
//! mode, the per-image detection dicts in eval mode.

use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;
use tch::{nn, Device, IValue, Tensor, TrainableCModule};

/// One decoded detection: xyxy box, 1-based label, confidence score.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f64; 4],
    pub label: i64,
    pub score: f64,
}

/// Named loss components as returned by the runtime, plus their sum.
#[derive(Debug)]
pub struct LossDict {
    pub components: Vec<(String, Tensor)>,
}

impl LossDict {
    /// Sum of all loss components, the quantity the optimizer steps on.
    pub fn total(&self) -> Result<Tensor> {
        let mut iter = self.components.iter();
        let (_, first) = iter
            .next()
            .ok_or_else(|| anyhow!("runtime returned an empty loss dictionary"))?;
        let mut total = first.shallow_clone();
        for (_, tensor) in iter {
            total = total + tensor;
        }
        Ok(total)
    }

    /// Scalar values of every component, for the metrics log.
    pub fn scalar_components(&self) -> Vec<(String, f64)> {
        self.components
            .iter()
            .map(|(name, tensor)| (name.clone(), tensor.double_value(&[])))
            .collect()
    }
}

pub struct MaskRcnn {
    module: TrainableCModule,
    pub device: Device,
}

impl MaskRcnn {
    /// Load the TorchScript export, registering its parameters in `vs` so
    /// the optimizer and checkpointing see them.
    pub fn load(model_path: &Path, vs: &nn::VarStore) -> Result<MaskRcnn> {
        let module = TrainableCModule::load(model_path, vs.root())
            .with_context(|| format!("failed to load model '{}'", model_path.display()))?;
        Ok(MaskRcnn {
            module,
            device: vs.device(),
        })
    }

    pub fn set_train(&mut self) {
        self.module.set_train();
    }

    pub fn set_eval(&mut self) {
        self.module.set_eval();
    }

    /// Forward a training batch and return the runtime's loss dictionary.
    pub fn forward_loss(
        &self,
        images: Vec<Tensor>,
        targets: Vec<(Tensor, Tensor)>,
    ) -> Result<LossDict> {
        let target_dicts: Vec<IValue> = targets
            .into_iter()
            .map(|(boxes, labels)| {
                IValue::GenericDict(vec![
                    (
                        IValue::String("boxes".to_string()),
                        IValue::Tensor(boxes),
                    ),
                    (
                        IValue::String("labels".to_string()),
                        IValue::Tensor(labels),
                    ),
                ])
            })
            .collect();

        let output = self
            .module
            .forward_is(&[
                IValue::TensorList(images),
                IValue::GenericList(target_dicts),
            ])
            .context("training forward pass failed")?;

        let losses = match output {
            IValue::Tuple(mut parts) if !parts.is_empty() => parts.remove(0),
            other => other,
        };

        let pairs = match losses {
            IValue::GenericDict(pairs) => pairs,
            other => bail!("expected a loss dictionary, got {:?}", other),
        };

        let mut components = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let name = match key {
                IValue::String(name) => name,
                other => bail!("non-string loss key: {:?}", other),
            };
            let tensor = match value {
                IValue::Tensor(tensor) => tensor,
                other => bail!("non-tensor loss value for '{}': {:?}", name, other),
            };
            components.push((name, tensor));
        }

        Ok(LossDict { components })
    }

    /// Run inference on one image and decode the detection dict.
    pub fn predict(&self, image: &Tensor) -> Result<Vec<RawDetection>> {
        let output = self
            .module
            .forward_is(&[IValue::TensorList(vec![image.shallow_clone()])])
            .context("inference forward pass failed")?;

        let detections = match output {
            // (losses, detections) tuple from the scripted interface
            IValue::Tuple(mut parts) if parts.len() == 2 => parts.remove(1),
            other => other,
        };

        let mut per_image = match detections {
            IValue::GenericList(items) => items,
            other => bail!("expected a detection list, got {:?}", other),
        };
        if per_image.is_empty() {
            return Ok(Vec::new());
        }

        let pairs = match per_image.remove(0) {
            IValue::GenericDict(pairs) => pairs,
            other => bail!("expected a detection dictionary, got {:?}", other),
        };

        let mut boxes: Option<Tensor> = None;
        let mut labels: Option<Tensor> = None;
        let mut scores: Option<Tensor> = None;
        for (key, value) in pairs {
            let name = match key {
                IValue::String(name) => name,
                _ => continue,
            };
            if let IValue::Tensor(tensor) = value {
                match name.as_str() {
                    "boxes" => boxes = Some(tensor),
                    "labels" => labels = Some(tensor),
                    "scores" => scores = Some(tensor),
                    // the mask branch output is not consumed here
                    _ => {}
                }
            }
        }

        let boxes = boxes.ok_or_else(|| anyhow!("detection output lacks 'boxes'"))?;
        let labels = labels.ok_or_else(|| anyhow!("detection output lacks 'labels'"))?;
        let scores = scores.ok_or_else(|| anyhow!("detection output lacks 'scores'"))?;

        let n = boxes.size()[0];
        let mut result = Vec::with_capacity(n as usize);
        for i in 0..n {
            result.push(RawDetection {
                bbox: [
                    boxes.double_value(&[i, 0]),
                    boxes.double_value(&[i, 1]),
                    boxes.double_value(&[i, 2]),
                    boxes.double_value(&[i, 3]),
                ],
                label: labels.int64_value(&[i]),
                score: scores.double_value(&[i]),
            });
        }
        Ok(result)
    }
}
