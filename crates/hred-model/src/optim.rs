use std::collections::HashMap;

use hred_tensor::{Gradients, ParamId, ParamStore, Shape, Tensor};

use crate::config::OptimizerKind;
use crate::error::{ModelError, Result};

const ADAM_BETA1: f32 = 0.9;
const ADAM_BETA2: f32 = 0.999;
const ADAM_EPSILON: f32 = 1e-8;
const RMSPROP_DECAY: f32 = 0.9;
const RMSPROP_EPSILON: f32 = 1e-10;

/// First-order optimizer with per-parameter slot state.
///
/// Slot names: Adam keeps `m` and `v`, RMSProp keeps `ms` (initialized to
/// ones), SGD keeps nothing.
#[derive(Debug, Clone)]
pub struct Optimizer {
    kind: OptimizerKind,
    step: u64,
    slots: HashMap<(&'static str, ParamId), Vec<f32>>,
}

impl Optimizer {
    pub fn new(kind: OptimizerKind) -> Self {
        Optimizer {
            kind,
            step: 0,
            slots: HashMap::new(),
        }
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    /// Number of updates applied so far.
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn slot_names(&self) -> &'static [&'static str] {
        match self.kind {
            OptimizerKind::Adam => &["m", "v"],
            OptimizerKind::RmsProp => &["ms"],
            OptimizerKind::Sgd => &[],
        }
    }

    /// Drop all slot state.
    pub fn reset(&mut self) {
        self.step = 0;
        self.slots.clear();
    }

    /// Apply one update with learning rate `lr`.
    pub fn apply(&mut self, params: &mut ParamStore, grads: &Gradients, lr: f32) -> Result<()> {
        self.step += 1;
        let t = self.step as i32;
        for (id, grad) in grads.iter() {
            let g = grad.data_f32();
            let n = g.len();
            let p = params.get_mut(id).data_f32_mut();
            if p.len() != n {
                return Err(ModelError::Other(format!(
                    "gradient of {} values for a parameter of {}",
                    n,
                    p.len()
                )));
            }
            match self.kind {
                OptimizerKind::Sgd => {
                    for (w, gi) in p.iter_mut().zip(g) {
                        *w -= lr * gi;
                    }
                }
                OptimizerKind::Adam => {
                    let lr_t = lr * (1.0 - ADAM_BETA2.powi(t)).sqrt() / (1.0 - ADAM_BETA1.powi(t));
                    let mut m = self.slots.remove(&("m", id)).unwrap_or_else(|| vec![0.0; n]);
                    let mut v = self.slots.remove(&("v", id)).unwrap_or_else(|| vec![0.0; n]);
                    for i in 0..n {
                        m[i] = ADAM_BETA1 * m[i] + (1.0 - ADAM_BETA1) * g[i];
                        v[i] = ADAM_BETA2 * v[i] + (1.0 - ADAM_BETA2) * g[i] * g[i];
                        p[i] -= lr_t * m[i] / (v[i].sqrt() + ADAM_EPSILON);
                    }
                    self.slots.insert(("m", id), m);
                    self.slots.insert(("v", id), v);
                }
                OptimizerKind::RmsProp => {
                    let ms = self.slots.entry(("ms", id)).or_insert_with(|| vec![1.0; n]);
                    for i in 0..n {
                        ms[i] = RMSPROP_DECAY * ms[i] + (1.0 - RMSPROP_DECAY) * g[i] * g[i];
                        p[i] -= lr * g[i] / (ms[i] + RMSPROP_EPSILON).sqrt();
                    }
                }
            }
        }
        Ok(())
    }

    /// Slot tensors named `opt.<slot>.<param name>`, shaped like their
    /// parameter, in parameter order.
    pub fn export_slots(&self, params: &ParamStore) -> Vec<(String, Tensor)> {
        let mut out = Vec::new();
        for (id, name, value) in params.iter() {
            for slot in self.slot_names() {
                if let Some(data) = self.slots.get(&(*slot, id)) {
                    out.push((
                        format!("opt.{}.{}", slot, name),
                        Tensor::new(data.clone(), value.shape().clone()),
                    ));
                }
            }
        }
        out
    }

    /// Restore one slot tensor written by [`Optimizer::export_slots`].
    /// Returns false when `name` is not a slot of this optimizer.
    pub fn import_slot(&mut self, name: &str, tensor: Tensor, params: &ParamStore) -> Result<bool> {
        let Some(rest) = name.strip_prefix("opt.") else {
            return Ok(false);
        };
        let Some((slot, param)) = rest.split_once('.') else {
            return Ok(false);
        };
        let Some(slot) = self.slot_names().iter().find(|s| **s == slot) else {
            return Ok(false);
        };
        let id = params
            .id(param)
            .ok_or_else(|| ModelError::TensorNotFound(param.to_string()))?;
        let expected: &Shape = params.get(id).shape();
        if tensor.shape() != expected {
            return Err(ModelError::Other(format!(
                "slot {} has shape {}, parameter has {}",
                name,
                tensor.shape(),
                expected
            )));
        }
        self.slots.insert((*slot, id), tensor.into_data());
        Ok(true)
    }

    pub fn set_step(&mut self, step: u64) {
        self.step = step;
    }
}
