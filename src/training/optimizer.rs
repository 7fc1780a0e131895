//! Adam optimizer with checkpointable state
//!
//! One instance is built per network over that network's `VarMap`. A step
//! only touches the variables it was built with, so the generator optimizer
//! can never move discriminator weights and vice versa.

use std::collections::HashMap;
use std::path::Path;

use candle_core::backprop::GradStore;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::VarMap;

use crate::error::{Error, Result};

/// Adam hyperparameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamParams {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
}

impl Default for AdamParams {
    fn default() -> Self {
        // GAN defaults
        Self {
            lr: 2e-4,
            beta1: 0.5,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

/// Serializable optimizer state: step count plus first and second moments.
///
/// Moments are keyed `{var}.m` and `{var}.v`.
#[derive(Debug, Clone)]
pub struct OptimizerState {
    pub step: usize,
    pub moments: HashMap<String, Tensor>,
}

impl OptimizerState {
    /// Write the moments as safetensors; the step count is stored by the caller
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        candle_core::safetensors::save(&self.moments, path)?;
        Ok(())
    }

    /// Read moments written by `save`
    pub fn load(path: impl AsRef<Path>, step: usize, device: &Device) -> Result<Self> {
        let moments = candle_core::safetensors::load(path, device)?;
        Ok(Self { step, moments })
    }
}

/// Adam with bias correction
pub struct Adam {
    vars: Vec<(String, Var)>,
    first_moments: Vec<Tensor>,
    second_moments: Vec<Tensor>,
    step: usize,
    params: AdamParams,
}

impl Adam {
    /// Create an optimizer over every variable in `varmap`
    pub fn new(varmap: &VarMap, params: AdamParams) -> Result<Self> {
        let mut vars: Vec<(String, Var)> = varmap
            .data()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));

        let first_moments = vars
            .iter()
            .map(|(_, v)| v.zeros_like())
            .collect::<candle_core::Result<Vec<_>>>()?;
        let second_moments = first_moments.clone();

        Ok(Self {
            vars,
            first_moments,
            second_moments,
            step: 0,
            params,
        })
    }

    /// Backpropagate `loss` and apply one update to this optimizer's variables
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = loss.backward()?;
        self.step(&grads)
    }

    /// Apply one update using precomputed gradients.
    ///
    /// Variables with no gradient in `grads` keep their value and moments.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.step += 1;
        let AdamParams {
            lr,
            beta1,
            beta2,
            eps,
        } = self.params;
        let correction1 = 1.0 - beta1.powi(self.step as i32);
        let correction2 = 1.0 - beta2.powi(self.step as i32);

        for (i, (_, var)) in self.vars.iter().enumerate() {
            let Some(grad) = grads.get(var.as_tensor()) else {
                continue;
            };
            let grad = grad.detach();

            let m = (self.first_moments[i].affine(beta1, 0.0)? + grad.affine(1.0 - beta1, 0.0)?)?;
            let v = (self.second_moments[i].affine(beta2, 0.0)?
                + grad.sqr()?.affine(1.0 - beta2, 0.0)?)?;

            let m_hat = m.affine(1.0 / correction1, 0.0)?;
            let v_hat = v.affine(1.0 / correction2, 0.0)?;
            let update = m_hat.div(&v_hat.sqrt()?.affine(1.0, eps)?)?;

            let next = var.as_tensor().detach().sub(&update.affine(lr, 0.0)?)?;
            var.set(&next)?;

            self.first_moments[i] = m;
            self.second_moments[i] = v;
        }

        Ok(())
    }

    /// Current state, suitable for checkpointing
    pub fn state(&self) -> OptimizerState {
        let mut moments = HashMap::with_capacity(self.vars.len() * 2);
        for (i, (name, _)) in self.vars.iter().enumerate() {
            moments.insert(format!("{name}.m"), self.first_moments[i].clone());
            moments.insert(format!("{name}.v"), self.second_moments[i].clone());
        }

        OptimizerState {
            step: self.step,
            moments,
        }
    }

    /// Replace the step count and moments with a saved state.
    ///
    /// Every variable must have both moments with a matching shape.
    pub fn load_state(&mut self, state: &OptimizerState) -> Result<()> {
        let mut first = Vec::with_capacity(self.vars.len());
        let mut second = Vec::with_capacity(self.vars.len());

        for (name, var) in &self.vars {
            for (suffix, out) in [("m", &mut first), ("v", &mut second)] {
                let key = format!("{name}.{suffix}");
                let moment = state
                    .moments
                    .get(&key)
                    .ok_or_else(|| Error::Config(format!("optimizer state is missing {key}")))?;
                if moment.shape() != var.shape() {
                    return Err(Error::Config(format!(
                        "optimizer moment {key} has shape {:?}, expected {:?}",
                        moment.dims(),
                        var.dims()
                    )));
                }
                out.push(moment.to_dtype(DType::F32)?.to_device(var.device())?);
            }
        }

        self.first_moments = first;
        self.second_moments = second;
        self.step = state.step;
        Ok(())
    }

    /// Number of updates applied so far
    pub fn step_count(&self) -> usize {
        self.step
    }
}
