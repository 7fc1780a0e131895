//! Training state and its detached snapshots
//!
//! `TrainingState` is the live, mutable state owned by the training loop.
//! A `StateSnapshot` is a deep copy taken at a step boundary; it shares no
//! storage with the live parameters, so it can be written while training
//! continues.

use std::collections::HashMap;

use candle_core::Tensor;
use candle_nn::VarMap;

use super::optimizer::{Adam, AdamParams, OptimizerState};
use crate::error::{Error, Result};
use crate::model::Dcgan;

/// Everything needed to resume training
pub struct TrainingState {
    /// Number of completed epochs
    pub epoch: usize,
    pub gan: Dcgan,
    pub gen_opt: Adam,
    pub disc_opt: Adam,
}

impl TrainingState {
    /// Fresh state at epoch 0 with one optimizer per network
    pub fn new(gan: Dcgan, gen_params: AdamParams, disc_params: AdamParams) -> Result<Self> {
        let gen_opt = Adam::new(gan.generator_vars(), gen_params)?;
        let disc_opt = Adam::new(gan.discriminator_vars(), disc_params)?;
        Ok(Self {
            epoch: 0,
            gan,
            gen_opt,
            disc_opt,
        })
    }

    /// Deep copy of parameters and optimizer state.
    ///
    /// `step` is 0 at an epoch boundary and counts completed steps of the
    /// running epoch otherwise.
    pub fn snapshot(&self, step: usize) -> Result<StateSnapshot> {
        Ok(StateSnapshot {
            epoch: self.epoch,
            step,
            generator: export_vars(self.gan.generator_vars())?,
            discriminator: export_vars(self.gan.discriminator_vars())?,
            generator_optimizer: self.gen_opt.state(),
            discriminator_optimizer: self.disc_opt.state(),
        })
    }

    /// Overwrite parameters, optimizer state and epoch from a snapshot
    pub fn restore(&mut self, snapshot: &StateSnapshot) -> Result<()> {
        import_vars(self.gan.generator_vars(), &snapshot.generator)?;
        import_vars(self.gan.discriminator_vars(), &snapshot.discriminator)?;
        self.gen_opt.load_state(&snapshot.generator_optimizer)?;
        self.disc_opt.load_state(&snapshot.discriminator_optimizer)?;
        self.epoch = snapshot.epoch;
        Ok(())
    }
}

/// Immutable copy of a `TrainingState`
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub epoch: usize,
    pub step: usize,
    pub generator: HashMap<String, Tensor>,
    pub discriminator: HashMap<String, Tensor>,
    pub generator_optimizer: OptimizerState,
    pub discriminator_optimizer: OptimizerState,
}

fn export_vars(varmap: &VarMap) -> Result<HashMap<String, Tensor>> {
    let vars = varmap.data().lock().unwrap_or_else(|e| e.into_inner());
    let mut out = HashMap::with_capacity(vars.len());
    for (name, var) in vars.iter() {
        // Var::set writes in place, so a plain clone would alias live storage
        out.insert(name.clone(), var.as_tensor().copy()?);
    }
    Ok(out)
}

fn import_vars(varmap: &VarMap, tensors: &HashMap<String, Tensor>) -> Result<()> {
    let vars = varmap.data().lock().unwrap_or_else(|e| e.into_inner());
    if vars.len() != tensors.len() {
        return Err(Error::Config(format!(
            "expected {} parameters, snapshot has {}",
            vars.len(),
            tensors.len()
        )));
    }

    // validate everything before touching any variable
    let mut updates = Vec::with_capacity(vars.len());
    for (name, var) in vars.iter() {
        let tensor = tensors
            .get(name)
            .ok_or_else(|| Error::Config(format!("snapshot is missing parameter {name}")))?;
        if tensor.shape() != var.shape() {
            return Err(Error::Config(format!(
                "parameter {name} has shape {:?}, expected {:?}",
                tensor.dims(),
                var.dims()
            )));
        }
        updates.push((var, tensor.to_dtype(var.dtype())?.to_device(var.device())?));
    }

    for (var, tensor) in updates {
        var.set(&tensor)?;
    }
    Ok(())
}
