use std::sync::Arc;

use tracing::debug;

use crate::dist::Communicator;
use crate::error::Result;
use crate::model::parameter::{ModelState, Parameter};
use crate::model::wave_field::WaveField;
use crate::model::WaveModel;

/// Data-parallel replica of a [`WaveModel`].
///
/// Wrapping broadcasts rank 0's parameters to the group, so any state must
/// be loaded into the bare model before calling [`DistributedModel::wrap`].
/// After that, [`DistributedModel::sync_gradients`] averages gradients
/// across replicas once per batch, keeping the replicas identical.
pub struct DistributedModel<M> {
    module: M,
    comm: Arc<dyn Communicator>,
}

impl<M: WaveModel> DistributedModel<M> {
    pub fn wrap(mut module: M, comm: Arc<dyn Communicator>) -> Result<DistributedModel<M>> {
        let mut flat = flatten(module.parameters(), |p| &p.value.data);
        comm.broadcast(&mut flat, 0)?;
        scatter(module.parameters_mut(), &flat, |p| &mut p.value.data);
        debug!(rank = comm.rank(), values = flat.len(), "replica parameters synchronised");
        Ok(DistributedModel { module, comm })
    }

    pub fn forward(&mut self, input: &[f64]) -> WaveField {
        self.module.forward(input)
    }

    pub fn backward(&mut self, grad_output: &WaveField) {
        self.module.backward(grad_output)
    }

    pub fn zero_grad(&mut self) {
        self.module.zero_grad()
    }

    pub fn set_training(&mut self, training: bool) {
        self.module.set_training(training)
    }

    /// Blocking all-reduce (mean) of every gradient. Every rank must call it
    /// the same number of times per epoch.
    pub fn sync_gradients(&mut self) -> Result<()> {
        if self.comm.world_size() == 1 {
            return Ok(());
        }
        let mut flat = flatten(self.module.parameters(), |p| &p.grad.data);
        self.comm.all_reduce_mean(&mut flat)?;
        scatter(self.module.parameters_mut(), &flat, |p| &mut p.grad.data);
        Ok(())
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.module.parameters_mut()
    }

    /// State of the bare model, with unprefixed parameter names.
    pub fn state_dict(&self) -> ModelState {
        self.module.state_dict()
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    pub fn into_inner(self) -> M {
        self.module
    }
}

fn flatten<'a, F>(params: Vec<&'a Parameter>, field: F) -> Vec<f64>
where
    F: Fn(&'a Parameter) -> &'a Vec<f64>,
{
    let total = params.iter().map(|p| p.numel()).sum();
    let mut flat = Vec::with_capacity(total);
    for p in params {
        flat.extend_from_slice(field(p));
    }
    flat
}

fn scatter<'a, F>(params: Vec<&'a mut Parameter>, flat: &[f64], field: F)
where
    F: Fn(&'a mut Parameter) -> &'a mut Vec<f64>,
{
    let mut offset = 0;
    for p in params {
        let dst = field(p);
        let n = dst.len();
        dst.copy_from_slice(&flat[offset..offset + n]);
        offset += n;
    }
}
