pub mod dense_wave;
pub mod distributed;
pub mod parameter;
pub mod wave_field;

pub use dense_wave::DenseWaveModel;
pub use distributed::DistributedModel;
pub use parameter::{ModelState, Parameter};
pub use wave_field::WaveField;

use crate::error::{Result, TrainError};

/// Contract the trainer needs from a wave model.
///
/// `backward` refers to the most recent `forward`: implementations may cache
/// activations of exactly one sample, so callers interleave the two calls.
pub trait WaveModel: Send {
    /// Maps one flattened input grid to the (E, N, Z) prediction.
    fn forward(&mut self, input: &[f64]) -> WaveField;

    /// Accumulates parameter gradients for `∂L/∂output` of the last forward.
    fn backward(&mut self, grad_output: &WaveField);

    fn parameters(&self) -> Vec<&Parameter>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;

    fn set_training(&mut self, training: bool);

    fn is_training(&self) -> bool;

    fn zero_grad(&mut self) {
        for p in self.parameters_mut() {
            p.grad.fill(0.0);
        }
    }

    fn state_dict(&self) -> ModelState {
        self.parameters()
            .into_iter()
            .map(|p| (p.name.clone(), p.value.data.clone()))
            .collect()
    }

    /// Restores every parameter by name. Missing names or length mismatches
    /// leave the model untouched and return `StateMismatch`.
    fn load_state_dict(&mut self, state: &ModelState) -> Result<()> {
        for p in self.parameters() {
            match state.get(&p.name) {
                None => {
                    return Err(TrainError::StateMismatch(format!(
                        "missing parameter `{}`",
                        p.name
                    )))
                }
                Some(values) if values.len() != p.numel() => {
                    return Err(TrainError::StateMismatch(format!(
                        "parameter `{}` has {} values, expected {}",
                        p.name,
                        values.len(),
                        p.numel()
                    )))
                }
                Some(_) => {}
            }
        }
        for p in self.parameters_mut() {
            p.value.data.copy_from_slice(&state[&p.name]);
        }
        Ok(())
    }
}
