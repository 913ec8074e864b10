pub mod adam;
pub mod plateau;

pub use adam::Adam;
pub use plateau::ReduceLrOnPlateau;

use crate::model::parameter::Parameter;

/// First-order update rule applied after the gradients were synchronised.
pub trait Optimizer: Send {
    /// Updates every parameter from its accumulated `grad`.
    fn step(&mut self, params: Vec<&mut Parameter>);

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);
}
