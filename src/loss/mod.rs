pub mod criterion;
pub mod l1;
pub mod l2;

pub use criterion::{loss_criterion, relative_loss_gradient, sample_loss, LossWeights};
pub use l1::L1Loss;
pub use l2::L2Loss;
