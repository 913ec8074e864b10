pub mod history;
pub mod rotating;
pub mod snapshot;
pub mod store;

pub use history::LossHistory;
pub use rotating::RotatingArtifactStore;
pub use snapshot::Snapshot;
pub use store::{ArtifactLayout, CheckpointStore};
