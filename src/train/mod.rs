pub mod early_stopper;
pub mod epoch_stats;
pub mod running_average;
pub mod trainer;

pub use early_stopper::EarlyStopper;
pub use epoch_stats::EpochStats;
pub use running_average::RunningAverage;
pub use trainer::Trainer;
