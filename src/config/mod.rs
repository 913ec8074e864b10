pub mod args;
pub mod train_config;

pub use args::Args;
pub use train_config::TrainConfig;
