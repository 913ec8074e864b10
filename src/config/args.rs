use std::path::PathBuf;

use clap::Parser;

use crate::config::train_config::TrainConfig;
use crate::error::{Result, TrainError};
use crate::loss::LossWeights;

/// Command line of the `ffno-train` binary. Option names follow the
/// launcher scripts already in use, hence the mixed case.
#[derive(Debug, Clone, Parser)]
#[command(name = "ffno-train")]
#[command(about = "Data-parallel training of a 3D Fourier neural operator for seismic wave fields")]
#[command(version)]
pub struct Args {
    /// Size of the spatial input grid
    #[arg(long = "S_in", default_value_t = 32)]
    pub s_in: usize,

    /// Depth of the spatial input grid
    #[arg(long = "S_in_z", default_value_t = 32)]
    pub s_in_z: usize,

    /// Size of the spatial output grid
    #[arg(long = "S_out", default_value_t = 32)]
    pub s_out: usize,

    /// Number of time steps
    #[arg(long = "T_out", default_value_t = 320)]
    pub t_out: usize,

    /// Number of training samples
    #[arg(long = "Ntrain", default_value_t = 27000)]
    pub ntrain: usize,

    /// Number of validation samples
    #[arg(long = "Nval", default_value_t = 3000)]
    pub nval: usize,

    /// Samples per batch on each rank
    #[arg(long = "batch_size", default_value_t = 16)]
    pub batch_size: usize,

    #[arg(long = "epochs", default_value_t = 350)]
    pub epochs: usize,

    /// Number of channels after the lifting
    #[arg(long = "dv", default_value_t = 16)]
    pub dv: usize,

    /// Dimensions along the 1st axis after each block
    #[arg(long = "list_D1", num_args = 1.., default_values_t = [32, 32, 32, 32])]
    pub list_d1: Vec<usize>,

    /// Dimensions along the 2nd axis after each block
    #[arg(long = "list_D2", num_args = 1.., default_values_t = [32, 32, 32, 32])]
    pub list_d2: Vec<usize>,

    /// Dimensions along the 3rd axis after each block
    #[arg(long = "list_D3", num_args = 1.., default_values_t = [64, 128, 256, 320])]
    pub list_d3: Vec<usize>,

    /// Fourier modes along the 1st axis after each block
    #[arg(long = "list_M1", num_args = 1.., default_values_t = [16, 16, 16, 16])]
    pub list_m1: Vec<usize>,

    /// Fourier modes along the 2nd axis after each block
    #[arg(long = "list_M2", num_args = 1.., default_values_t = [16, 16, 16, 16])]
    pub list_m2: Vec<usize>,

    /// Fourier modes along the 3rd axis after each block
    #[arg(long = "list_M3", num_args = 1.., default_values_t = [16, 32, 32, 32])]
    pub list_m3: Vec<usize>,

    #[arg(long = "nlayers", default_value_t = 4)]
    pub nlayers: usize,

    /// Pixels of padding on each side of x and y
    #[arg(long = "padding", default_value_t = 0)]
    pub padding: usize,

    #[arg(long = "learning_rate", default_value_t = 0.0006)]
    pub learning_rate: f64,

    /// Weight of the L1 loss, then of the L2 loss
    #[arg(long = "loss_weights", num_args = 1.., default_values_t = [1.0, 0.0], allow_negative_numbers = true)]
    pub loss_weights: Vec<f64>,

    /// Folders with training data, relative to --data_root
    #[arg(long = "dir_data_train", num_args = 1.., default_values = ["inputs3D_S32_Z32_T320_fmax5_train"])]
    pub dir_data_train: Vec<String>,

    /// Folders with validation data, relative to --data_root
    #[arg(long = "dir_data_val", num_args = 1.., default_values = ["inputs3D_S32_Z32_T320_fmax5_val"])]
    pub dir_data_val: Vec<String>,

    /// Appended to the run name of every saved artifact
    #[arg(long = "additional_name", default_value = "")]
    pub additional_name: String,

    #[arg(long = "data_root", default_value = "./inputs", env = "FFNO_DATA_ROOT")]
    pub data_root: PathBuf,

    /// Root of the `models/` and `loss/` artifact folders
    #[arg(long = "log_dir", default_value = "./logs", env = "FFNO_LOG_DIR")]
    pub log_dir: PathBuf,

    #[arg(long = "snapshot_path", default_value = "snapshot.bin")]
    pub snapshot_path: PathBuf,

    /// Generate samples instead of reading the data folders
    #[arg(long = "synthetic")]
    pub synthetic: bool,

    #[arg(long = "seed", default_value_t = 0)]
    pub seed: u64,
}

impl TryFrom<Args> for TrainConfig {
    type Error = TrainError;

    fn try_from(args: Args) -> Result<TrainConfig> {
        let config = TrainConfig {
            s_in: args.s_in,
            s_in_z: args.s_in_z,
            s_out: args.s_out,
            t_out: args.t_out,
            ntrain: args.ntrain,
            nval: args.nval,
            batch_size: args.batch_size,
            epochs: args.epochs,
            dv: args.dv,
            list_d1: args.list_d1,
            list_d2: args.list_d2,
            list_d3: args.list_d3,
            list_m1: args.list_m1,
            list_m2: args.list_m2,
            list_m3: args.list_m3,
            nlayers: args.nlayers,
            padding: args.padding,
            learning_rate: args.learning_rate,
            loss_weights: LossWeights::from_slice(&args.loss_weights)?,
            dir_data_train: args.dir_data_train,
            dir_data_val: args.dir_data_val,
            additional_name: args.additional_name,
            data_root: args.data_root,
            log_dir: args.log_dir,
            snapshot_path: args.snapshot_path,
            synthetic: args.synthetic,
            seed: args.seed,
            ..TrainConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}
