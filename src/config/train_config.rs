use std::path::PathBuf;

use crate::data::GridDims;
use crate::error::{Result, TrainError};
use crate::loss::LossWeights;

/// Immutable settings of one training run, built once at startup.
///
/// Geometry, data and optimiser fields come from the command line; the
/// scheduling constants below `additional_name` keep their defaults unless a
/// caller overrides them programmatically.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub s_in: usize,
    pub s_in_z: usize,
    pub s_out: usize,
    pub t_out: usize,
    pub ntrain: usize,
    pub nval: usize,
    pub batch_size: usize,
    pub epochs: usize,
    pub dv: usize,
    pub list_d1: Vec<usize>,
    pub list_d2: Vec<usize>,
    pub list_d3: Vec<usize>,
    pub list_m1: Vec<usize>,
    pub list_m2: Vec<usize>,
    pub list_m3: Vec<usize>,
    pub nlayers: usize,
    pub padding: usize,
    pub learning_rate: f64,
    pub loss_weights: LossWeights,
    pub dir_data_train: Vec<String>,
    pub dir_data_val: Vec<String>,
    pub additional_name: String,

    pub data_root: PathBuf,
    pub log_dir: PathBuf,
    pub snapshot_path: PathBuf,
    /// Train on generated samples instead of reading `data_root`.
    pub synthetic: bool,
    /// Seeds model initialisation and the sampler shuffle.
    pub seed: u64,
    pub weight_decay: f64,
    pub lr_factor: f64,
    pub lr_patience: usize,
    pub early_stop_patience: usize,
    pub early_stop_min_delta: f64,
    /// Intermediate history and snapshot are written when `epoch % save_every == 0`.
    pub save_every: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            s_in: 32,
            s_in_z: 32,
            s_out: 32,
            t_out: 320,
            ntrain: 27000,
            nval: 3000,
            batch_size: 16,
            epochs: 350,
            dv: 16,
            list_d1: vec![32, 32, 32, 32],
            list_d2: vec![32, 32, 32, 32],
            list_d3: vec![64, 128, 256, 320],
            list_m1: vec![16, 16, 16, 16],
            list_m2: vec![16, 16, 16, 16],
            list_m3: vec![16, 32, 32, 32],
            nlayers: 4,
            padding: 0,
            learning_rate: 0.0006,
            loss_weights: LossWeights::new(1.0, 0.0),
            dir_data_train: vec!["inputs3D_S32_Z32_T320_fmax5_train".into()],
            dir_data_val: vec!["inputs3D_S32_Z32_T320_fmax5_val".into()],
            additional_name: String::new(),
            data_root: PathBuf::from("./inputs"),
            log_dir: PathBuf::from("./logs"),
            snapshot_path: PathBuf::from("snapshot.bin"),
            synthetic: false,
            seed: 0,
            weight_decay: 0.0,
            lr_factor: 0.5,
            lr_patience: 10,
            early_stop_patience: 60,
            early_stop_min_delta: 1e-4,
            save_every: 2,
        }
    }
}

impl TrainConfig {
    pub fn grid(&self) -> GridDims {
        GridDims {
            s_in: self.s_in,
            s_in_z: self.s_in_z,
            s_out: self.s_out,
            t_out: self.t_out,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("S_in", self.s_in),
            ("S_in_z", self.s_in_z),
            ("S_out", self.s_out),
            ("T_out", self.t_out),
            ("Ntrain", self.ntrain),
            ("Nval", self.nval),
            ("batch_size", self.batch_size),
            ("epochs", self.epochs),
            ("dv", self.dv),
            ("nlayers", self.nlayers),
            ("save_every", self.save_every),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(TrainError::Config(format!("{name} must be at least 1")));
        }

        let lists = [
            ("list_D1", &self.list_d1),
            ("list_D2", &self.list_d2),
            ("list_D3", &self.list_d3),
            ("list_M1", &self.list_m1),
            ("list_M2", &self.list_m2),
            ("list_M3", &self.list_m3),
        ];
        for (name, list) in lists {
            if list.len() != self.nlayers {
                return Err(TrainError::Config(format!(
                    "{name} has {} entries but nlayers is {}",
                    list.len(),
                    self.nlayers
                )));
            }
        }

        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TrainError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        LossWeights::from_slice(&[self.loss_weights.l1, self.loss_weights.l2])?;
        if !(self.lr_factor > 0.0 && self.lr_factor < 1.0) {
            return Err(TrainError::Config("lr_factor must lie in (0, 1)".into()));
        }
        if !self.synthetic && (self.dir_data_train.is_empty() || self.dir_data_val.is_empty()) {
            return Err(TrainError::Config("at least one train and one val directory is required".into()));
        }
        Ok(())
    }

    /// Run name used in every artifact path.
    pub fn name_config(&self) -> String {
        format!(
            "FFNO3D-dv{}-{}layers-S{}-T{}-padding{}-learningrate{}-L1loss{}-L2loss{}-Ntrain{}-batchsize{}{}",
            self.dv,
            self.nlayers,
            self.s_in,
            self.t_out,
            self.padding,
            float_tag(self.learning_rate),
            float_tag(self.loss_weights.l1),
            float_tag(self.loss_weights.l2),
            self.ntrain,
            self.batch_size,
            self.additional_name,
        )
    }
}

/// Float rendered for a file name: shortest round-trip digits, always with a
/// fractional part or an exponent, `.` spelled `p`.
fn float_tag(x: f64) -> String {
    format_float(x).replace('.', "p")
}

fn format_float(x: f64) -> String {
    if !x.is_finite() {
        return format!("{x}");
    }
    let abs = x.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let sci = format!("{x:e}");
        return match sci.split_once('e') {
            Some((mantissa, exp)) => {
                let (sign, digits) = match exp.strip_prefix('-') {
                    Some(d) => ('-', d),
                    None => ('+', exp),
                };
                format!("{mantissa}e{sign}{digits:0>2}")
            }
            None => sci,
        };
    }
    let plain = format!("{x}");
    if plain.contains('.') {
        plain
    } else {
        format!("{plain}.0")
    }
}
