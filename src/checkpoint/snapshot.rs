use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::checkpoint::history::LossHistory;
use crate::error::Result;
use crate::model::parameter::ModelState;

/// Resume point written by the leader every few epochs.
///
/// `epochs_run` is the index of the last epoch whose train and validation
/// phases both completed; a resumed run starts its loop there. The loss
/// history covers epochs `0..=epochs_run` of every process that ran them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "MODEL_STATE")]
    pub model_state: ModelState,
    #[serde(rename = "EPOCHS_RUN")]
    pub epochs_run: usize,
    #[serde(rename = "LOSS_HISTORY")]
    pub loss_history: LossHistory,
}

impl Snapshot {
    pub fn save(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Snapshot> {
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(reader)?)
    }
}
