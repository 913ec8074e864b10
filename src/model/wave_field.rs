use serde::{Deserialize, Serialize};

/// The three recorded wave components over the output grid and time axis,
/// each flattened as `S_out × S_out × T_out`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveField {
    pub e: Vec<f64>,
    pub n: Vec<f64>,
    pub z: Vec<f64>,
}

impl WaveField {
    pub fn new(e: Vec<f64>, n: Vec<f64>, z: Vec<f64>) -> WaveField {
        WaveField { e, n, z }
    }

    pub fn zeros(len: usize) -> WaveField {
        WaveField::new(vec![0.0; len], vec![0.0; len], vec![0.0; len])
    }

    /// Channels in E, N, Z order.
    pub fn channels(&self) -> [&[f64]; 3] {
        [&self.e, &self.n, &self.z]
    }

    pub fn channels_mut(&mut self) -> [&mut Vec<f64>; 3] {
        [&mut self.e, &mut self.n, &mut self.z]
    }

    /// Length of each channel, or `None` when the channels disagree.
    pub fn channel_len(&self) -> Option<usize> {
        let len = self.e.len();
        (self.n.len() == len && self.z.len() == len).then_some(len)
    }
}
