use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::activation::activation::ActivationFunction;
use crate::layers::dense::Layer;
use crate::model::parameter::Parameter;
use crate::model::wave_field::WaveField;
use crate::model::WaveModel;

/// Reference wave model: a GELU trunk lifting the flattened geology grid into
/// a latent vector, followed by one linear projection head per component.
///
/// It honours the same contract an FFNO_3D implementation would, which is all
/// the trainer relies on.
#[derive(Debug)]
pub struct DenseWaveModel {
    trunk: Vec<Layer>,
    head_e: Layer,
    head_n: Layer,
    head_z: Layer,
    training: bool,
}

impl DenseWaveModel {
    /// Builds a model with one trunk layer per entry of `hidden`.
    ///
    /// Replicas built from the same `seed` start from identical weights.
    pub fn new(input_len: usize, output_len: usize, hidden: &[usize], seed: u64) -> DenseWaveModel {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut trunk = Vec::with_capacity(hidden.len());
        let mut fan_in = input_len;
        for (i, &width) in hidden.iter().enumerate() {
            trunk.push(Layer::new(
                &format!("trunk.{i}"),
                width,
                fan_in,
                ActivationFunction::Gelu,
                &mut rng,
            ));
            fan_in = width;
        }
        let mut head = |name: &str| {
            Layer::new(name, output_len, fan_in, ActivationFunction::Identity, &mut rng)
        };
        let head_e = head("head_e");
        let head_n = head("head_n");
        let head_z = head("head_z");

        DenseWaveModel {
            trunk,
            head_e,
            head_n,
            head_z,
            training: true,
        }
    }

    fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.trunk
            .iter()
            .chain([&self.head_e, &self.head_n, &self.head_z])
    }
}

impl WaveModel for DenseWaveModel {
    fn forward(&mut self, input: &[f64]) -> WaveField {
        let mut latent = input.to_vec();
        for layer in &mut self.trunk {
            latent = layer.feed_from(&latent);
        }
        WaveField::new(
            self.head_e.feed_from(&latent),
            self.head_n.feed_from(&latent),
            self.head_z.feed_from(&latent),
        )
    }

    fn backward(&mut self, grad_output: &WaveField) {
        let from_e = self.head_e.backward(&grad_output.e);
        let from_n = self.head_n.backward(&grad_output.n);
        let from_z = self.head_z.backward(&grad_output.z);
        let mut grad: Vec<f64> = from_e
            .iter()
            .zip(from_n.iter())
            .zip(from_z.iter())
            .map(|((e, n), z)| e + n + z)
            .collect();

        for layer in self.trunk.iter_mut().rev() {
            grad = layer.backward(&grad);
        }
    }

    fn parameters(&self) -> Vec<&Parameter> {
        self.layers()
            .flat_map(|l| [&l.weights, &l.biases])
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.trunk
            .iter_mut()
            .chain([&mut self.head_e, &mut self.head_n, &mut self.head_z])
            .flat_map(|l| [&mut l.weights, &mut l.biases])
            .collect()
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}
