use crate::activation::activation::ActivationFunction;
use crate::math::matrix::Matrix;
use crate::model::parameter::Parameter;
use rand::Rng;

/// Fully-connected layer `a = σ(xW + b)` over a single sample.
///
/// Gradients are accumulated into the parameters' `grad` buffers, so several
/// samples of one batch can be back-propagated before a single optimizer step.
#[derive(Debug)]
pub struct Layer {
    pub size: usize,
    pub weights: Parameter,
    pub biases: Parameter,
    pub activator: ActivationFunction,
    input: Matrix,
    pre_neurons: Matrix, // z = xW + b, needed for σ'(z)
}

impl Layer {
    pub fn new<R: Rng>(
        name: &str,
        size: usize,
        input_size: usize,
        activation: ActivationFunction,
        rng: &mut R,
    ) -> Layer {
        Layer {
            size,
            weights: Parameter::new(format!("{name}.weight"), Matrix::xavier(input_size, size, rng)),
            biases: Parameter::new(format!("{name}.bias"), Matrix::zeros(1, size)),
            activator: activation,
            input: Matrix::zeros(1, input_size),
            pre_neurons: Matrix::zeros(1, size),
        }
    }

    pub fn feed_from(&mut self, input: &[f64]) -> Vec<f64> {
        let x = Matrix::row(input);
        let mut z = &x * &self.weights.value;
        z.add_assign(&self.biases.value);
        let a = z.map(|v| self.activator.function(v));
        self.input = x;
        self.pre_neurons = z;
        a.data
    }

    /// Back-propagates `∂L/∂a` for the most recent `feed_from` call.
    ///
    /// Adds `xᵀδ` and `δ` to the weight and bias gradients and returns
    /// `∂L/∂x` for the previous layer.
    pub fn backward(&mut self, grad_activation: &[f64]) -> Vec<f64> {
        let act_derivative = self.pre_neurons.map(|z| self.activator.derivative(z));
        let delta = Matrix::row(grad_activation).hadamard(&act_derivative);

        self.weights.grad.add_assign(&(&self.input.transpose() * &delta));
        self.biases.grad.add_assign(&delta);

        (&delta * &self.weights.value.transpose()).data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn loss(layer: &mut Layer, x: &[f64]) -> f64 {
        layer.feed_from(x).iter().map(|v| 0.5 * v * v).sum()
    }

    #[test]
    fn weight_gradient_matches_finite_difference() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut layer = Layer::new("l0", 3, 4, ActivationFunction::Gelu, &mut rng);
        let x = [0.2, -0.5, 1.1, 0.05];

        let out = layer.feed_from(&x);
        layer.backward(&out);
        let analytic = layer.weights.grad.data[5];

        let h = 1e-6;
        layer.weights.value.data[5] += h;
        let plus = loss(&mut layer, &x);
        layer.weights.value.data[5] -= 2.0 * h;
        let minus = loss(&mut layer, &x);
        let numeric = (plus - minus) / (2.0 * h);

        assert!((numeric - analytic).abs() < 1e-6, "{numeric} vs {analytic}");
    }

    #[test]
    fn gradients_accumulate_across_samples() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut layer = Layer::new("l0", 2, 2, ActivationFunction::Identity, &mut rng);
        layer.feed_from(&[1.0, 0.0]);
        layer.backward(&[1.0, 1.0]);
        layer.feed_from(&[1.0, 0.0]);
        layer.backward(&[1.0, 1.0]);
        assert_eq!(layer.biases.grad.data, vec![2.0, 2.0]);
        assert_eq!(layer.weights.grad.data, vec![2.0, 2.0, 0.0, 0.0]);
    }
}
