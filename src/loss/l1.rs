/// L1 terms of the wave loss, over one channel of one sample.
pub struct L1Loss;

/// Floor for the target magnitude in relative losses.
pub(crate) const EPS: f64 = 1e-12;

impl L1Loss {
    /// mean(|p - t|)
    pub fn absolute(predicted: &[f64], expected: &[f64]) -> f64 {
        let n = predicted.len().max(1) as f64;
        predicted
            .iter()
            .zip(expected.iter())
            .map(|(p, t)| (p - t).abs())
            .sum::<f64>()
            / n
    }

    /// Σ|p - t| / Σ|t|
    pub fn relative(predicted: &[f64], expected: &[f64]) -> f64 {
        let num: f64 = predicted
            .iter()
            .zip(expected.iter())
            .map(|(p, t)| (p - t).abs())
            .sum();
        num / Self::scale(expected)
    }

    /// ∂relative/∂p: sign(p - t) / Σ|t|  (0 when equal)
    pub fn relative_derivative(predicted: &[f64], expected: &[f64]) -> Vec<f64> {
        let scale = Self::scale(expected);
        predicted
            .iter()
            .zip(expected.iter())
            .map(|(p, t)| {
                let diff = p - t;
                if diff > 0.0 {
                    1.0 / scale
                } else if diff < 0.0 {
                    -1.0 / scale
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn scale(expected: &[f64]) -> f64 {
        expected.iter().map(|t| t.abs()).sum::<f64>().max(EPS)
    }
}
