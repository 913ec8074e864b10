use crate::loss::l1::EPS;

/// L2 terms of the wave loss, over one channel of one sample.
pub struct L2Loss;

impl L2Loss {
    /// mean((p - t)²)
    pub fn absolute(predicted: &[f64], expected: &[f64]) -> f64 {
        let n = predicted.len().max(1) as f64;
        predicted
            .iter()
            .zip(expected.iter())
            .map(|(p, t)| (p - t).powi(2))
            .sum::<f64>()
            / n
    }

    /// ‖p - t‖₂ / ‖t‖₂
    pub fn relative(predicted: &[f64], expected: &[f64]) -> f64 {
        Self::residual_norm(predicted, expected) / Self::scale(expected)
    }

    /// ∂relative/∂p: (p - t) / (‖p - t‖₂ · ‖t‖₂), zero at an exact fit.
    pub fn relative_derivative(predicted: &[f64], expected: &[f64]) -> Vec<f64> {
        let norm = Self::residual_norm(predicted, expected);
        if norm == 0.0 {
            return vec![0.0; predicted.len()];
        }
        let denom = norm * Self::scale(expected);
        predicted
            .iter()
            .zip(expected.iter())
            .map(|(p, t)| (p - t) / denom)
            .collect()
    }

    fn residual_norm(predicted: &[f64], expected: &[f64]) -> f64 {
        predicted
            .iter()
            .zip(expected.iter())
            .map(|(p, t)| (p - t).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    fn scale(expected: &[f64]) -> f64 {
        expected.iter().map(|t| t * t).sum::<f64>().sqrt().max(EPS)
    }
}
