use crate::model::parameter::Parameter;
use crate::optim::Optimizer;

/// Adam with bias correction.
///
/// Moment buffers are allocated on the first step and indexed by parameter
/// position, so the parameter list must keep the same order between steps.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    weight_decay: f64,
    step: u64,
    m: Vec<Vec<f64>>,
    v: Vec<Vec<f64>>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Adam {
        Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.0,
            step: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    pub fn with_betas(mut self, beta1: f64, beta2: f64) -> Adam {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    /// L2 penalty folded into the gradient before the moment update.
    pub fn with_weight_decay(mut self, weight_decay: f64) -> Adam {
        self.weight_decay = weight_decay;
        self
    }

    pub fn steps_taken(&self) -> u64 {
        self.step
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: Vec<&mut Parameter>) {
        if self.m.len() != params.len() {
            self.m = params.iter().map(|p| vec![0.0; p.numel()]).collect();
            self.v = params.iter().map(|p| vec![0.0; p.numel()]).collect();
        }
        self.step += 1;
        let t = self.step as i32;
        let bias1 = 1.0 - self.beta1.powi(t);
        let bias2 = 1.0 - self.beta2.powi(t);

        for ((param, m), v) in params.into_iter().zip(self.m.iter_mut()).zip(self.v.iter_mut()) {
            let values = param.value.data.iter_mut();
            let grads = param.grad.data.iter();
            for (((w, g), m), v) in values.zip(grads).zip(m.iter_mut()).zip(v.iter_mut()) {
                let g = g + self.weight_decay * *w;
                *m = self.beta1 * *m + (1.0 - self.beta1) * g;
                *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *w -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
            }
        }
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::matrix::Matrix;

    #[test]
    fn first_step_moves_each_weight_by_lr_against_gradient_sign() {
        let mut p = Parameter::new("w", Matrix::row(&[1.0, -1.0, 0.5]));
        p.grad = Matrix::row(&[2.0, -3.0, 0.0]);
        let mut adam = Adam::new(0.1);
        adam.step(vec![&mut p]);

        // Bias-corrected first step is lr · sign(g).
        assert!((p.value.data[0] - 0.9).abs() < 1e-6);
        assert!((p.value.data[1] + 0.9).abs() < 1e-6);
        assert_eq!(p.value.data[2], 0.5);
        assert_eq!(adam.steps_taken(), 1);
    }

    #[test]
    fn minimises_a_quadratic() {
        let mut p = Parameter::new("w", Matrix::row(&[5.0]));
        let mut adam = Adam::new(0.1);
        for _ in 0..500 {
            p.grad.data[0] = 2.0 * p.value.data[0];
            adam.step(vec![&mut p]);
        }
        assert!(p.value.data[0].abs() < 0.05);
    }

    #[test]
    fn learning_rate_is_adjustable() {
        let mut adam = Adam::new(6e-4);
        adam.set_learning_rate(3e-4);
        assert_eq!(adam.learning_rate(), 3e-4);
    }
}
