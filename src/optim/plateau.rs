/// Reduce-on-plateau learning-rate policy, minimising the watched metric.
///
/// An epoch counts as an improvement when the metric beats the best seen so
/// far by the relative `threshold`. After more than `patience` epochs without
/// improvement the learning rate is multiplied by `factor`.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    factor: f64,
    patience: usize,
    threshold: f64,
    min_lr: f64,
    eps: f64,
    best: f64,
    num_bad_epochs: usize,
    lr: f64,
}

impl ReduceLrOnPlateau {
    pub fn new(initial_lr: f64, factor: f64, patience: usize) -> ReduceLrOnPlateau {
        assert!(factor > 0.0 && factor < 1.0, "factor must lie in (0, 1)");
        ReduceLrOnPlateau {
            factor,
            patience,
            threshold: 1e-4,
            min_lr: 0.0,
            eps: 1e-8,
            best: f64::INFINITY,
            num_bad_epochs: 0,
            lr: initial_lr,
        }
    }

    pub fn with_min_lr(mut self, min_lr: f64) -> ReduceLrOnPlateau {
        self.min_lr = min_lr;
        self
    }

    /// Feeds one epoch's metric. Returns the new learning rate when it was
    /// reduced.
    pub fn step(&mut self, metric: f64) -> Option<f64> {
        if metric < self.best * (1.0 - self.threshold) {
            self.best = metric;
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }

        if self.num_bad_epochs > self.patience {
            self.num_bad_epochs = 0;
            let new_lr = (self.lr * self.factor).max(self.min_lr);
            if self.lr - new_lr > self.eps {
                self.lr = new_lr;
                return Some(new_lr);
            }
        }
        None
    }

    pub fn learning_rate(&self) -> f64 {
        self.lr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves_after_patience_plus_one_stagnant_epochs() {
        let mut sched = ReduceLrOnPlateau::new(0.0006, 0.5, 10);
        assert_eq!(sched.step(1.0), None);
        for _ in 0..10 {
            assert_eq!(sched.step(1.0), None);
        }
        assert_eq!(sched.step(1.0), Some(0.0003));
        assert_eq!(sched.learning_rate(), 0.0003);
    }

    #[test]
    fn improvement_resets_the_count() {
        let mut sched = ReduceLrOnPlateau::new(1.0, 0.5, 2);
        sched.step(1.0);
        sched.step(1.0);
        sched.step(1.0);
        sched.step(0.5);
        sched.step(0.5);
        sched.step(0.5);
        assert_eq!(sched.learning_rate(), 1.0);
        assert_eq!(sched.step(0.5), Some(0.5));
    }

    #[test]
    fn tiny_gains_below_threshold_do_not_count() {
        let mut sched = ReduceLrOnPlateau::new(1.0, 0.5, 1);
        sched.step(1.0);
        sched.step(0.99999);
        assert_eq!(sched.step(0.99998), Some(0.5));
    }

    #[test]
    fn respects_min_lr() {
        let mut sched = ReduceLrOnPlateau::new(1e-3, 0.5, 0).with_min_lr(1e-3);
        sched.step(1.0);
        assert_eq!(sched.step(1.0), None);
        assert_eq!(sched.learning_rate(), 1e-3);
    }
}
