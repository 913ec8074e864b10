use std::collections::BTreeMap;

use crate::math::matrix::Matrix;

/// Serialized parameter mapping: parameter name to its flat values.
///
/// Names are those of the bare model; the distributed wrapper never prefixes
/// them, so a state saved from a wrapped model loads into an unwrapped one.
pub type ModelState = BTreeMap<String, Vec<f64>>;

/// One trainable tensor and its accumulated gradient.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub value: Matrix,
    pub grad: Matrix,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: Matrix) -> Parameter {
        let grad = Matrix::zeros(value.rows, value.cols);
        Parameter {
            name: name.into(),
            value,
            grad,
        }
    }

    pub fn numel(&self) -> usize {
        self.value.len()
    }
}
