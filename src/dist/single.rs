use crate::dist::Communicator;
use crate::error::{Result, TrainError};

/// Group of one. Every collective is the identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, _buf: &mut [f64]) -> Result<()> {
        Ok(())
    }

    fn broadcast(&self, _buf: &mut [f64], root: usize) -> Result<()> {
        if root != 0 {
            return Err(TrainError::Collective {
                op: "broadcast",
                reason: format!("root {root} outside a group of one"),
            });
        }
        Ok(())
    }
}
