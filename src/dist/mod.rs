//! Process-group plumbing: the collective operations the trainer relies on
//! and the context that forms the group for one process.
//!
//! Every backend reduces contributions in rank order, so all ranks receive
//! bit-identical results and take identical decisions from them.

pub mod context;
pub mod local;
pub mod single;
pub mod tcp;

pub use context::{Device, DistributedContext, RankEnv};
pub use local::ThreadGroup;
pub use single::SingleProcess;
pub use tcp::TcpGroup;

use crate::error::Result;

/// Collectives over a fixed group of ranks.
///
/// Every call blocks until all ranks of the group have issued the same call
/// with buffers of the same length. Issuing calls in a different order on
/// different ranks deadlocks the group.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    /// Element-wise sum of `buf` across ranks, written back into `buf`.
    fn all_reduce_sum(&self, buf: &mut [f64]) -> Result<()>;

    /// Copies `root`'s `buf` into every other rank's `buf`.
    fn broadcast(&self, buf: &mut [f64], root: usize) -> Result<()>;

    fn barrier(&self) -> Result<()> {
        self.all_reduce_sum(&mut [])
    }

    fn all_reduce_mean(&self, buf: &mut [f64]) -> Result<()> {
        self.all_reduce_sum(buf)?;
        let world = self.world_size() as f64;
        if world > 1.0 {
            buf.iter_mut().for_each(|x| *x /= world);
        }
        Ok(())
    }

    /// The designated writer of the group.
    fn is_leader(&self) -> bool {
        self.rank() == 0
    }

    /// Releases transport resources. Further collectives fail.
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
