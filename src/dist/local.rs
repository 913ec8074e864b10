use std::sync::{Arc, Barrier, Mutex, MutexGuard};

use crate::dist::Communicator;
use crate::error::{Result, TrainError};

#[derive(Debug)]
struct Shared {
    slots: Mutex<Vec<Vec<f64>>>,
    barrier: Barrier,
}

/// In-process group: one handle per rank, each driven by its own thread.
///
/// Collectives exchange buffers through shared slots fenced by two barrier
/// phases (publish, then read), which gives the same blocking semantics as a
/// multi-process group.
#[derive(Debug, Clone)]
pub struct ThreadGroup {
    rank: usize,
    world_size: usize,
    shared: Arc<Shared>,
}

impl ThreadGroup {
    /// Creates the handles for ranks `0..world_size`, in rank order.
    pub fn new(world_size: usize) -> Vec<ThreadGroup> {
        assert!(world_size > 0, "world_size must be at least 1");
        let shared = Arc::new(Shared {
            slots: Mutex::new(vec![Vec::new(); world_size]),
            barrier: Barrier::new(world_size),
        });
        (0..world_size)
            .map(|rank| ThreadGroup {
                rank,
                world_size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn slots(&self, op: &'static str) -> Result<MutexGuard<'_, Vec<Vec<f64>>>> {
        self.shared.slots.lock().map_err(|_| TrainError::Collective {
            op,
            reason: "peer thread panicked".into(),
        })
    }

    fn publish(&self, op: &'static str, buf: &[f64]) -> Result<()> {
        self.slots(op)?[self.rank] = buf.to_vec();
        Ok(())
    }
}

impl Communicator for ThreadGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce_sum(&self, buf: &mut [f64]) -> Result<()> {
        self.publish("all_reduce", buf)?;
        self.shared.barrier.wait();

        let summed = {
            let slots = self.slots("all_reduce")?;
            if slots.iter().any(|s| s.len() != buf.len()) {
                Err(TrainError::Collective {
                    op: "all_reduce",
                    reason: "ranks contributed buffers of different lengths".into(),
                })
            } else {
                let mut acc = vec![0.0; buf.len()];
                for slot in slots.iter() {
                    for (a, v) in acc.iter_mut().zip(slot.iter()) {
                        *a += v;
                    }
                }
                Ok(acc)
            }
        };

        // Nobody may republish before every rank has read.
        self.shared.barrier.wait();
        buf.copy_from_slice(&summed?);
        Ok(())
    }

    fn broadcast(&self, buf: &mut [f64], root: usize) -> Result<()> {
        if root >= self.world_size {
            return Err(TrainError::Collective {
                op: "broadcast",
                reason: format!("root {root} outside a group of {}", self.world_size),
            });
        }
        if self.rank == root {
            self.publish("broadcast", buf)?;
        }
        self.shared.barrier.wait();

        let received = if self.rank == root {
            Ok(None)
        } else {
            let slots = self.slots("broadcast")?;
            if slots[root].len() != buf.len() {
                Err(TrainError::Collective {
                    op: "broadcast",
                    reason: format!(
                        "root sent {} values, rank {} expected {}",
                        slots[root].len(),
                        self.rank,
                        buf.len()
                    ),
                })
            } else {
                Ok(Some(slots[root].clone()))
            }
        };

        self.shared.barrier.wait();
        if let Some(values) = received? {
            buf.copy_from_slice(&values);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn run<F, T>(world: usize, f: F) -> Vec<T>
    where
        F: Fn(ThreadGroup) -> T + Send + Sync + Clone + 'static,
        T: Send + 'static,
    {
        let handles: Vec<_> = ThreadGroup::new(world)
            .into_iter()
            .map(|comm| {
                let f = f.clone();
                thread::spawn(move || f(comm))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn all_reduce_sums_in_every_rank() {
        let results = run(3, |comm| {
            let mut buf = vec![comm.rank() as f64, 1.0];
            comm.all_reduce_sum(&mut buf).unwrap();
            buf
        });
        for buf in results {
            assert_eq!(buf, vec![3.0, 3.0]);
        }
    }

    #[test]
    fn mean_divides_by_world() {
        let results = run(4, |comm| {
            let mut buf = vec![comm.rank() as f64];
            comm.all_reduce_mean(&mut buf).unwrap();
            buf[0]
        });
        assert!(results.iter().all(|v| (*v - 1.5).abs() < 1e-12));
    }

    #[test]
    fn broadcast_copies_root_buffer() {
        let results = run(3, |comm| {
            let mut buf = if comm.rank() == 1 { vec![7.0, 8.0] } else { vec![0.0, 0.0] };
            comm.broadcast(&mut buf, 1).unwrap();
            buf
        });
        assert!(results.iter().all(|b| b == &vec![7.0, 8.0]));
    }

    #[test]
    fn mismatched_lengths_fail_on_every_rank() {
        let results = run(2, |comm| {
            let mut buf = vec![0.0; comm.rank() + 1];
            comm.all_reduce_sum(&mut buf).is_err()
        });
        assert_eq!(results, vec![true, true]);
    }

    #[test]
    fn repeated_collectives_stay_in_step() {
        let results = run(2, |comm| {
            let mut total = 0.0;
            for i in 0..50 {
                let mut buf = vec![i as f64 + comm.rank() as f64];
                comm.all_reduce_sum(&mut buf).unwrap();
                total += buf[0];
            }
            total
        });
        assert_eq!(results[0], results[1]);
    }
}
