use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Assigns each rank an equal-sized shard of a dataset's indices.
///
/// The index list is shuffled with a generator seeded by `seed + epoch`, then
/// padded by wrapping around to a multiple of the world size, and rank `r`
/// takes every `world_size`-th index starting at `r`. Every rank therefore
/// gets exactly [`DistributedSampler::num_samples`] indices, so every rank
/// runs the same number of batches and reaches the same collectives.
#[derive(Debug, Clone)]
pub struct DistributedSampler {
    dataset_len: usize,
    rank: usize,
    world_size: usize,
    shuffle: bool,
    seed: u64,
    epoch: u64,
}

impl DistributedSampler {
    pub fn new(dataset_len: usize, rank: usize, world_size: usize) -> DistributedSampler {
        assert!(world_size > 0 && rank < world_size, "rank {rank} outside world {world_size}");
        DistributedSampler {
            dataset_len,
            rank,
            world_size,
            shuffle: true,
            seed: 0,
            epoch: 0,
        }
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> DistributedSampler {
        self.shuffle = shuffle;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> DistributedSampler {
        self.seed = seed;
        self
    }

    /// Selects the shuffle for `epoch`; must be called with the same value
    /// on every rank.
    pub fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch as u64;
    }

    /// Shard size, identical on every rank.
    pub fn num_samples(&self) -> usize {
        self.dataset_len.div_ceil(self.world_size)
    }

    pub fn indices(&self) -> Vec<usize> {
        if self.dataset_len == 0 {
            return Vec::new();
        }
        let mut order: Vec<usize> = (0..self.dataset_len).collect();
        if self.shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(self.epoch));
            order.shuffle(&mut rng);
        }

        let total = self.num_samples() * self.world_size;
        let mut i = 0;
        while order.len() < total {
            order.push(order[i]);
            i += 1;
        }

        order
            .into_iter()
            .skip(self.rank)
            .step_by(self.world_size)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn shards(len: usize, world: usize, epoch: usize) -> Vec<Vec<usize>> {
        (0..world)
            .map(|rank| {
                let mut s = DistributedSampler::new(len, rank, world);
                s.set_epoch(epoch);
                s.indices()
            })
            .collect()
    }

    #[test]
    fn shards_have_equal_size_and_cover_the_dataset() {
        let all = shards(10, 3, 0);
        assert!(all.iter().all(|s| s.len() == 4));
        let covered: HashSet<usize> = all.iter().flatten().copied().collect();
        assert_eq!(covered.len(), 10);
    }

    #[test]
    fn shards_are_disjoint_when_divisible() {
        let all = shards(12, 4, 3);
        let covered: HashSet<usize> = all.iter().flatten().copied().collect();
        assert_eq!(covered.len(), 12);
    }

    #[test]
    fn order_depends_on_epoch_deterministically() {
        assert_eq!(shards(50, 2, 5), shards(50, 2, 5));
        assert_ne!(shards(50, 2, 5), shards(50, 2, 6));
    }

    #[test]
    fn unshuffled_is_strided() {
        let s = DistributedSampler::new(6, 1, 2).with_shuffle(false);
        assert_eq!(s.indices(), vec![1, 3, 5]);
    }

    #[test]
    fn tiny_dataset_is_padded_for_every_rank() {
        let all = shards(1, 3, 0);
        assert_eq!(all, vec![vec![0], vec![0], vec![0]]);
    }
}
