//! Deterministic RNG hierarchy for resampling.
//!
//! A master seed generates one sub-seed per `(label, replication)` pair via
//! BLAKE3, so a replication's draws never depend on which thread ran it or in
//! what order. Parallel bootstraps therefore reproduce bit-for-bit.

use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug, Clone)]
pub struct RngHierarchy {
    master_seed: u64,
}

impl RngHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Sub-seed for one replication of the resampling run named `label`.
    pub fn sub_seed(&self, label: &str, replication: u64) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        hasher.update(label.as_bytes());
        hasher.update(&replication.to_le_bytes());
        let hash = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(head)
    }

    pub fn rng_for(&self, label: &str, replication: u64) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(label, replication))
    }
}
