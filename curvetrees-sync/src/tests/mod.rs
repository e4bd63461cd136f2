//! Shared harness for the sync tests: a deterministic chain driving one
//! cache, with block hashes derived from the height.

use std::sync::Arc;

use curvetrees::{
    CurveTrees, OutputContext, OutputPair,
    test_cycle::{TestCycle, test_output_pair},
};

use crate::{Result, TreeSync};

mod test_properties;

fn single_thread_trees(c1_width: u64, c2_width: u64) -> CurveTrees<TestCycle> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(1)
        .build()
        .unwrap();
    CurveTrees::with_pool(c1_width, c2_width, Arc::new(pool)).unwrap()
}

fn blk_hash(blk_idx: u64) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"block");
    hasher.update(&blk_idx.to_le_bytes());
    *hasher.finalize().as_bytes()
}

/// Deterministic chain: block `i` always has hash `blk_hash(i)`, output ids
/// increase globally so batches keep their order.
struct Chain {
    sync: TreeSync<TestCycle>,
    next_blk: u64,
    next_id: u64,
}

impl Chain {
    fn new(c1_width: u64, c2_width: u64, max_reorg_depth: u64) -> Self {
        Chain {
            sync: TreeSync::new(single_thread_trees(c1_width, c2_width), max_reorg_depth),
            next_blk: 1,
            next_id: 0,
        }
    }

    fn sync(&mut self, pairs: Vec<OutputPair>) -> Result<()> {
        let outputs = pairs
            .into_iter()
            .map(|pair| {
                let output_id = self.next_id;
                self.next_id += 1;
                OutputContext { output_id, pair }
            })
            .collect();
        let blk_idx = self.next_blk;
        self.sync
            .sync_block(blk_idx, blk_hash(blk_idx), blk_hash(blk_idx - 1), outputs)?;
        self.next_blk += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<bool> {
        let popped = self.sync.pop_block()?;
        if popped {
            self.next_blk -= 1;
        }
        Ok(popped)
    }
}

fn pairs(seeds: &[u64]) -> Vec<OutputPair> {
    seeds.iter().map(|&seed| test_output_pair(seed)).collect()
}
