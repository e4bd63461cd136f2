use curvetrees::{
    OutputContext, audit_path,
    test_cycle::{TestCycle, test_output_pair},
};
use proptest::prelude::*;

use super::{Chain, blk_hash, single_thread_trees};
use crate::{SyncError, TreeSync};

/// Every registered output's path must either be empty or authenticate
/// against the current root, at every point of a random sync/pop schedule.
fn assert_all_paths_live(chain: &Chain, registered: &[curvetrees::OutputPair]) {
    let root = chain.sync.tree_root();
    for pair in registered {
        let path = chain.sync.get_output_path(pair).unwrap();
        if path.is_empty() {
            continue;
        }
        let root = root.expect("non-empty path in an empty tree");
        assert!(
            audit_path::<TestCycle>(&path, pair, &root),
            "stale path at block {}",
            chain.next_blk - 1
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_registered_paths_always_authenticate(
        schedule in proptest::collection::vec(
            (proptest::collection::vec(0u64..10_000, 0..5), 0usize..3),
            1..12,
        ),
    ) {
        let mut chain = Chain::new(2, 2, 3);
        let mut registered = Vec::new();
        let mut seed = 100_000u64;

        for (block_seeds, n_pops) in schedule {
            // One fresh registration ahead of each block.
            seed += 1;
            let tracked = test_output_pair(seed);
            if chain.sync.register_output(tracked, chain.next_blk).unwrap() {
                registered.push(tracked);
            }

            let mut block = vec![tracked];
            block.extend(block_seeds.iter().map(|&s| test_output_pair(s)));
            chain.sync(block).unwrap();
            assert_all_paths_live(&chain, &registered);

            for _ in 0..n_pops {
                match chain.pop() {
                    Ok(_) => {}
                    Err(SyncError::ReorgDepthExceeded(_)) => break,
                    Err(e) => panic!("pop failed: {e}"),
                }
                assert_all_paths_live(&chain, &registered);
            }

            // Refill whatever the pops removed so heights keep advancing.
            while chain.sync.n_synced_blocks() == 0
                || chain.sync.block_window.back().map(|m| m.blk_idx) != Some(chain.next_blk - 1)
            {
                seed += 1;
                chain.sync(vec![test_output_pair(seed)]).unwrap();
                assert_all_paths_live(&chain, &registered);
            }
        }
    }

    #[test]
    fn test_pop_then_identical_resync_restores_the_root(
        block_sizes in proptest::collection::vec(0usize..4, 2..8),
        n_pops in 1usize..3,
    ) {
        let mut chain = Chain::new(3, 2, 8);
        let mut seed = 0u64;
        let mut block_pairs = Vec::new();
        for size in &block_sizes {
            let pairs: Vec<_> = (0..*size)
                .map(|_| {
                    seed += 1;
                    test_output_pair(seed)
                })
                .collect();
            block_pairs.push(pairs.clone());
            chain.sync(pairs).unwrap();
        }
        let root_before = chain.sync.tree_root();
        let snapshot_before = chain.sync.to_snapshot();

        let n_pops = n_pops.min(block_pairs.len());
        for _ in 0..n_pops {
            prop_assert!(chain.pop().unwrap());
        }
        // Output ids must replay identically for the roots to match.
        chain.next_id -= block_pairs
            .iter()
            .rev()
            .take(n_pops)
            .map(|b| b.len() as u64)
            .sum::<u64>();
        for pairs in block_pairs.iter().skip(block_pairs.len() - n_pops) {
            chain.sync(pairs.clone()).unwrap();
        }

        prop_assert_eq!(chain.sync.tree_root(), root_before);
        prop_assert_eq!(chain.sync.to_snapshot(), snapshot_before);
    }

    #[test]
    fn test_snapshot_round_trip_preserves_roots(
        block_sizes in proptest::collection::vec(1usize..4, 1..6),
    ) {
        let mut chain = Chain::new(2, 2, 4);
        let mut seed = 0u64;
        let target = test_output_pair(999_999);
        chain.sync.register_output(target, 1).unwrap();
        let mut first = true;
        for size in block_sizes {
            let mut pairs: Vec<_> = (0..size)
                .map(|_| {
                    seed += 1;
                    test_output_pair(seed)
                })
                .collect();
            if first {
                pairs.push(target);
                first = false;
            }
            chain.sync(pairs).unwrap();
        }

        let bytes = chain.sync.to_snapshot().to_bytes().unwrap();
        let snapshot = crate::TreeSyncSnapshot::from_bytes(&bytes).unwrap();
        let mut restored =
            TreeSync::from_snapshot(snapshot, single_thread_trees(2, 2)).unwrap();

        prop_assert_eq!(restored.tree_root(), chain.sync.tree_root());
        prop_assert_eq!(
            restored.get_output_path(&target).unwrap(),
            chain.sync.get_output_path(&target).unwrap()
        );

        // The restored copy accepts the same next block.
        let blk_idx = chain.next_blk;
        let extra = vec![OutputContext {
            output_id: chain.next_id,
            pair: test_output_pair(seed + 1),
        }];
        restored
            .sync_block(blk_idx, blk_hash(blk_idx), blk_hash(blk_idx - 1), extra.clone())
            .unwrap();
        chain
            .sync
            .sync_block(blk_idx, blk_hash(blk_idx), blk_hash(blk_idx - 1), extra)
            .unwrap();
        prop_assert_eq!(restored.tree_root(), chain.sync.tree_root());
    }
}
