//! Snapshot encoding of the full cache state.

use std::marker::PhantomData;

use bincode::{Decode, Encode};
use curvetrees::{CurveCycle, CurveTrees};

use crate::{
    cache::{BlockMeta, CachedLeaf, CachedTreeChunk, ChunkKey, OutputRef, RegisteredOutput},
    error::{Result, SyncError},
    sync::TreeSync,
};

/// Portable image of a [`TreeSync`] cache.
///
/// Map contents are sorted by key so encoding the same state always yields
/// the same bytes. The widths are recorded so a snapshot cannot silently be
/// restored against a differently-shaped tree.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct TreeSyncSnapshot {
    /// First-curve chunk width of the tree the snapshot was taken from.
    pub c1_width: u64,
    /// Second-curve chunk width.
    pub c2_width: u64,
    /// Configured reorg tolerance.
    pub max_reorg_depth: u64,
    /// Leaf-tuple count at the snapshotted tip.
    pub n_leaf_tuples: u64,
    /// Blocks evicted from the window before the snapshot.
    pub n_evicted_blocks: u64,
    /// Registered outputs, sorted by output ref.
    pub registered: Vec<(OutputRef, RegisteredOutput)>,
    /// Cached leaves, sorted by leaf index.
    pub leaf_cache: Vec<(u64, CachedLeaf)>,
    /// Cached chunks, sorted by key.
    pub chunk_cache: Vec<(ChunkKey, CachedTreeChunk)>,
    /// Retained block metadata, oldest first.
    pub block_window: Vec<BlockMeta>,
}

impl TreeSyncSnapshot {
    /// Encode with bincode's standard configuration.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| SyncError::InvalidSnapshot(e.to_string()))
    }

    /// Decode, rejecting trailing bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (snapshot, read): (Self, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| SyncError::InvalidSnapshot(e.to_string()))?;
        if read != bytes.len() {
            return Err(SyncError::InvalidSnapshot(format!(
                "{} trailing bytes",
                bytes.len() - read
            )));
        }
        Ok(snapshot)
    }
}

impl<Cy: CurveCycle> TreeSync<Cy> {
    /// Capture the full cache state.
    pub fn to_snapshot(&self) -> TreeSyncSnapshot {
        let mut registered: Vec<_> = self
            .registered
            .iter()
            .map(|(output_ref, out)| (*output_ref, *out))
            .collect();
        registered.sort_by_key(|(output_ref, _)| *output_ref);
        let mut leaf_cache: Vec<_> = self
            .leaf_cache
            .iter()
            .map(|(leaf_idx, leaf)| (*leaf_idx, *leaf))
            .collect();
        leaf_cache.sort_by_key(|(leaf_idx, _)| *leaf_idx);
        let mut chunk_cache: Vec<_> = self
            .chunk_cache
            .iter()
            .map(|(key, chunk)| (*key, chunk.clone()))
            .collect();
        chunk_cache.sort_by_key(|(key, _)| *key);

        TreeSyncSnapshot {
            c1_width: self.curve_trees.c1_width(),
            c2_width: self.curve_trees.c2_width(),
            max_reorg_depth: self.max_reorg_depth,
            n_leaf_tuples: self.n_leaf_tuples,
            n_evicted_blocks: self.n_evicted_blocks,
            registered,
            leaf_cache,
            chunk_cache,
            block_window: self.block_window.iter().cloned().collect(),
        }
    }

    /// Restore a cache from a snapshot taken against an identically-shaped
    /// tree.
    pub fn from_snapshot(snapshot: TreeSyncSnapshot, curve_trees: CurveTrees<Cy>) -> Result<Self> {
        if snapshot.c1_width != curve_trees.c1_width()
            || snapshot.c2_width != curve_trees.c2_width()
        {
            return Err(SyncError::InvalidSnapshot(format!(
                "snapshot widths {}x{} do not match tree widths {}x{}",
                snapshot.c1_width,
                snapshot.c2_width,
                curve_trees.c1_width(),
                curve_trees.c2_width()
            )));
        }
        if snapshot.block_window.len() as u64 > snapshot.max_reorg_depth + 1 {
            return Err(SyncError::InvalidSnapshot(format!(
                "window of {} blocks exceeds reorg depth {}",
                snapshot.block_window.len(),
                snapshot.max_reorg_depth
            )));
        }
        Ok(TreeSync {
            curve_trees,
            max_reorg_depth: snapshot.max_reorg_depth,
            n_leaf_tuples: snapshot.n_leaf_tuples,
            registered: snapshot.registered.into_iter().collect(),
            leaf_cache: snapshot.leaf_cache.into_iter().collect(),
            chunk_cache: snapshot.chunk_cache.into_iter().collect(),
            block_window: snapshot.block_window.into(),
            n_evicted_blocks: snapshot.n_evicted_blocks,
            _single_thread: PhantomData,
        })
    }
}
