//! Reference-counted cache entries and block-window metadata.

use bincode::{Decode, Encode};
use curvetrees::OutputPair;

/// Content hash identifying one registered output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct OutputRef([u8; 32]);

impl OutputRef {
    /// Domain-tagged content hash of the pair.
    pub fn new(pair: &OutputPair) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"curvetrees.sync.output-ref");
        hasher.update(&pair.output_pubkey);
        hasher.update(&pair.commitment);
        OutputRef(*hasher.finalize().as_bytes())
    }

    /// The raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// One output whose membership path the cache maintains.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub struct RegisteredOutput {
    /// The output's key material.
    pub pair: OutputPair,
    /// Block at which the output unlocks and enters the tree.
    pub unlock_block_idx: u64,
    /// Leaf-tuple index, set once the unlock block syncs; cleared again if a
    /// reorg removes the leaf.
    pub assigned_leaf_idx: Option<u64>,
}

/// Reference-counted cached leaf. Tuples are re-derived from the pair on
/// demand rather than stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub struct CachedLeaf {
    /// The output's key material.
    pub pair: OutputPair,
    /// Number of paths and pins depending on this leaf.
    pub ref_count: u64,
}

/// Key of one fixed-width chunk of one hash layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct ChunkKey {
    /// Hash layer, leaf-adjacent layer first.
    pub layer_idx: u32,
    /// Chunk position within the layer.
    pub chunk_idx: u64,
}

/// Reference-counted cached chunk contents: the canonical encodings of the
/// chunk's current members, in order. Boundary chunks grow and shrink in
/// place as blocks come and go.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct CachedTreeChunk {
    /// Current member encodings.
    pub members: Vec<[u8; 32]>,
    /// Number of paths and pins depending on this chunk.
    pub ref_count: u64,
}

/// Per-block record kept inside the reorg window.
///
/// The pins hold every boundary chunk of the block's post-state alive so a
/// later pop can rebuild that state's last hashes. `pinned_leaf_end` extends
/// past `n_leaf_tuples` as later blocks keep filling the same boundary leaf
/// chunk; popping back here must be able to fetch the removed leaves.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct BlockMeta {
    /// Block height.
    pub blk_idx: u64,
    /// Block hash, checked against the next block's `prev_blk_hash`.
    pub blk_hash: [u8; 32],
    /// Leaf-tuple count after this block.
    pub n_leaf_tuples: u64,
    /// Boundary chunk of every layer at this block's state, root included.
    pub pinned_chunks: Vec<ChunkKey>,
    /// First pinned leaf index (start of the boundary leaf chunk).
    pub pinned_leaf_start: u64,
    /// One past the last pinned leaf index.
    pub pinned_leaf_end: u64,
}
