//! Whole-tree extension and reduction over a curve cycle.

mod extension;
mod reduction;

use std::{marker::PhantomData, sync::Arc};

use crate::{
    Result, TreeError,
    curve::{C1Point, C1Scalar, C2Point, C2Scalar, CurveCycle, OutputContext},
};

/// New and updated parent hashes for one layer of an extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerExtension<P> {
    /// Index of the first parent these hashes (re)write.
    pub start_idx: u64,
    /// The first hash replaces the layer's existing last element instead of
    /// appending.
    pub update_existing_last_hash: bool,
    /// The ordered new parent values.
    pub hashes: Vec<P>,
}

/// Updated boundary hash for one layer of a reduction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerReduction<P> {
    /// The layer's last element changes (removal or replacement).
    pub update_existing_last_hash: bool,
    /// Its new value when it changes.
    pub new_last_hash: Option<P>,
}

/// Purely-computed delta appending one batch of outputs to the tree.
///
/// Layers alternate curves by parity: `c1_layer_extensions[i]` is layer
/// `2*i`, `c2_layer_extensions[i]` is layer `2*i + 1`. Applying the delta to
/// storage is the caller's concern.
pub struct TreeExtension<Cy: CurveCycle> {
    /// Leaf-tuple index of the first appended leaf.
    pub leaf_start_idx: u64,
    /// The valid outputs actually included, in chain order. Invalid outputs
    /// from the requested batch are absent.
    pub leaves: Vec<OutputContext>,
    /// Extensions of layers 0, 2, 4, ...
    pub c1_layer_extensions: Vec<LayerExtension<C1Point<Cy>>>,
    /// Extensions of layers 1, 3, 5, ...
    pub c2_layer_extensions: Vec<LayerExtension<C2Point<Cy>>>,
    /// Number of incremental hash invocations spent computing the delta.
    pub hash_calls: u64,
}

/// Purely-computed delta removing the newest leaf tuples from the tree.
///
/// Same layer-parity split as [`TreeExtension`]. Layers above the new root
/// are simply absent; the applier truncates them.
pub struct TreeReduction<Cy: CurveCycle> {
    /// Leaf-tuple count after the trim.
    pub new_total_leaf_tuples: u64,
    /// Reductions of layers 0, 2, 4, ...
    pub c1_layer_reductions: Vec<LayerReduction<C1Point<Cy>>>,
    /// Reductions of layers 1, 3, 5, ...
    pub c2_layer_reductions: Vec<LayerReduction<C2Point<Cy>>>,
    /// Number of incremental hash invocations spent computing the delta.
    pub hash_calls: u64,
}

/// Per-layer boundary hashes, by curve parity.
///
/// `c1[i]` belongs to layer `2*i`, `c2[i]` to layer `2*i + 1`. Which element
/// is the boundary depends on the consumer: extension takes each layer's
/// current last element, reduction the element that stays last after the
/// trim. Empty for an empty tree.
pub struct LastHashes<Cy: CurveCycle> {
    /// Boundary elements of layers 0, 2, 4, ...
    pub c1: Vec<C1Point<Cy>>,
    /// Boundary elements of layers 1, 3, 5, ...
    pub c2: Vec<C2Point<Cy>>,
}

impl<Cy: CurveCycle> Default for LastHashes<Cy> {
    fn default() -> Self {
        LastHashes {
            c1: Vec::new(),
            c2: Vec::new(),
        }
    }
}

impl<Cy: CurveCycle> Clone for LastHashes<Cy> {
    fn clone(&self) -> Self {
        LastHashes {
            c1: self.c1.clone(),
            c2: self.c2.clone(),
        }
    }
}

/// Child values fetched for a reduction, grouped by the curve whose scalar
/// field they land in after cycle conversion.
///
/// Entry `c1[i]` feeds trim instruction `2*i` (for `i == 0` these are leaf
/// scalars; above that, converted layer hashes), `c2[i]` feeds instruction
/// `2*i + 1`. Each entry covers exactly its instruction's
/// `[start_trim_idx, end_trim_idx)` range.
pub struct TrimChildren<Cy: CurveCycle> {
    /// Children of even trim instructions.
    pub c1: Vec<Vec<C1Scalar<Cy>>>,
    /// Children of odd trim instructions.
    pub c2: Vec<Vec<C2Scalar<Cy>>>,
}

/// Stateless orchestrator for whole-tree updates.
///
/// Holds only the chunk widths and the worker pool; all counts and boundary
/// hashes are passed in per call, so one instance serves any number of trees.
#[derive(Debug)]
pub struct CurveTrees<Cy: CurveCycle> {
    c1_width: u64,
    c2_width: u64,
    pool: Arc<rayon::ThreadPool>,
    _cycle: PhantomData<Cy>,
}

impl<Cy: CurveCycle> CurveTrees<Cy> {
    /// Create with the given chunk widths and a dedicated default-sized
    /// worker pool.
    pub fn new(c1_width: u64, c2_width: u64) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .build()
            .map_err(|e| TreeError::InvalidInput(format!("failed to build worker pool: {e}")))?;
        Self::with_pool(c1_width, c2_width, Arc::new(pool))
    }

    /// Create with the given chunk widths and a shared worker pool.
    pub fn with_pool(c1_width: u64, c2_width: u64, pool: Arc<rayon::ThreadPool>) -> Result<Self> {
        if c1_width < 2 || c2_width < 2 {
            return Err(TreeError::InvalidInput(
                "chunk widths must be at least 2".into(),
            ));
        }
        Ok(CurveTrees {
            c1_width,
            c2_width,
            pool,
            _cycle: PhantomData,
        })
    }

    /// Chunk width of C1-hashed layers.
    pub fn c1_width(&self) -> u64 {
        self.c1_width
    }

    /// Chunk width of C2-hashed layers.
    pub fn c2_width(&self) -> u64 {
        self.c2_width
    }

    /// Scalar width of leaf-layer chunks. Tuples are atomic, so this is
    /// three C1 slots per tuple.
    pub fn leaf_chunk_width(&self) -> u64 {
        self.c1_width * 3
    }

    /// Chunk width applied to layer `layer_idx`'s elements when hashing them
    /// into layer `layer_idx + 1`.
    pub fn layer_chunk_width(&self, layer_idx: u32) -> u64 {
        if layer_idx % 2 == 0 {
            self.c2_width
        } else {
            self.c1_width
        }
    }

    /// Chunk width of the instruction producing layer `layer_idx` from the
    /// layer beneath it.
    pub(crate) fn parent_width(&self, layer_idx: usize) -> u64 {
        if layer_idx % 2 == 0 {
            self.c1_width
        } else {
            self.c2_width
        }
    }

    /// Element count of every layer for a tree of `n_leaf_tuples` leaves,
    /// bottom-up. Empty for an empty tree; the last entry is always 1 (the
    /// root).
    pub fn layer_counts(&self, n_leaf_tuples: u64) -> Vec<u64> {
        if n_leaf_tuples == 0 {
            return Vec::new();
        }
        let mut counts = vec![n_leaf_tuples.div_ceil(self.c1_width)];
        let mut layer_idx: usize = 1;
        while let Some(&last) = counts.last() {
            if last <= 1 {
                break;
            }
            counts.push(last.div_ceil(self.parent_width(layer_idx)));
            layer_idx += 1;
        }
        counts
    }

    /// Number of hash layers for a tree of `n_leaf_tuples` leaves.
    pub fn n_layers(&self, n_leaf_tuples: u64) -> u32 {
        self.layer_counts(n_leaf_tuples).len() as u32
    }
}
