//! Curve-cycle accumulator core.
//!
//! An authenticated, incrementally-updatable tree built over a cycle of two
//! curves. Leaves are 3-scalar tuples derived from transaction outputs; every
//! layer is partitioned into fixed-width chunks and each chunk hashes to one
//! parent element, with the curve alternating by layer parity. Growing or
//! trimming the tree only ever touches the boundary chunk of each layer, so
//! updates are incremental in both directions.
//!
//! # Core types
//!
//! - [`CurveTrees`] — orchestrates whole-tree extensions and reductions.
//! - [`GrowLayerInstructions`] / [`TrimLayerInstructions`] — pure
//!   chunk-boundary bookkeeping for updating one layer.
//! - [`TreeExtension`] / [`TreeReduction`] — purely-computed deltas for one
//!   batch of leaf changes; applying them to storage is the caller's concern.
//! - [`OutputPath`] — sibling-chunk authentication path for one output,
//!   checkable with [`audit_path`].
//!
//! # Capability traits
//!
//! - [`TreeCurve`] — incremental chunk hashing on one curve.
//! - [`CurveCycle`] — binds the two curves together with the leaf-derivation
//!   hooks and the cross-curve point-to-scalar conversions.

#![warn(missing_docs)]

mod curve;
mod error;
mod hasher;
mod instructions;
mod path;
/// In-memory curve cycle for tests and benches (requires `test-cycle`
/// feature).
#[cfg(any(test, feature = "test-cycle"))]
pub mod test_cycle;
mod tree;

pub use curve::{
    C1Point, C1Scalar, C2Point, C2Scalar, CurveCycle, LeafTuple, OutputContext, OutputPair,
    TreeCurve, derive_leaf_tuples_serial, flatten_leaf_tuples,
};
pub use error::{Result, TreeError};
pub use hasher::hash_layer_chunks;
pub use instructions::{GrowLayerInstructions, TrimLayerInstructions};
pub use path::{OutputPath, audit_path};
pub use tree::{
    CurveTrees, LastHashes, LayerExtension, LayerReduction, TreeExtension, TreeReduction,
    TrimChildren,
};
