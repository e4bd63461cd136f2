//! Curve capability traits and the output/leaf data model.
//!
//! The tree never performs curve arithmetic itself. Everything it needs from
//! a curve is the [`TreeCurve`] operation set: a zero scalar, a chunk-hash
//! initialization point, the incremental `hash_grow`/`hash_trim` pair, and a
//! fixed 32-byte encoding. [`CurveCycle`] binds two such curves together and
//! adds the leaf-derivation hooks plus the cross-curve conversions that read
//! a point's x-coordinate as a scalar on the paired curve.

use std::fmt;

use bincode::{Decode, Encode};

use crate::Result;

/// Incremental chunk hashing on one curve of the cycle.
///
/// Contract: with generators `G_0, G_1, ...` fixed per curve,
///
/// ```text
/// hash_grow(h, o, prior, new) = h + (new[0] - prior)*G_o + sum_{i>=1} new[i]*G_{o+i}
/// ```
///
/// `prior` is whatever currently occupies slot `o` (the zero scalar for an
/// empty slot), so a single call both replaces the boundary child and appends
/// new ones. `hash_trim` must invert the matching grow bit-for-bit. Growing
/// from [`hash_init_point`](Self::hash_init_point) at offset 0 defines
/// hashing a brand-new chunk.
///
/// A `None` return is a transient backend failure; the caller aborts the
/// whole batch and surfaces [`TreeError::HashFailed`](crate::TreeError).
pub trait TreeCurve: 'static {
    /// Scalar field element of this curve.
    type Scalar: Clone + PartialEq + Eq + fmt::Debug + Send + Sync;
    /// Group element of this curve.
    type Point: Clone + PartialEq + Eq + fmt::Debug + Send + Sync;

    /// Name used in error reports.
    const NAME: &'static str;

    /// The additive identity of the scalar field.
    fn zero_scalar() -> Self::Scalar;

    /// The point every fresh chunk hash starts from.
    fn hash_init_point() -> Self::Point;

    /// Append `new_children` to a chunk hash starting at slot `offset`,
    /// replacing whatever `prior_child_at_offset` currently occupies that
    /// slot.
    fn hash_grow(
        existing_hash: &Self::Point,
        offset: u64,
        prior_child_at_offset: &Self::Scalar,
        new_children: &[Self::Scalar],
    ) -> Option<Self::Point>;

    /// Remove `children_removed` from slots `offset..`, restoring
    /// `child_to_restore` into slot `offset`. Exactly inverts the matching
    /// [`hash_grow`](Self::hash_grow) call.
    fn hash_trim(
        existing_hash: &Self::Point,
        offset: u64,
        children_removed: &[Self::Scalar],
        child_to_restore: &Self::Scalar,
    ) -> Option<Self::Point>;

    /// Canonical 32-byte scalar encoding.
    fn scalar_to_bytes(scalar: &Self::Scalar) -> [u8; 32];
    /// Length-checked scalar decoding.
    fn scalar_from_bytes(bytes: &[u8]) -> Result<Self::Scalar>;
    /// Canonical 32-byte point encoding.
    fn point_to_bytes(point: &Self::Point) -> [u8; 32];
    /// Length-checked point decoding.
    fn point_from_bytes(bytes: &[u8]) -> Result<Self::Point>;
}

/// Scalar type of a cycle's first curve.
pub type C1Scalar<Cy> = <<Cy as CurveCycle>::C1 as TreeCurve>::Scalar;
/// Point type of a cycle's first curve.
pub type C1Point<Cy> = <<Cy as CurveCycle>::C1 as TreeCurve>::Point;
/// Scalar type of a cycle's second curve.
pub type C2Scalar<Cy> = <<Cy as CurveCycle>::C2 as TreeCurve>::Scalar;
/// Point type of a cycle's second curve.
pub type C2Point<Cy> = <<Cy as CurveCycle>::C2 as TreeCurve>::Point;

/// Two curves whose scalar and base fields mirror each other, plus the
/// deterministic derivation of leaf tuples from outputs.
///
/// Leaf derivation is split into three hooks so the expensive field inversion
/// can be batched across a whole block of outputs:
///
/// 1. [`output_to_pre_leaf`](Self::output_to_pre_leaf) — per-output, parallel,
///    fault-tolerant; `None` marks an invalid output (identity point, failed
///    torsion clearing) which is silently excluded.
/// 2. [`batch_invert`](Self::batch_invert) — one inversion pass over all
///    valid outputs' denominators (the serialization barrier).
/// 3. [`finish_leaf`](Self::finish_leaf) — per-output, parallel, infallible.
///
/// The exact encoding and domain separation of each component is owned by the
/// implementation; the tree treats the resulting scalars as opaque.
pub trait CurveCycle: 'static {
    /// First curve: hashes the leaf layer and every even interior layer.
    type C1: TreeCurve;
    /// Second curve: hashes every odd interior layer.
    type C2: TreeCurve;
    /// Intermediate per-output representation between stages 1 and 3.
    type PreLeaf: Send + Sync;

    /// Stage 1: validate one output and convert it to the intermediate
    /// representation. `None` excludes the output from the tree.
    fn output_to_pre_leaf(pair: &OutputPair) -> Option<Self::PreLeaf>;

    /// The scalar this pre-leaf needs inverted.
    fn pre_leaf_denominator(pre: &Self::PreLeaf) -> <Self::C1 as TreeCurve>::Scalar;

    /// Stage 2: invert every denominator in one batch (Montgomery trick).
    /// `None` if any denominator is not invertible.
    fn batch_invert(
        denominators: &[<Self::C1 as TreeCurve>::Scalar],
    ) -> Option<Vec<<Self::C1 as TreeCurve>::Scalar>>;

    /// Stage 3: produce the final leaf tuple from the intermediate
    /// representation and its inverted denominator.
    fn finish_leaf(
        pre: &Self::PreLeaf,
        inverse: &<Self::C1 as TreeCurve>::Scalar,
    ) -> LeafTuple<Self::C1>;

    /// Read a C1 point's x-coordinate as a C2 scalar.
    fn c1_point_to_c2_scalar(point: &C1Point<Self>) -> C2Scalar<Self>;
    /// Read a C2 point's x-coordinate as a C1 scalar.
    fn c2_point_to_c1_scalar(point: &C2Point<Self>) -> C1Scalar<Self>;
}

/// An output's public key and amount commitment, the unit tracked by the
/// tree. Two outputs are the same leaf candidate iff both fields match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub struct OutputPair {
    /// The one-time output public key.
    pub output_pubkey: [u8; 32],
    /// The amount commitment.
    pub commitment: [u8; 32],
}

/// An output together with its globally-ordered id, as delivered by the
/// block source. Transient; constructed by the caller per block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub struct OutputContext {
    /// Globally-ordered output id (chain order).
    pub output_id: u64,
    /// The output's key material.
    pub pair: OutputPair,
}

/// The 3-scalar depth-0 representation of one output: `(O_x, I_x, C_x)`.
pub struct LeafTuple<C: TreeCurve> {
    /// x-coordinate of the output key component.
    pub o_x: C::Scalar,
    /// x-coordinate of the key-image-generator component.
    pub i_x: C::Scalar,
    /// x-coordinate of the commitment component.
    pub c_x: C::Scalar,
}

impl<C: TreeCurve> Clone for LeafTuple<C> {
    fn clone(&self) -> Self {
        LeafTuple {
            o_x: self.o_x.clone(),
            i_x: self.i_x.clone(),
            c_x: self.c_x.clone(),
        }
    }
}

impl<C: TreeCurve> fmt::Debug for LeafTuple<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafTuple")
            .field("o_x", &self.o_x)
            .field("i_x", &self.i_x)
            .field("c_x", &self.c_x)
            .finish()
    }
}

impl<C: TreeCurve> PartialEq for LeafTuple<C> {
    fn eq(&self, other: &Self) -> bool {
        self.o_x == other.o_x && self.i_x == other.i_x && self.c_x == other.c_x
    }
}

impl<C: TreeCurve> Eq for LeafTuple<C> {}

/// Flatten leaf tuples into the leaf layer's scalar sequence, fixed order
/// `O_x, I_x, C_x` per leaf.
pub fn flatten_leaf_tuples<C: TreeCurve>(tuples: &[LeafTuple<C>]) -> Vec<C::Scalar> {
    let mut flattened = Vec::with_capacity(tuples.len() * 3);
    for tuple in tuples {
        flattened.push(tuple.o_x.clone());
        flattened.push(tuple.i_x.clone());
        flattened.push(tuple.c_x.clone());
    }
    flattened
}

/// Derive leaf tuples for a set of pairs serially, failing on any invalid
/// output.
///
/// Unlike the batch pipeline inside
/// [`CurveTrees::get_tree_extension`](crate::CurveTrees::get_tree_extension),
/// which silently excludes invalid outputs, this helper returns `None` if any
/// pair fails validity. It is meant for re-deriving tuples of outputs already
/// known to be in the tree (path audits, trim-child gathering).
pub fn derive_leaf_tuples_serial<Cy: CurveCycle>(
    pairs: &[OutputPair],
) -> Option<Vec<LeafTuple<Cy::C1>>> {
    let pre_leaves = pairs
        .iter()
        .map(Cy::output_to_pre_leaf)
        .collect::<Option<Vec<_>>>()?;
    let denominators: Vec<_> = pre_leaves.iter().map(Cy::pre_leaf_denominator).collect();
    let inverses = Cy::batch_invert(&denominators)?;
    Some(
        pre_leaves
            .iter()
            .zip(&inverses)
            .map(|(pre, inverse)| Cy::finish_leaf(pre, inverse))
            .collect(),
    )
}
