//! Sibling-chunk authentication paths for single outputs.

use bincode::{Decode, Encode};

use crate::{
    Result, TreeError,
    curve::{CurveCycle, OutputPair, TreeCurve, derive_leaf_tuples_serial, flatten_leaf_tuples},
};

/// One output's path from its leaf chunk to the root.
///
/// `leaves` holds the full leaf chunk the output sits in; each interior
/// entry holds the full sibling chunk of the layer, as canonical 32-byte
/// element encodings (`c1_layers[i]` is layer `2*i`, `c2_layers[i]` layer
/// `2*i + 1`). The final chunk is the root layer and has exactly one member.
/// An output registered but not yet in the tree gets the empty path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct OutputPath {
    /// Members of the output's leaf chunk, in layer order.
    pub leaves: Vec<OutputPair>,
    /// Sibling chunks of layers 0, 2, 4, ...
    pub c1_layers: Vec<Vec<[u8; 32]>>,
    /// Sibling chunks of layers 1, 3, 5, ...
    pub c2_layers: Vec<Vec<[u8; 32]>>,
}

impl OutputPath {
    /// The path of a registered output not yet in the tree.
    pub fn empty() -> Self {
        OutputPath::default()
    }

    /// True when the path carries no chunks at all.
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty() && self.c1_layers.is_empty() && self.c2_layers.is_empty()
    }
}

/// Check that `path` authenticates `output` against `expected_root`.
///
/// Re-derives the leaf tuples, then walks chunk by chunk: each layer's chunk
/// must hash to a member of the next layer's chunk, and the final chunk must
/// be exactly the expected root. Any malformed encoding fails the audit
/// rather than erroring.
pub fn audit_path<Cy: CurveCycle>(
    path: &OutputPath,
    output: &OutputPair,
    expected_root: &[u8; 32],
) -> bool {
    audit::<Cy>(path, output, expected_root).unwrap_or(false)
}

fn audit<Cy: CurveCycle>(
    path: &OutputPath,
    output: &OutputPair,
    expected_root: &[u8; 32],
) -> Result<bool> {
    if path.leaves.is_empty() || path.c1_layers.is_empty() {
        return Ok(false);
    }
    if !path.leaves.contains(output) {
        return Ok(false);
    }

    let tuples = derive_leaf_tuples_serial::<Cy>(&path.leaves)
        .ok_or_else(|| TreeError::InvalidData("invalid output among path leaves".into()))?;
    let flattened = flatten_leaf_tuples(&tuples);
    let leaf_hash = Cy::C1::hash_grow(
        &Cy::C1::hash_init_point(),
        0,
        &Cy::C1::zero_scalar(),
        &flattened,
    )
    .ok_or(TreeError::HashFailed {
        curve: Cy::C1::NAME,
    })?;
    let mut expected_member = <Cy::C1 as TreeCurve>::point_to_bytes(&leaf_hash);

    let n_layers = path.c1_layers.len() + path.c2_layers.len();
    for layer_idx in 0..n_layers {
        let chunk = if layer_idx % 2 == 0 {
            path.c1_layers.get(layer_idx / 2)
        } else {
            path.c2_layers.get(layer_idx / 2)
        }
        .ok_or_else(|| TreeError::InvalidData("path layer chunks out of balance".into()))?;

        if !chunk.contains(&expected_member) {
            return Ok(false);
        }
        if layer_idx == n_layers - 1 {
            return Ok(chunk.len() == 1 && chunk[0] == *expected_root);
        }

        expected_member = if layer_idx % 2 == 0 {
            hash_chunk_encoding::<Cy::C1, Cy::C2>(chunk, Cy::c1_point_to_c2_scalar)?
        } else {
            hash_chunk_encoding::<Cy::C2, Cy::C1>(chunk, Cy::c2_point_to_c1_scalar)?
        };
    }
    Ok(false)
}

/// Decode one layer's chunk, convert its members to the parent curve's
/// scalars, and hash them into the parent element's encoding.
fn hash_chunk_encoding<Child: TreeCurve, Parent: TreeCurve>(
    chunk: &[[u8; 32]],
    convert: impl Fn(&Child::Point) -> Parent::Scalar,
) -> Result<[u8; 32]> {
    let scalars = chunk
        .iter()
        .map(|bytes| Ok(convert(&Child::point_from_bytes(bytes)?)))
        .collect::<Result<Vec<_>>>()?;
    let hash = Parent::hash_grow(
        &Parent::hash_init_point(),
        0,
        &Parent::zero_scalar(),
        &scalars,
    )
    .ok_or(TreeError::HashFailed {
        curve: Parent::NAME,
    })?;
    Ok(Parent::point_to_bytes(&hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_cycle::{TestCurveA, TestCycle, test_output_pair};

    fn single_layer_path(pairs: &[OutputPair]) -> (OutputPath, [u8; 32]) {
        let tuples = derive_leaf_tuples_serial::<TestCycle>(pairs).unwrap();
        let flattened = flatten_leaf_tuples(&tuples);
        let root = TestCurveA::hash_grow(
            &TestCurveA::hash_init_point(),
            0,
            &TestCurveA::zero_scalar(),
            &flattened,
        )
        .unwrap();
        let root_bytes = TestCurveA::point_to_bytes(&root);
        let path = OutputPath {
            leaves: pairs.to_vec(),
            c1_layers: vec![vec![root_bytes]],
            c2_layers: vec![],
        };
        (path, root_bytes)
    }

    #[test]
    fn test_audits_single_layer_tree() {
        let pairs = vec![test_output_pair(1), test_output_pair(2)];
        let (path, root) = single_layer_path(&pairs);
        assert!(audit_path::<TestCycle>(&path, &pairs[0], &root));
        assert!(audit_path::<TestCycle>(&path, &pairs[1], &root));
    }

    #[test]
    fn test_rejects_foreign_output_and_wrong_root() {
        let pairs = vec![test_output_pair(1), test_output_pair(2)];
        let (path, root) = single_layer_path(&pairs);
        assert!(!audit_path::<TestCycle>(&path, &test_output_pair(3), &root));
        assert!(!audit_path::<TestCycle>(&path, &pairs[0], &[9u8; 32]));
    }

    #[test]
    fn test_rejects_tampered_leaf_chunk() {
        let pairs = vec![test_output_pair(1), test_output_pair(2)];
        let (mut path, root) = single_layer_path(&pairs);
        path.leaves[1] = test_output_pair(7);
        assert!(!audit_path::<TestCycle>(&path, &pairs[0], &root));
    }

    #[test]
    fn test_empty_path_never_authenticates() {
        let pair = test_output_pair(1);
        assert!(!audit_path::<TestCycle>(&OutputPath::empty(), &pair, &[0u8; 32]));
        assert!(OutputPath::empty().is_empty());
    }
}
