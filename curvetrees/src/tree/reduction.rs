//! Computing a [`TreeReduction`] removing the newest leaf tuples.

use super::{CurveTrees, LastHashes, LayerReduction, TreeReduction, TrimChildren};
use crate::{
    Result, TreeError,
    curve::{CurveCycle, TreeCurve},
    instructions::TrimLayerInstructions,
};

impl<Cy: CurveCycle> CurveTrees<Cy> {
    /// Compute the ordered per-layer trim instructions for shrinking the
    /// tree from `old_n_leaf_tuples` to `new_n_leaf_tuples` leaves.
    ///
    /// Leaf layer first, alternating curves upward, stopping once a layer's
    /// new parent count is 1. Layers above that point cease to exist and get
    /// no instruction.
    pub fn get_trim_instructions(
        &self,
        old_n_leaf_tuples: u64,
        new_n_leaf_tuples: u64,
    ) -> Result<Vec<TrimLayerInstructions>> {
        if new_n_leaf_tuples == 0 || new_n_leaf_tuples >= old_n_leaf_tuples {
            return Err(TreeError::InvalidInput(format!(
                "cannot trim from {} to {} leaf tuples",
                old_n_leaf_tuples, new_n_leaf_tuples
            )));
        }

        let old_counts = self.layer_counts(old_n_leaf_tuples);
        let mut instructions = vec![TrimLayerInstructions::new(
            old_n_leaf_tuples * 3,
            new_n_leaf_tuples * 3,
            self.leaf_chunk_width(),
            false,
        )?];

        let mut layer_idx: usize = 1;
        loop {
            let prev = &instructions[layer_idx - 1];
            if prev.new_total_parents <= 1 {
                break;
            }
            let old_children = old_counts.get(layer_idx - 1).copied().ok_or_else(|| {
                TreeError::InconsistentTree("old layer counts exhausted during trim".into())
            })?;
            let next = TrimLayerInstructions::new(
                old_children,
                prev.new_total_parents,
                self.parent_width(layer_idx),
                prev.update_existing_last_hash,
            )?;
            instructions.push(next);
            layer_idx += 1;
        }

        Ok(instructions)
    }

    /// Apply trim instructions bottom-up, producing the per-layer updated
    /// boundary hashes.
    ///
    /// `children_to_trim` must cover each instruction's
    /// `[start_trim_idx, end_trim_idx)` fetch range. `last_hashes` must
    /// carry, per instruction layer, the current value of the element that
    /// remains the layer's boundary after the trim (index
    /// `new_total_parents - 1`); when the parent count shrinks this is not
    /// the layer's current last element. Pure function of its inputs.
    pub fn get_tree_reduction(
        &self,
        trim_instructions: &[TrimLayerInstructions],
        children_to_trim: &TrimChildren<Cy>,
        last_hashes: &LastHashes<Cy>,
    ) -> Result<TreeReduction<Cy>> {
        let first = trim_instructions
            .first()
            .ok_or_else(|| TreeError::InvalidInput("no trim instructions supplied".into()))?;

        let mut c1_layer_reductions: Vec<LayerReduction<_>> = Vec::new();
        let mut c2_layer_reductions: Vec<LayerReduction<_>> = Vec::new();
        let mut hash_calls = 0u64;

        for (layer_idx, instructions) in trim_instructions.iter().enumerate() {
            if layer_idx % 2 == 0 {
                let new_last_child = if instructions.need_new_last_child {
                    c2_layer_reductions
                        .last()
                        .and_then(|red| red.new_last_hash.as_ref())
                        .map(Cy::c2_point_to_c1_scalar)
                } else {
                    None
                };
                let reduction = reduce_layer::<Cy::C1>(
                    instructions,
                    children_to_trim.c1.get(layer_idx / 2).map(Vec::as_slice),
                    last_hashes.c1.get(layer_idx / 2),
                    new_last_child,
                    &mut hash_calls,
                )?;
                c1_layer_reductions.push(reduction);
            } else {
                let new_last_child = if instructions.need_new_last_child {
                    c1_layer_reductions
                        .last()
                        .and_then(|red| red.new_last_hash.as_ref())
                        .map(Cy::c1_point_to_c2_scalar)
                } else {
                    None
                };
                let reduction = reduce_layer::<Cy::C2>(
                    instructions,
                    children_to_trim.c2.get(layer_idx / 2).map(Vec::as_slice),
                    last_hashes.c2.get(layer_idx / 2),
                    new_last_child,
                    &mut hash_calls,
                )?;
                c2_layer_reductions.push(reduction);
            }
        }

        Ok(TreeReduction {
            new_total_leaf_tuples: first.new_total_children / 3,
            c1_layer_reductions,
            c2_layer_reductions,
            hash_calls,
        })
    }
}

/// Update one layer's boundary hash per its trim instructions.
fn reduce_layer<P: TreeCurve>(
    instructions: &TrimLayerInstructions,
    children: Option<&[P::Scalar]>,
    existing_last_hash: Option<&P::Point>,
    new_last_child: Option<P::Scalar>,
    hash_calls: &mut u64,
) -> Result<LayerReduction<P::Point>> {
    if !instructions.update_existing_last_hash {
        return Ok(LayerReduction {
            update_existing_last_hash: false,
            new_last_hash: None,
        });
    }

    let expected = (instructions.end_trim_idx - instructions.start_trim_idx) as usize;
    let children = match children {
        Some(slice) if slice.len() == expected => slice,
        Some(slice) => {
            return Err(TreeError::InvalidInput(format!(
                "trim expected {} children, got {}",
                expected,
                slice.len()
            )));
        }
        None if expected == 0 => &[][..],
        None => {
            return Err(TreeError::InvalidInput(
                "missing children for layer trim".into(),
            ));
        }
    };
    let new_last_child = if instructions.need_new_last_child {
        Some(new_last_child.ok_or_else(|| {
            TreeError::InconsistentTree("layer below produced no updated boundary hash".into())
        })?)
    } else {
        None
    };

    let new_hash = if instructions.need_last_chunk_children_to_trim {
        let existing = missing_hash_check(existing_last_hash)?;
        let restore = match &new_last_child {
            Some(child) => child.clone(),
            None => P::zero_scalar(),
        };
        P::hash_trim(existing, instructions.hash_offset, children, &restore)
            .ok_or(TreeError::HashFailed { curve: P::NAME })?
    } else if instructions.need_last_chunk_remaining_children {
        let mut members = children.to_vec();
        if let Some(child) = new_last_child {
            members.push(child);
        }
        P::hash_grow(&P::hash_init_point(), 0, &P::zero_scalar(), &members)
            .ok_or(TreeError::HashFailed { curve: P::NAME })?
    } else {
        // Pure replacement of the last surviving child.
        let existing = missing_hash_check(existing_last_hash)?;
        let prior = children.first().ok_or_else(|| {
            TreeError::InvalidInput("missing prior value of the replaced child".into())
        })?;
        let child = new_last_child.ok_or_else(|| {
            TreeError::InconsistentTree("replacement trim without an updated child".into())
        })?;
        P::hash_grow(existing, instructions.hash_offset, prior, &[child])
            .ok_or(TreeError::HashFailed { curve: P::NAME })?
    };
    *hash_calls += 1;

    Ok(LayerReduction {
        update_existing_last_hash: true,
        new_last_hash: Some(new_hash),
    })
}

fn missing_hash_check<P>(hash: Option<&P>) -> Result<&P> {
    hash.ok_or_else(|| TreeError::InvalidInput("missing existing boundary hash for trim".into()))
}
