//! Computing a [`TreeExtension`] for one batch of new outputs.

use rayon::prelude::*;

use super::{CurveTrees, LastHashes, LayerExtension, TreeExtension};
use crate::{
    Result, TreeError,
    curve::{CurveCycle, LeafTuple, OutputContext, TreeCurve, flatten_leaf_tuples},
    hasher::hash_layer_chunks,
    instructions::GrowLayerInstructions,
};

impl<Cy: CurveCycle> CurveTrees<Cy> {
    /// Compute the delta appending `new_outputs` to a tree currently holding
    /// `old_n_leaf_tuples` leaves.
    ///
    /// `existing_last_hashes` must carry the boundary hash of every existing
    /// layer. Outputs are sorted by `output_id`; invalid ones are silently
    /// excluded, so the returned extension's leaf count may be smaller than
    /// the batch. Pure function of its inputs; nothing is applied anywhere.
    pub fn get_tree_extension(
        &self,
        old_n_leaf_tuples: u64,
        existing_last_hashes: &LastHashes<Cy>,
        mut new_outputs: Vec<OutputContext>,
    ) -> Result<TreeExtension<Cy>> {
        new_outputs.sort_by_key(|ctx| ctx.output_id);

        // Stage 1: parallel validity filter into the intermediate
        // representation.
        let pre_leaves: Vec<(OutputContext, Cy::PreLeaf)> = self.pool.install(|| {
            new_outputs
                .par_iter()
                .filter_map(|ctx| Cy::output_to_pre_leaf(&ctx.pair).map(|pre| (*ctx, pre)))
                .collect()
        });

        if pre_leaves.is_empty() {
            return Ok(TreeExtension {
                leaf_start_idx: old_n_leaf_tuples,
                leaves: Vec::new(),
                c1_layer_extensions: Vec::new(),
                c2_layer_extensions: Vec::new(),
                hash_calls: 0,
            });
        }

        // Stage 2: one batched inversion across the whole block.
        let denominators: Vec<_> = pre_leaves
            .iter()
            .map(|(_, pre)| Cy::pre_leaf_denominator(pre))
            .collect();
        let inverses = Cy::batch_invert(&denominators)
            .ok_or_else(|| TreeError::InvalidData("batched inversion failed".into()))?;

        // Stage 3: parallel finish to the final tuples.
        let tuples: Vec<LeafTuple<Cy::C1>> = self.pool.install(|| {
            pre_leaves
                .par_iter()
                .zip(inverses.par_iter())
                .map(|((_, pre), inverse)| Cy::finish_leaf(pre, inverse))
                .collect()
        });
        let leaves: Vec<OutputContext> = pre_leaves.into_iter().map(|(ctx, _)| ctx).collect();

        let new_n_leaf_tuples = old_n_leaf_tuples + tuples.len() as u64;
        let mut hash_calls = 0u64;

        // Leaf layer: flattened scalars, leaves never replaced in place.
        let leaf_width = self.leaf_chunk_width();
        let leaf_instructions = GrowLayerInstructions::new(
            old_n_leaf_tuples * 3,
            new_n_leaf_tuples * 3,
            leaf_width,
            false,
        )?;
        let existing = if leaf_instructions.need_old_last_parent {
            Some(existing_last_hashes.c1.first().ok_or_else(|| {
                TreeError::InvalidInput("missing boundary hash of the first hash layer".into())
            })?)
        } else {
            None
        };
        let flattened = flatten_leaf_tuples(&tuples);
        let hashes = hash_layer_chunks::<Cy::C1>(
            &self.pool,
            existing,
            None,
            leaf_instructions.start_offset,
            leaf_width,
            &flattened,
        )?;
        hash_calls += hashes.len() as u64;

        let mut c1_layer_extensions = vec![LayerExtension {
            start_idx: leaf_instructions.next_parent_start_index,
            update_existing_last_hash: leaf_instructions.need_old_last_parent,
            hashes,
        }];
        let mut c2_layer_extensions: Vec<LayerExtension<_>> = Vec::new();

        // Climb: each layer's children are the previous layer's hashes,
        // cycle-converted. Stop at a lone parent.
        let old_counts = self.layer_counts(old_n_leaf_tuples);
        let mut layer_idx: usize = 1;
        let mut prev_new_count = {
            let first = &c1_layer_extensions[0];
            first.start_idx + first.hashes.len() as u64
        };
        while prev_new_count > 1 {
            let old_children = old_counts.get(layer_idx - 1).copied().unwrap_or(0);
            let width = self.parent_width(layer_idx);
            let next_count;
            if layer_idx % 2 == 1 {
                let child_ext = c1_layer_extensions.last().ok_or_else(missing_child_layer)?;
                let ext = grow_next_layer::<Cy::C1, Cy::C2>(
                    &self.pool,
                    width,
                    old_children,
                    child_ext,
                    existing_last_hashes.c1.get((layer_idx - 1) / 2),
                    existing_last_hashes.c2.get((layer_idx - 1) / 2),
                    Cy::c1_point_to_c2_scalar,
                    &mut hash_calls,
                )?;
                next_count = ext.start_idx + ext.hashes.len() as u64;
                c2_layer_extensions.push(ext);
            } else {
                let child_ext = c2_layer_extensions.last().ok_or_else(missing_child_layer)?;
                let ext = grow_next_layer::<Cy::C2, Cy::C1>(
                    &self.pool,
                    width,
                    old_children,
                    child_ext,
                    existing_last_hashes.c2.get((layer_idx - 2) / 2),
                    existing_last_hashes.c1.get(layer_idx / 2),
                    Cy::c2_point_to_c1_scalar,
                    &mut hash_calls,
                )?;
                next_count = ext.start_idx + ext.hashes.len() as u64;
                c1_layer_extensions.push(ext);
            }
            if next_count >= prev_new_count {
                return Err(TreeError::InconsistentTree(
                    "layer climb is not making progress".into(),
                ));
            }
            prev_new_count = next_count;
            layer_idx += 1;
        }

        Ok(TreeExtension {
            leaf_start_idx: old_n_leaf_tuples,
            leaves,
            c1_layer_extensions,
            c2_layer_extensions,
            hash_calls,
        })
    }
}

fn missing_child_layer() -> TreeError {
    TreeError::InconsistentTree("child layer extension missing during climb".into())
}

/// Grow one interior layer from the layer beneath it.
///
/// `child_extension.hashes` carry the below layer's new values; when that
/// layer updated its last element, the first of them replaces this layer's
/// last child in place. In the after-old-root case the unchanged old root is
/// re-fed as the first member of the first real chunk.
fn grow_next_layer<Child: TreeCurve, Parent: TreeCurve>(
    pool: &rayon::ThreadPool,
    parent_chunk_width: u64,
    old_children: u64,
    child_extension: &LayerExtension<Child::Point>,
    old_last_child: Option<&Child::Point>,
    old_last_parent: Option<&Parent::Point>,
    convert: impl Fn(&Child::Point) -> Parent::Scalar,
    hash_calls: &mut u64,
) -> Result<LayerExtension<Parent::Point>> {
    let new_children = child_extension.start_idx + child_extension.hashes.len() as u64;
    let instructions = GrowLayerInstructions::new(
        old_children,
        new_children,
        parent_chunk_width,
        child_extension.update_existing_last_hash,
    )?;

    let mut children: Vec<Parent::Scalar> =
        child_extension.hashes.iter().map(&convert).collect();

    let mut prior_child = None;
    if instructions.need_old_last_child {
        let old_child = old_last_child.ok_or_else(|| {
            TreeError::InvalidInput("missing boundary hash of the child layer".into())
        })?;
        if instructions.setting_next_layer_after_old_root {
            children.insert(0, convert(old_child));
        } else {
            prior_child = Some(convert(old_child));
        }
    }
    let existing = if instructions.need_old_last_parent {
        Some(old_last_parent.ok_or_else(|| {
            TreeError::InvalidInput("missing boundary hash of the parent layer".into())
        })?)
    } else {
        None
    };

    let hashes = hash_layer_chunks::<Parent>(
        pool,
        existing,
        prior_child.as_ref(),
        instructions.start_offset,
        parent_chunk_width,
        &children,
    )?;
    *hash_calls += hashes.len() as u64;

    Ok(LayerExtension {
        start_idx: instructions.next_parent_start_index,
        update_existing_last_hash: instructions.need_old_last_parent,
        hashes,
    })
}
