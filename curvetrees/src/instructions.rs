//! Pure chunk-boundary bookkeeping for growing and trimming one layer.
//!
//! Both calculators are stateless: they take the old and new child counts of
//! a layer plus the parent chunk width and describe exactly which existing
//! hashes the caller must supply to update the layer correctly. They never
//! touch curve arithmetic.

use crate::{Result, TreeError};

/// Instructions for growing one layer of the tree.
///
/// Consumed once by the chunked hasher. `need_old_last_child` /
/// `need_old_last_parent` name the existing values the caller has to fetch;
/// `start_offset` and `next_parent_start_index` position the first hash call
/// and the first written parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GrowLayerInstructions {
    /// Chunk width of the parent layer being produced.
    pub parent_chunk_width: u64,
    /// Child count before the extension.
    pub old_total_children: u64,
    /// Child count after the extension.
    pub new_total_children: u64,
    /// Parent count before the extension. A lone child is a provisional root
    /// and has no parent yet, so this is 0 when `old_total_children <= 1`.
    pub old_total_parents: u64,
    /// Parent count after the extension.
    pub new_total_parents: u64,
    /// The old layer was a lone provisional root; this layer is being set
    /// above it for the first time.
    pub setting_next_layer_after_old_root: bool,
    /// The first hash call continues the existing last parent, so its
    /// current value must be supplied.
    pub need_old_last_parent: bool,
    /// The old last child's value must be supplied: either it is being
    /// replaced in place, or (after an old root) re-included as the first
    /// member of the first real chunk.
    pub need_old_last_child: bool,
    /// In-chunk slot where the first hash call starts writing.
    pub start_offset: u64,
    /// Index of the first parent the extension writes. One less than
    /// `old_total_parents` when the existing last parent is being updated.
    pub next_parent_start_index: u64,
}

impl GrowLayerInstructions {
    /// Compute grow instructions for one layer.
    ///
    /// `last_child_will_change` is set when the layer below updated its own
    /// last hash, which replaces this layer's last child in place.
    pub fn new(
        old_total_children: u64,
        new_total_children: u64,
        parent_chunk_width: u64,
        last_child_will_change: bool,
    ) -> Result<Self> {
        if parent_chunk_width < 2 {
            return Err(TreeError::InvalidInput(
                "parent chunk width must be at least 2".into(),
            ));
        }
        if new_total_children < old_total_children
            || (new_total_children == old_total_children && !last_child_will_change)
        {
            return Err(TreeError::InvalidInput(format!(
                "layer must grow or replace its last child: old {}, new {}",
                old_total_children, new_total_children
            )));
        }

        let setting_next_layer_after_old_root = old_total_children == 1;
        let old_total_parents = if old_total_children > 1 {
            old_total_children.div_ceil(parent_chunk_width)
        } else {
            0
        };
        let new_total_parents = new_total_children.div_ceil(parent_chunk_width);

        if new_total_parents < old_total_parents {
            return Err(TreeError::InconsistentTree(
                "a growing layer lost parents".into(),
            ));
        }
        if new_total_parents >= new_total_children {
            return Err(TreeError::InconsistentTree(
                "parent layer must be strictly narrower than its children".into(),
            ));
        }

        if setting_next_layer_after_old_root {
            // The old root either changed (its new value is the first hash of
            // the layer below's extension) or must be re-fed as the first
            // member of the first real chunk.
            return Ok(GrowLayerInstructions {
                parent_chunk_width,
                old_total_children,
                new_total_children,
                old_total_parents,
                new_total_parents,
                setting_next_layer_after_old_root,
                need_old_last_parent: false,
                need_old_last_child: !last_child_will_change,
                start_offset: 0,
                next_parent_start_index: 0,
            });
        }

        let mut start_offset = if old_total_parents == 0 {
            0
        } else {
            old_total_children % parent_chunk_width
        };
        let mut need_old_last_child = false;
        if last_child_will_change {
            if old_total_children == 0 {
                return Err(TreeError::InvalidInput(
                    "no last child exists to change".into(),
                ));
            }
            // Step back one slot to rewrite the old last child in place.
            start_offset = if start_offset == 0 {
                parent_chunk_width - 1
            } else {
                start_offset - 1
            };
            need_old_last_child = true;
        }

        let adding_to_partial_chunk =
            old_total_parents > 0 && old_total_children % parent_chunk_width != 0;
        let need_old_last_parent = need_old_last_child || adding_to_partial_chunk;
        let next_parent_start_index = old_total_parents - u64::from(need_old_last_parent);

        Ok(GrowLayerInstructions {
            parent_chunk_width,
            old_total_children,
            new_total_children,
            old_total_parents,
            new_total_parents,
            setting_next_layer_after_old_root,
            need_old_last_parent,
            need_old_last_child,
            start_offset,
            next_parent_start_index,
        })
    }
}

/// Instructions for trimming one layer of the tree.
///
/// When children are actually removed from the boundary chunk, exactly one
/// strategy is chosen: `need_last_chunk_children_to_trim` (call `hash_trim`
/// with the removed children) or `need_last_chunk_remaining_children`
/// (cheaper to `hash_grow` a fresh chunk from the survivors). Neither applies
/// when the new boundary lands exactly on a chunk edge, though a pure
/// last-child replacement may still be required.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrimLayerInstructions {
    /// Chunk width of the parent layer being updated.
    pub parent_chunk_width: u64,
    /// Child count before the trim.
    pub old_total_children: u64,
    /// Child count after the trim.
    pub new_total_children: u64,
    /// Parent count before the trim.
    pub old_total_parents: u64,
    /// Parent count after the trim.
    pub new_total_parents: u64,
    /// The boundary chunk is touched at all (members removed or the last
    /// surviving child replaced).
    pub update_existing_last_hash: bool,
    /// Strategy: `hash_trim` with the removed children's values.
    pub need_last_chunk_children_to_trim: bool,
    /// Strategy: fresh `hash_grow` from only the remaining children.
    pub need_last_chunk_remaining_children: bool,
    /// The current boundary-chunk hash must be supplied (trim and
    /// replacement strategies; the grow-from-remaining strategy starts from
    /// the init point instead).
    pub need_existing_last_hash: bool,
    /// The last surviving child is itself being replaced, so its new value
    /// (the layer below's updated last hash) must be supplied.
    pub need_new_last_child: bool,
    /// In-chunk slot where the hash call starts.
    pub hash_offset: u64,
    /// Start (inclusive) of the absolute child-index range whose current
    /// values the caller must fetch.
    pub start_trim_idx: u64,
    /// End (exclusive) of that range.
    pub end_trim_idx: u64,
}

impl TrimLayerInstructions {
    /// Compute trim instructions for one layer.
    pub fn new(
        old_total_children: u64,
        new_total_children: u64,
        parent_chunk_width: u64,
        last_child_will_change: bool,
    ) -> Result<Self> {
        if parent_chunk_width < 2 {
            return Err(TreeError::InvalidInput(
                "parent chunk width must be at least 2".into(),
            ));
        }
        if new_total_children == 0 {
            return Err(TreeError::InvalidInput(
                "cannot trim a layer to zero children".into(),
            ));
        }
        if new_total_children > old_total_children
            || (new_total_children == old_total_children && !last_child_will_change)
        {
            return Err(TreeError::InvalidInput(format!(
                "layer must shrink or replace its last child: old {}, new {}",
                old_total_children, new_total_children
            )));
        }

        let old_total_parents = old_total_children.div_ceil(parent_chunk_width);
        let new_total_parents = new_total_children.div_ceil(parent_chunk_width);
        if new_total_parents > old_total_parents {
            return Err(TreeError::InconsistentTree(
                "a shrinking layer gained parents".into(),
            ));
        }

        let old_offset = old_total_children % parent_chunk_width;
        let new_offset = new_total_children % parent_chunk_width;

        // How many children the new boundary chunk currently holds.
        let boundary_chunk_old_children = if old_total_parents > new_total_parents
            || old_offset == 0
        {
            parent_chunk_width
        } else {
            old_offset
        };
        if new_offset > boundary_chunk_old_children {
            return Err(TreeError::InconsistentTree(
                "boundary chunk holds fewer children than will remain".into(),
            ));
        }

        // Children removed from the boundary chunk. Zero when the new
        // boundary lands exactly on a chunk edge.
        let trim_n_children = if new_offset == 0 {
            0
        } else {
            boundary_chunk_old_children - new_offset
        };

        // Removed <= remaining: trim. Removed > remaining: regrow from the
        // survivors instead.
        let need_last_chunk_children_to_trim =
            trim_n_children > 0 && trim_n_children <= new_offset;
        let need_last_chunk_remaining_children =
            trim_n_children > 0 && trim_n_children > new_offset;

        let update_existing_last_hash = trim_n_children > 0 || last_child_will_change;
        let need_existing_last_hash =
            need_last_chunk_children_to_trim || (trim_n_children == 0 && last_child_will_change);
        let need_new_last_child = last_child_will_change;

        let mut hash_offset = if update_existing_last_hash {
            new_offset
        } else {
            0
        };
        if last_child_will_change {
            // Step back one slot to rewrite the last surviving child.
            hash_offset = if hash_offset == 0 {
                parent_chunk_width - 1
            } else {
                hash_offset - 1
            };
        }

        let mut start_trim_idx = 0;
        let mut end_trim_idx = 0;
        if need_last_chunk_children_to_trim {
            start_trim_idx = new_total_children;
            end_trim_idx = new_total_children + trim_n_children;
            if last_child_will_change {
                // The old value of the changing child leads the removals.
                start_trim_idx -= 1;
            }
        } else if need_last_chunk_remaining_children {
            start_trim_idx = new_total_children - new_offset;
            end_trim_idx = new_total_children;
            if last_child_will_change {
                // The changing child's new value is supplied separately.
                end_trim_idx -= 1;
            }
        } else if last_child_will_change {
            // Pure replacement: only the old value of the last child.
            start_trim_idx = new_total_children - 1;
            end_trim_idx = new_total_children;
        }

        Ok(TrimLayerInstructions {
            parent_chunk_width,
            old_total_children,
            new_total_children,
            old_total_parents,
            new_total_parents,
            update_existing_last_hash,
            need_last_chunk_children_to_trim,
            need_last_chunk_remaining_children,
            need_existing_last_hash,
            need_new_last_child,
            hash_offset,
            start_trim_idx,
            end_trim_idx,
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::proptest;

    use super::*;

    #[test]
    fn test_grow_from_empty() {
        let instructions = GrowLayerInstructions::new(0, 5, 4, false).unwrap();
        assert_eq!(instructions.old_total_parents, 0);
        assert_eq!(instructions.new_total_parents, 2);
        assert!(!instructions.need_old_last_parent);
        assert!(!instructions.need_old_last_child);
        assert_eq!(instructions.start_offset, 0);
        assert_eq!(instructions.next_parent_start_index, 0);
    }

    #[test]
    fn test_grow_into_partial_chunk() {
        // 5 children at width 4: chunk 1 holds one child, appending
        // continues it.
        let instructions = GrowLayerInstructions::new(5, 9, 4, false).unwrap();
        assert_eq!(instructions.old_total_parents, 2);
        assert_eq!(instructions.new_total_parents, 3);
        assert!(instructions.need_old_last_parent);
        assert!(!instructions.need_old_last_child);
        assert_eq!(instructions.start_offset, 1);
        assert_eq!(instructions.next_parent_start_index, 1);
    }

    #[test]
    fn test_grow_from_full_chunk_boundary() {
        let instructions = GrowLayerInstructions::new(8, 9, 4, false).unwrap();
        assert!(!instructions.need_old_last_parent);
        assert_eq!(instructions.start_offset, 0);
        assert_eq!(instructions.next_parent_start_index, 2);
    }

    #[test]
    fn test_grow_with_changing_last_child() {
        // Last child replaced in place: offset steps back to its slot.
        let instructions = GrowLayerInstructions::new(5, 9, 4, true).unwrap();
        assert!(instructions.need_old_last_parent);
        assert!(instructions.need_old_last_child);
        assert_eq!(instructions.start_offset, 0);
        assert_eq!(instructions.next_parent_start_index, 1);

        // Full boundary chunk: offset wraps to the last slot.
        let instructions = GrowLayerInstructions::new(8, 9, 4, true).unwrap();
        assert!(instructions.need_old_last_parent);
        assert_eq!(instructions.start_offset, 3);
        assert_eq!(instructions.next_parent_start_index, 1);
    }

    #[test]
    fn test_grow_after_old_root() {
        // Unchanged old root is re-fed as the first chunk member.
        let instructions = GrowLayerInstructions::new(1, 3, 4, false).unwrap();
        assert!(instructions.setting_next_layer_after_old_root);
        assert_eq!(instructions.old_total_parents, 0);
        assert!(instructions.need_old_last_child);
        assert!(!instructions.need_old_last_parent);
        assert_eq!(instructions.next_parent_start_index, 0);

        // Changed old root arrives with the new children instead.
        let instructions = GrowLayerInstructions::new(1, 3, 4, true).unwrap();
        assert!(instructions.setting_next_layer_after_old_root);
        assert!(!instructions.need_old_last_child);
    }

    #[test]
    fn test_grow_replacement_only() {
        // Child count unchanged, last child replaced in place.
        let instructions = GrowLayerInstructions::new(2, 2, 4, true).unwrap();
        assert!(instructions.need_old_last_child);
        assert!(instructions.need_old_last_parent);
        assert_eq!(instructions.start_offset, 1);
        assert_eq!(instructions.next_parent_start_index, 0);
        assert_eq!(instructions.new_total_parents, 1);
    }

    #[test]
    fn test_grow_rejects_bad_input() {
        assert!(GrowLayerInstructions::new(3, 5, 1, false).is_err());
        assert!(GrowLayerInstructions::new(5, 5, 4, false).is_err());
        assert!(GrowLayerInstructions::new(5, 3, 4, false).is_err());
        assert!(GrowLayerInstructions::new(0, 2, 4, true).is_err());
    }

    #[test]
    fn test_trim_strategy_choice() {
        // 9 -> 7 at width 4: boundary chunk keeps 3, loses 1 -> trim.
        let instructions = TrimLayerInstructions::new(9, 7, 4, false).unwrap();
        assert!(instructions.need_last_chunk_children_to_trim);
        assert!(!instructions.need_last_chunk_remaining_children);
        assert!(instructions.need_existing_last_hash);
        assert_eq!(instructions.hash_offset, 3);
        assert_eq!((instructions.start_trim_idx, instructions.end_trim_idx), (7, 8));

        // 8 -> 5 at width 4: boundary chunk keeps 1, loses 3 -> regrow.
        let instructions = TrimLayerInstructions::new(8, 5, 4, false).unwrap();
        assert!(!instructions.need_last_chunk_children_to_trim);
        assert!(instructions.need_last_chunk_remaining_children);
        assert!(!instructions.need_existing_last_hash);
        assert_eq!((instructions.start_trim_idx, instructions.end_trim_idx), (4, 5));

        // Tie (removed == remaining) resolves to trim.
        let instructions = TrimLayerInstructions::new(8, 6, 4, false).unwrap();
        assert!(instructions.need_last_chunk_children_to_trim);
    }

    #[test]
    fn test_trim_on_chunk_edge() {
        // New boundary on a chunk edge: nothing removed from the surviving
        // boundary chunk.
        let instructions = TrimLayerInstructions::new(9, 8, 4, false).unwrap();
        assert!(!instructions.update_existing_last_hash);
        assert_eq!(instructions.new_total_parents, 2);

        // Same boundary, but the last child changed: pure replacement at the
        // final slot.
        let instructions = TrimLayerInstructions::new(9, 8, 4, true).unwrap();
        assert!(instructions.update_existing_last_hash);
        assert!(!instructions.need_last_chunk_children_to_trim);
        assert!(!instructions.need_last_chunk_remaining_children);
        assert!(instructions.need_existing_last_hash);
        assert_eq!(instructions.hash_offset, 3);
        assert_eq!((instructions.start_trim_idx, instructions.end_trim_idx), (7, 8));
    }

    #[test]
    fn test_trim_with_changing_last_child() {
        // Trim strategy: the changing child's old value leads the removals.
        let instructions = TrimLayerInstructions::new(9, 7, 4, true).unwrap();
        assert!(instructions.need_last_chunk_children_to_trim);
        assert!(instructions.need_new_last_child);
        assert_eq!(instructions.hash_offset, 2);
        assert_eq!((instructions.start_trim_idx, instructions.end_trim_idx), (6, 8));

        // Regrow strategy: the changing child is excluded from the fetch.
        let instructions = TrimLayerInstructions::new(8, 5, 4, true).unwrap();
        assert!(instructions.need_last_chunk_remaining_children);
        assert_eq!(instructions.hash_offset, 0);
        assert_eq!((instructions.start_trim_idx, instructions.end_trim_idx), (4, 4));
    }

    #[test]
    fn test_trim_replacement_only_equal_counts() {
        // Child count unchanged, last child replaced in place.
        let instructions = TrimLayerInstructions::new(2, 2, 4, true).unwrap();
        assert!(instructions.update_existing_last_hash);
        assert!(!instructions.need_last_chunk_children_to_trim);
        assert!(!instructions.need_last_chunk_remaining_children);
        assert!(instructions.need_existing_last_hash);
        assert!(instructions.need_new_last_child);
        assert_eq!(instructions.hash_offset, 1);
        assert_eq!((instructions.start_trim_idx, instructions.end_trim_idx), (1, 2));
    }

    #[test]
    fn test_trim_rejects_bad_input() {
        assert!(TrimLayerInstructions::new(9, 0, 4, false).is_err());
        assert!(TrimLayerInstructions::new(7, 7, 4, false).is_err());
        assert!(TrimLayerInstructions::new(5, 7, 4, false).is_err());
        assert!(TrimLayerInstructions::new(9, 7, 1, false).is_err());
    }

    proptest! {
        #[test]
        fn test_parent_counts_are_ceil(old in 0u64..300, added in 1u64..300, width in 2u64..9) {
            let instructions = GrowLayerInstructions::new(old, old + added, width, false).unwrap();
            assert_eq!(instructions.new_total_parents, (old + added).div_ceil(width));
            if old > 1 {
                assert_eq!(instructions.old_total_parents, old.div_ceil(width));
            }
        }

        #[test]
        fn test_trim_strategies_are_exclusive(old in 2u64..300, keep in 1u64..300, width in 2u64..9) {
            if keep < old {
                let instructions = TrimLayerInstructions::new(old, keep, width, false).unwrap();
                assert!(
                    !(instructions.need_last_chunk_children_to_trim
                        && instructions.need_last_chunk_remaining_children)
                );
                assert_eq!(instructions.new_total_parents, keep.div_ceil(width));
                let fetched = instructions.end_trim_idx - instructions.start_trim_idx;
                assert!(fetched <= width);
            }
        }
    }
}
