//! Reorg-aware maintenance of registered outputs' membership paths.

use std::{
    cell::Cell,
    cmp::Ordering,
    collections::{HashMap, VecDeque},
    marker::PhantomData,
};

use curvetrees::{
    CurveCycle, CurveTrees, LastHashes, OutputContext, OutputPair, OutputPath, TreeCurve,
    TreeExtension, TrimChildren, TrimLayerInstructions, derive_leaf_tuples_serial,
    flatten_leaf_tuples,
};

use crate::{
    cache::{BlockMeta, CachedLeaf, CachedTreeChunk, ChunkKey, OutputRef, RegisteredOutput},
    error::{Result, SyncError},
};

/// Single-threaded cache that keeps every registered output's path current
/// across block syncs and bounded reorgs.
///
/// Not `Sync`: all calls must come from one logical thread of control.
/// Callers needing concurrency must serialize externally.
///
/// Every cache entry is reference-counted. References come from two places:
/// assigned outputs hold their leaf chunk plus one chunk per non-root layer
/// on their path, and each retained block pins its state's boundary chunks so
/// [`pop_block`](Self::pop_block) can rebuild the prior last hashes. An entry
/// is dropped the moment its count reaches zero.
#[derive(Debug)]
pub struct TreeSync<Cy: CurveCycle> {
    pub(crate) curve_trees: CurveTrees<Cy>,
    pub(crate) max_reorg_depth: u64,
    pub(crate) n_leaf_tuples: u64,
    pub(crate) registered: HashMap<OutputRef, RegisteredOutput>,
    pub(crate) leaf_cache: HashMap<u64, CachedLeaf>,
    pub(crate) chunk_cache: HashMap<ChunkKey, CachedTreeChunk>,
    pub(crate) block_window: VecDeque<BlockMeta>,
    pub(crate) n_evicted_blocks: u64,
    pub(crate) _single_thread: PhantomData<Cell<()>>,
}

impl<Cy: CurveCycle> TreeSync<Cy> {
    /// Start an empty cache. Up to `max_reorg_depth` blocks can be popped
    /// off the tip once the window has filled.
    pub fn new(curve_trees: CurveTrees<Cy>, max_reorg_depth: u64) -> Self {
        TreeSync {
            curve_trees,
            max_reorg_depth,
            n_leaf_tuples: 0,
            registered: HashMap::new(),
            leaf_cache: HashMap::new(),
            chunk_cache: HashMap::new(),
            block_window: VecDeque::new(),
            n_evicted_blocks: 0,
            _single_thread: PhantomData,
        }
    }

    /// The tree orchestrator this cache syncs with.
    pub fn curve_trees(&self) -> &CurveTrees<Cy> {
        &self.curve_trees
    }

    /// Current leaf-tuple count.
    pub fn n_leaf_tuples(&self) -> u64 {
        self.n_leaf_tuples
    }

    /// Total number of blocks ever synced, retained or evicted.
    pub fn n_synced_blocks(&self) -> u64 {
        self.n_evicted_blocks + self.block_window.len() as u64
    }

    /// Number of registered outputs, assigned or not.
    pub fn registered_count(&self) -> usize {
        self.registered.len()
    }

    /// Configured reorg tolerance.
    pub fn max_reorg_depth(&self) -> u64 {
        self.max_reorg_depth
    }

    /// Canonical encoding of the current root, `None` for an empty tree.
    pub fn tree_root(&self) -> Option<[u8; 32]> {
        let counts = self.curve_trees.layer_counts(self.n_leaf_tuples);
        let root_layer = counts.len().checked_sub(1)? as u32;
        let key = ChunkKey {
            layer_idx: root_layer,
            chunk_idx: 0,
        };
        self.chunk_cache
            .get(&key)
            .and_then(|chunk| chunk.members.first().copied())
    }

    /// Ask the cache to maintain `pair`'s path from its unlock block on.
    ///
    /// `Ok(false)` if this exact pair is already registered. Errs once the
    /// tip has reached `unlock_block_idx`: the leaf index could no longer be
    /// recovered. Distinct commitments sharing a pubkey register
    /// independently.
    pub fn register_output(&mut self, pair: OutputPair, unlock_block_idx: u64) -> Result<bool> {
        if let Some(tip) = self.block_window.back() {
            if tip.blk_idx >= unlock_block_idx {
                return Err(SyncError::RegisterAfterUnlock {
                    unlock_block_idx,
                    tip_blk_idx: tip.blk_idx,
                });
            }
        }
        let output_ref = OutputRef::new(&pair);
        if self.registered.contains_key(&output_ref) {
            return Ok(false);
        }
        self.registered.insert(
            output_ref,
            RegisteredOutput {
                pair,
                unlock_block_idx,
                assigned_leaf_idx: None,
            },
        );
        Ok(true)
    }

    /// Apply one block on top of the current tip.
    ///
    /// `new_outputs` are the outputs unlocking in this block; registered
    /// pairs among them get their leaf index assigned. The extension is
    /// computed purely first; caches are only touched after it succeeds.
    pub fn sync_block(
        &mut self,
        blk_idx: u64,
        blk_hash: [u8; 32],
        prev_blk_hash: [u8; 32],
        new_outputs: Vec<OutputContext>,
    ) -> Result<()> {
        if let Some(tip) = self.block_window.back() {
            if tip.blk_hash != prev_blk_hash || tip.blk_idx + 1 != blk_idx {
                return Err(SyncError::NonContiguousBlock(format!(
                    "block {} does not extend tip {}",
                    blk_idx, tip.blk_idx
                )));
            }
        }

        let old_n = self.n_leaf_tuples;
        let last_hashes = self.cached_last_hashes()?;
        let ext = self
            .curve_trees
            .get_tree_extension(old_n, &last_hashes, new_outputs)?;
        let new_n = old_n + ext.leaves.len() as u64;
        let new_pairs: Vec<OutputPair> = ext.leaves.iter().map(|ctx| ctx.pair).collect();
        let layer_content = extension_content(&ext);

        let w1 = self.curve_trees.c1_width();
        let old_n_layers = self.curve_trees.n_layers(old_n);

        // Already-assigned outputs: count the leaves filling their chunk and
        // any layer that stops being the root.
        let assigned: Vec<u64> = self
            .registered
            .values()
            .filter_map(|out| out.assigned_leaf_idx)
            .collect();
        for leaf_idx in &assigned {
            let chunk_start = self.leaf_chunk_start(*leaf_idx);
            for l in old_n.max(chunk_start)..new_n.min(chunk_start + w1) {
                self.add_leaf_ref(l, pair_at(&new_pairs, old_n, l))?;
            }
            for key in self.path_chunk_keys(*leaf_idx, new_n) {
                if key.layer_idx + 1 >= old_n_layers {
                    self.add_chunk_ref(key);
                }
            }
        }

        // Newly-unlocking registrations get their leaf index and a full path.
        let mut newly_assigned = Vec::new();
        for (offset, ctx) in ext.leaves.iter().enumerate() {
            let output_ref = OutputRef::new(&ctx.pair);
            if let Some(out) = self.registered.get_mut(&output_ref) {
                if out.assigned_leaf_idx.is_none() {
                    let leaf_idx = old_n + offset as u64;
                    out.assigned_leaf_idx = Some(leaf_idx);
                    newly_assigned.push(leaf_idx);
                }
            }
        }
        for leaf_idx in newly_assigned {
            let (start, end) = self.leaf_chunk_range(leaf_idx, new_n);
            for l in start..end {
                self.add_leaf_ref(l, pair_at(&new_pairs, old_n, l))?;
            }
            for key in self.path_chunk_keys(leaf_idx, new_n) {
                self.add_chunk_ref(key);
            }
        }

        // Retained blocks whose boundary leaf chunk is still filling extend
        // their pin over the new members; popping back to them must be able
        // to fetch the removed leaves.
        let mut pin_extensions = Vec::new();
        for (idx, meta) in self.block_window.iter().enumerate() {
            if meta.n_leaf_tuples == 0 {
                continue;
            }
            let chunk_cap = self.leaf_chunk_start(meta.n_leaf_tuples - 1) + w1;
            let new_end = chunk_cap.min(new_n);
            if new_end > meta.pinned_leaf_end {
                pin_extensions.push((idx, meta.pinned_leaf_end, new_end));
            }
        }
        for (idx, from, to) in pin_extensions {
            for l in from..to {
                self.add_leaf_ref(l, pair_at(&new_pairs, old_n, l))?;
            }
            self.block_window[idx].pinned_leaf_end = to;
        }

        // Pin the new tip's boundary chunks and boundary leaf chunk.
        let pinned_chunks = self.boundary_chunk_keys(new_n);
        for key in &pinned_chunks {
            self.add_chunk_ref(*key);
        }
        let (pinned_leaf_start, pinned_leaf_end) = if new_n == 0 {
            (0, 0)
        } else {
            (self.leaf_chunk_start(new_n - 1), new_n)
        };
        for l in pinned_leaf_start..pinned_leaf_end {
            self.add_leaf_ref(l, pair_at(&new_pairs, old_n, l))?;
        }

        // Fill every referenced chunk with the extension's elements. Chunks
        // nobody references are skipped; chunks created above receive their
        // members in order.
        for (layer_idx, (start_idx, content)) in layer_content.iter().enumerate() {
            let layer_idx = layer_idx as u32;
            let width = self.curve_trees.layer_chunk_width(layer_idx);
            for (t, bytes) in content.iter().enumerate() {
                let element_idx = start_idx + t as u64;
                let key = ChunkKey {
                    layer_idx,
                    chunk_idx: element_idx / width,
                };
                let Some(chunk) = self.chunk_cache.get_mut(&key) else {
                    continue;
                };
                let slot = (element_idx % width) as usize;
                match chunk.members.len().cmp(&slot) {
                    Ordering::Equal => chunk.members.push(*bytes),
                    Ordering::Greater => chunk.members[slot] = *bytes,
                    Ordering::Less => {
                        return Err(SyncError::CorruptedCache(format!(
                            "chunk ({}, {}) missing members before slot {}",
                            key.layer_idx, key.chunk_idx, slot
                        )));
                    }
                }
            }
        }

        self.n_leaf_tuples = new_n;
        self.block_window.push_back(BlockMeta {
            blk_idx,
            blk_hash,
            n_leaf_tuples: new_n,
            pinned_chunks,
            pinned_leaf_start,
            pinned_leaf_end,
        });

        // Evict past the window; references the evicted block uniquely held
        // disappear with it.
        if self.block_window.len() as u64 > self.max_reorg_depth + 1 {
            if let Some(evicted) = self.block_window.pop_front() {
                for key in evicted.pinned_chunks {
                    self.release_chunk_ref(key)?;
                }
                for l in evicted.pinned_leaf_start..evicted.pinned_leaf_end {
                    self.release_leaf_ref(l)?;
                }
                self.n_evicted_blocks += 1;
            }
        }
        Ok(())
    }

    /// Undo the tip block.
    ///
    /// `Ok(false)` when no history remains at all. Errs with
    /// [`SyncError::ReorgDepthExceeded`] when the pre-state is older than
    /// the retained window. The reduction is computed purely from cache
    /// before anything is mutated.
    pub fn pop_block(&mut self) -> Result<bool> {
        let Some(popped) = self.block_window.back().cloned() else {
            return Ok(false);
        };
        let target_n = if self.block_window.len() >= 2 {
            self.block_window[self.block_window.len() - 2].n_leaf_tuples
        } else if self.n_evicted_blocks == 0 {
            0
        } else {
            return Err(SyncError::ReorgDepthExceeded(format!(
                "block {} is the oldest retained block",
                popped.blk_idx
            )));
        };
        let old_n = self.n_leaf_tuples;

        let reduction = if target_n > 0 && target_n < old_n {
            let instructions = self.curve_trees.get_trim_instructions(old_n, target_n)?;
            let children = self.gather_trim_children(&instructions)?;
            let last_hashes = self.trim_last_hashes(&instructions)?;
            let reduction =
                self.curve_trees
                    .get_tree_reduction(&instructions, &children, &last_hashes)?;
            Some((instructions, reduction))
        } else {
            None
        };

        let old_n_layers = self.curve_trees.n_layers(old_n);
        let new_n_layers = self.curve_trees.n_layers(target_n);
        let w1 = self.curve_trees.c1_width();

        // Invalidated outputs lose their whole path; survivors only the
        // parts that vanish with the trimmed leaves.
        let assigned: Vec<(OutputRef, u64)> = self
            .registered
            .iter()
            .filter_map(|(output_ref, out)| out.assigned_leaf_idx.map(|i| (*output_ref, i)))
            .collect();
        for (output_ref, leaf_idx) in assigned {
            if leaf_idx >= target_n {
                let (start, end) = self.leaf_chunk_range(leaf_idx, old_n);
                for l in start..end {
                    self.release_leaf_ref(l)?;
                }
                for key in self.path_chunk_keys(leaf_idx, old_n) {
                    self.release_chunk_ref(key)?;
                }
                if let Some(out) = self.registered.get_mut(&output_ref) {
                    out.assigned_leaf_idx = None;
                }
            } else {
                let chunk_start = self.leaf_chunk_start(leaf_idx);
                for l in target_n.max(chunk_start)..old_n.min(chunk_start + w1) {
                    self.release_leaf_ref(l)?;
                }
                if old_n_layers > new_n_layers {
                    for key in self.path_chunk_keys(leaf_idx, old_n) {
                        if key.layer_idx + 1 >= new_n_layers {
                            self.release_chunk_ref(key)?;
                        }
                    }
                }
            }
        }

        // Retained blocks drop pinned leaves past the new count.
        let window_len = self.block_window.len();
        let mut pin_releases = Vec::new();
        for meta in self.block_window.iter_mut().take(window_len - 1) {
            if meta.pinned_leaf_end > target_n {
                let from = target_n.max(meta.pinned_leaf_start);
                pin_releases.push((from, meta.pinned_leaf_end));
                meta.pinned_leaf_end = from;
            }
        }
        for (from, to) in pin_releases {
            for l in from..to {
                self.release_leaf_ref(l)?;
            }
        }

        // The popped block's own pins.
        for key in popped.pinned_chunks.iter() {
            self.release_chunk_ref(*key)?;
        }
        for l in popped.pinned_leaf_start..popped.pinned_leaf_end {
            self.release_leaf_ref(l)?;
        }
        self.block_window.pop_back();

        // Shrink surviving boundary chunks and write the updated hashes.
        if let Some((instructions, reduction)) = reduction {
            let counts = self.curve_trees.layer_counts(target_n);
            for (layer_idx, _) in instructions.iter().enumerate() {
                let count = counts.get(layer_idx).copied().ok_or_else(|| {
                    SyncError::CorruptedCache("trim instructions exceed the new tree".into())
                })?;
                let width = self.curve_trees.layer_chunk_width(layer_idx as u32);
                let key = ChunkKey {
                    layer_idx: layer_idx as u32,
                    chunk_idx: (count - 1) / width,
                };
                let keep = ((count - 1) % width + 1) as usize;
                let missing_layer =
                    || SyncError::CorruptedCache(format!("reduction lost layer {layer_idx}"));
                let (update, new_last) = if layer_idx % 2 == 0 {
                    let layer = reduction
                        .c1_layer_reductions
                        .get(layer_idx / 2)
                        .ok_or_else(missing_layer)?;
                    (
                        layer.update_existing_last_hash,
                        layer
                            .new_last_hash
                            .as_ref()
                            .map(<Cy::C1 as TreeCurve>::point_to_bytes),
                    )
                } else {
                    let layer = reduction
                        .c2_layer_reductions
                        .get(layer_idx / 2)
                        .ok_or_else(missing_layer)?;
                    (
                        layer.update_existing_last_hash,
                        layer
                            .new_last_hash
                            .as_ref()
                            .map(<Cy::C2 as TreeCurve>::point_to_bytes),
                    )
                };
                let chunk = self.chunk_cache.get_mut(&key).ok_or_else(|| {
                    SyncError::CorruptedCache(format!(
                        "boundary chunk ({}, {}) missing after pop",
                        key.layer_idx, key.chunk_idx
                    ))
                })?;
                if chunk.members.len() < keep {
                    return Err(SyncError::CorruptedCache(format!(
                        "boundary chunk ({}, {}) holds {} members, expected at least {}",
                        key.layer_idx,
                        key.chunk_idx,
                        chunk.members.len(),
                        keep
                    )));
                }
                chunk.members.truncate(keep);
                if update {
                    let bytes = new_last.ok_or_else(|| {
                        SyncError::CorruptedCache("updated layer produced no hash".into())
                    })?;
                    if let Some(last) = chunk.members.last_mut() {
                        *last = bytes;
                    }
                }
            }
        }

        self.n_leaf_tuples = target_n;
        Ok(true)
    }

    /// Rebuild `pair`'s full path from cache.
    ///
    /// Errs if the pair was never registered; the empty path if registered
    /// but not yet in the tree.
    pub fn get_output_path(&self, pair: &OutputPair) -> Result<OutputPath> {
        let output = self
            .registered
            .get(&OutputRef::new(pair))
            .ok_or(SyncError::NotRegistered)?;
        let Some(leaf_idx) = output.assigned_leaf_idx else {
            return Ok(OutputPath::empty());
        };

        let (start, end) = self.leaf_chunk_range(leaf_idx, self.n_leaf_tuples);
        let mut leaves = Vec::with_capacity((end - start) as usize);
        for l in start..end {
            let leaf = self
                .leaf_cache
                .get(&l)
                .ok_or_else(|| SyncError::CorruptedCache(format!("missing cached leaf {l}")))?;
            leaves.push(leaf.pair);
        }

        let n_layers = self.curve_trees.n_layers(self.n_leaf_tuples);
        let mut c1_layers = Vec::new();
        let mut c2_layers = Vec::new();
        let mut element_idx = leaf_idx / self.curve_trees.c1_width();
        for layer_idx in 0..n_layers {
            let width = self.curve_trees.layer_chunk_width(layer_idx);
            let key = ChunkKey {
                layer_idx,
                chunk_idx: element_idx / width,
            };
            let chunk = self.chunk_cache.get(&key).ok_or_else(|| {
                SyncError::CorruptedCache(format!(
                    "missing path chunk ({}, {})",
                    key.layer_idx, key.chunk_idx
                ))
            })?;
            if layer_idx % 2 == 0 {
                c1_layers.push(chunk.members.clone());
            } else {
                c2_layers.push(chunk.members.clone());
            }
            element_idx /= width;
        }

        Ok(OutputPath {
            leaves,
            c1_layers,
            c2_layers,
        })
    }

    // ---- internal bookkeeping ----

    fn leaf_chunk_start(&self, leaf_idx: u64) -> u64 {
        let w1 = self.curve_trees.c1_width();
        (leaf_idx / w1) * w1
    }

    fn leaf_chunk_range(&self, leaf_idx: u64, n_leaf_tuples: u64) -> (u64, u64) {
        let start = self.leaf_chunk_start(leaf_idx);
        (
            start,
            n_leaf_tuples.min(start + self.curve_trees.c1_width()),
        )
    }

    /// Chunk keys on a leaf's path, root layer excluded (the root chunk is
    /// held by the tip's pins instead).
    fn path_chunk_keys(&self, leaf_idx: u64, n_leaf_tuples: u64) -> Vec<ChunkKey> {
        let n_layers = self.curve_trees.n_layers(n_leaf_tuples);
        let mut keys = Vec::new();
        let mut element_idx = leaf_idx / self.curve_trees.c1_width();
        for layer_idx in 0..n_layers.saturating_sub(1) {
            let width = self.curve_trees.layer_chunk_width(layer_idx);
            keys.push(ChunkKey {
                layer_idx,
                chunk_idx: element_idx / width,
            });
            element_idx /= width;
        }
        keys
    }

    /// Boundary chunk of every layer at a leaf count, root included.
    fn boundary_chunk_keys(&self, n_leaf_tuples: u64) -> Vec<ChunkKey> {
        self.curve_trees
            .layer_counts(n_leaf_tuples)
            .iter()
            .enumerate()
            .map(|(layer_idx, count)| {
                let layer_idx = layer_idx as u32;
                ChunkKey {
                    layer_idx,
                    chunk_idx: (count - 1) / self.curve_trees.layer_chunk_width(layer_idx),
                }
            })
            .collect()
    }

    fn add_chunk_ref(&mut self, key: ChunkKey) {
        self.chunk_cache
            .entry(key)
            .and_modify(|chunk| chunk.ref_count += 1)
            .or_insert(CachedTreeChunk {
                members: Vec::new(),
                ref_count: 1,
            });
    }

    fn release_chunk_ref(&mut self, key: ChunkKey) -> Result<()> {
        let chunk = self.chunk_cache.get_mut(&key).ok_or_else(|| {
            SyncError::CorruptedCache(format!(
                "releasing unknown chunk ({}, {})",
                key.layer_idx, key.chunk_idx
            ))
        })?;
        chunk.ref_count -= 1;
        if chunk.ref_count == 0 {
            self.chunk_cache.remove(&key);
        }
        Ok(())
    }

    fn add_leaf_ref(&mut self, leaf_idx: u64, pair: Option<&OutputPair>) -> Result<()> {
        if let Some(leaf) = self.leaf_cache.get_mut(&leaf_idx) {
            leaf.ref_count += 1;
            return Ok(());
        }
        let pair = pair.ok_or_else(|| {
            SyncError::CorruptedCache(format!("leaf {leaf_idx} absent with no pair to cache"))
        })?;
        self.leaf_cache.insert(
            leaf_idx,
            CachedLeaf {
                pair: *pair,
                ref_count: 1,
            },
        );
        Ok(())
    }

    fn release_leaf_ref(&mut self, leaf_idx: u64) -> Result<()> {
        let leaf = self
            .leaf_cache
            .get_mut(&leaf_idx)
            .ok_or_else(|| SyncError::CorruptedCache(format!("releasing unknown leaf {leaf_idx}")))?;
        leaf.ref_count -= 1;
        if leaf.ref_count == 0 {
            self.leaf_cache.remove(&leaf_idx);
        }
        Ok(())
    }

    /// Decode the boundary hash of every current layer from cache.
    fn cached_last_hashes(&self) -> Result<LastHashes<Cy>> {
        let counts = self.curve_trees.layer_counts(self.n_leaf_tuples);
        let mut last_hashes = LastHashes::default();
        for (layer_idx, count) in counts.iter().enumerate() {
            let layer_idx = layer_idx as u32;
            let bytes = self.chunk_member(layer_idx, count - 1)?;
            if layer_idx % 2 == 0 {
                last_hashes
                    .c1
                    .push(<Cy::C1 as TreeCurve>::point_from_bytes(&bytes)?);
            } else {
                last_hashes
                    .c2
                    .push(<Cy::C2 as TreeCurve>::point_from_bytes(&bytes)?);
            }
        }
        Ok(last_hashes)
    }

    /// Per instruction layer, the current value of the element that remains
    /// the layer's boundary after the trim. Lives in the target state's
    /// boundary chunk, which the target block's pins keep cached.
    fn trim_last_hashes(
        &self,
        instructions: &[TrimLayerInstructions],
    ) -> Result<LastHashes<Cy>> {
        let mut last_hashes = LastHashes::default();
        for (layer_idx, instr) in instructions.iter().enumerate() {
            let layer_idx = layer_idx as u32;
            let bytes = self.chunk_member(layer_idx, instr.new_total_parents - 1)?;
            if layer_idx % 2 == 0 {
                last_hashes
                    .c1
                    .push(<Cy::C1 as TreeCurve>::point_from_bytes(&bytes)?);
            } else {
                last_hashes
                    .c2
                    .push(<Cy::C2 as TreeCurve>::point_from_bytes(&bytes)?);
            }
        }
        Ok(last_hashes)
    }

    fn chunk_member(&self, layer_idx: u32, element_idx: u64) -> Result<[u8; 32]> {
        let width = self.curve_trees.layer_chunk_width(layer_idx);
        let key = ChunkKey {
            layer_idx,
            chunk_idx: element_idx / width,
        };
        let chunk = self.chunk_cache.get(&key).ok_or_else(|| {
            SyncError::CorruptedCache(format!(
                "missing chunk ({}, {})",
                key.layer_idx, key.chunk_idx
            ))
        })?;
        chunk
            .members
            .get((element_idx % width) as usize)
            .copied()
            .ok_or_else(|| {
                SyncError::CorruptedCache(format!(
                    "chunk ({}, {}) has no member for element {}",
                    key.layer_idx, key.chunk_idx, element_idx
                ))
            })
    }

    /// Fetch and convert every child value the trim instructions demand.
    fn gather_trim_children(
        &self,
        instructions: &[TrimLayerInstructions],
    ) -> Result<TrimChildren<Cy>> {
        let mut children = TrimChildren {
            c1: Vec::new(),
            c2: Vec::new(),
        };
        for (layer_idx, instr) in instructions.iter().enumerate() {
            let range = instr.start_trim_idx..instr.end_trim_idx;
            if layer_idx == 0 {
                // Scalar indices into the flattened leaf layer; tuples are
                // re-derived from the cached pairs.
                let mut scalars = Vec::new();
                if !range.is_empty() {
                    let first_tuple = instr.start_trim_idx / 3;
                    let last_tuple = (instr.end_trim_idx - 1) / 3;
                    let pairs = (first_tuple..=last_tuple)
                        .map(|l| {
                            self.leaf_cache.get(&l).map(|leaf| leaf.pair).ok_or_else(|| {
                                SyncError::CorruptedCache(format!("missing cached leaf {l}"))
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    let tuples = derive_leaf_tuples_serial::<Cy>(&pairs).ok_or_else(|| {
                        SyncError::CorruptedCache(
                            "cached output no longer derives a leaf tuple".into(),
                        )
                    })?;
                    let flattened = flatten_leaf_tuples(&tuples);
                    let base = first_tuple * 3;
                    for scalar_idx in range {
                        scalars.push(flattened[(scalar_idx - base) as usize].clone());
                    }
                }
                children.c1.push(scalars);
            } else if layer_idx % 2 == 1 {
                let mut converted = Vec::with_capacity(range.clone().count());
                for element_idx in range {
                    let bytes = self.chunk_member(layer_idx as u32 - 1, element_idx)?;
                    let point = <Cy::C1 as TreeCurve>::point_from_bytes(&bytes)?;
                    converted.push(Cy::c1_point_to_c2_scalar(&point));
                }
                children.c2.push(converted);
            } else {
                let mut converted = Vec::with_capacity(range.clone().count());
                for element_idx in range {
                    let bytes = self.chunk_member(layer_idx as u32 - 1, element_idx)?;
                    let point = <Cy::C2 as TreeCurve>::point_from_bytes(&bytes)?;
                    converted.push(Cy::c2_point_to_c1_scalar(&point));
                }
                children.c1.push(converted);
            }
        }
        Ok(children)
    }
}

/// Pair of a leaf appended by the current extension, `None` for a
/// pre-existing leaf (which must already be cached).
fn pair_at(new_pairs: &[OutputPair], old_n: u64, leaf_idx: u64) -> Option<&OutputPair> {
    leaf_idx
        .checked_sub(old_n)
        .and_then(|offset| new_pairs.get(offset as usize))
}

/// Per-layer `(start element index, ordered member encodings)` of an
/// extension, leaf-adjacent layer first.
fn extension_content<Cy: CurveCycle>(ext: &TreeExtension<Cy>) -> Vec<(u64, Vec<[u8; 32]>)> {
    let n_layers = ext.c1_layer_extensions.len() + ext.c2_layer_extensions.len();
    (0..n_layers)
        .map(|layer_idx| {
            if layer_idx % 2 == 0 {
                let layer = &ext.c1_layer_extensions[layer_idx / 2];
                (
                    layer.start_idx,
                    layer
                        .hashes
                        .iter()
                        .map(<Cy::C1 as TreeCurve>::point_to_bytes)
                        .collect(),
                )
            } else {
                let layer = &ext.c2_layer_extensions[layer_idx / 2];
                (
                    layer.start_idx,
                    layer
                        .hashes
                        .iter()
                        .map(<Cy::C2 as TreeCurve>::point_to_bytes)
                        .collect(),
                )
            }
        })
        .collect()
}
