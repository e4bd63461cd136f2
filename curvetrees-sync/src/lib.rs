//! Client-side cache that keeps curve-tree membership paths for registered
//! outputs current as blocks are synced and popped.
//!
//! A wallet registers the outputs it cares about before they unlock, feeds
//! every block through [`TreeSync::sync_block`], and can at any time fetch a
//! path that authenticates against the current root. Reorgs up to the
//! configured depth are handled by [`TreeSync::pop_block`]; everything else
//! in the tree is discarded as soon as no path or block pin references it.

#![warn(missing_docs)]

mod cache;
mod error;
mod serialization;
mod sync;

#[cfg(test)]
mod tests;

pub use cache::{BlockMeta, CachedLeaf, CachedTreeChunk, ChunkKey, OutputRef, RegisteredOutput};
pub use error::{Result, SyncError};
pub use serialization::TreeSyncSnapshot;
pub use sync::TreeSync;
