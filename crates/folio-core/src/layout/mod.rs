//! Layout snapshots and the indexer that makes them addressable.
//!
//! - [`node`]: `LayoutNode`, `BoxGeometry` (tolerant deserialization)
//! - [`index`]: `index()` and the resulting `LayoutTree`

pub mod index;
pub mod node;

pub use index::{index, LayoutTree, ID_SEPARATOR};
pub use node::{BoxGeometry, LayoutNode};

/// Parse and index a raw snapshot in one step.
pub fn index_value(value: serde_json::Value) -> Result<LayoutTree, serde_json::Error> {
    let root: LayoutNode = serde_json::from_value(value)?;
    Ok(index(root))
}
