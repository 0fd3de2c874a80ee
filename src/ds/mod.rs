//! Keyed storage: the open-addressing ordered map and the AVL sorted map.

pub mod hash;
pub mod ordered_map;
pub mod sorted_map;

pub use hash::MapKey;
pub use ordered_map::OrderedMap;
pub use sorted_map::{Cursor, SortedMap};
