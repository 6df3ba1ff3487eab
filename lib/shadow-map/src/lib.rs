//! The shadow-map manager and its array-index manager: allocating shadow
//! map textures per light, handing out move-only handles that clean up on
//! drop, and keeping their descriptor-array slots packed densely.

pub mod array_index;
pub mod manager;

pub use array_index::{ArrayIndexManager, ArraySlotId, IndexChangedCallback};
pub use manager::{resolve_shadow_map_size, ShadowMapHandle, ShadowMapManager, ShadowMapType};
