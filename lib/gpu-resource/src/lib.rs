//! Backend-agnostic GPU resource allocation (buffers, images, shadow-map
//! textures) and the per-frame resource ring that keeps the CPU from
//! touching a slot the GPU hasn't finished with yet.

pub mod frame_resources;
pub mod manager;

pub use frame_resources::{
    CommandAllocatorHandle, FrameResourcesManager, FrameSlot, DEFAULT_FRAME_RESOURCE_COUNT,
};
pub use manager::{GpuResourceError, GpuResourceManager};
