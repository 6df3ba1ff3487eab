//! Concrete [`shader_backend_traits::RendererBackend`] implementations.
//! `vulkan` builds against `ash` on every platform; `dx12` only compiles on
//! Windows, where it backs the DirectX 12 renderer path.

pub mod vulkan;

#[cfg(windows)]
pub mod dx12;
