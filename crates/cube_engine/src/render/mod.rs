//! # Rendering
//!
//! Everything between a back-end's image set and a submitted frame.
//!
//! - [`vulkan`]: RAII wrappers over `ash` and the shared [`GpuContext`]
//! - [`cube`]: geometry, uniform block and buffer layout
//! - [`model`]: the closed set of drawable models
//! - [`renderer`]: per-image slots and frame recording

pub mod vulkan;
pub mod cube;
pub mod model;
pub mod renderer;

pub use vulkan::{ExtensionRequest, GpuContext, VulkanError, VulkanResult};
pub use cube::{BufferLayout, UniformBlock};
pub use model::RenderModel;
pub use renderer::{PerImage, Renderer};
