//! Vulkan rendering backend
//!
//! Low-level RAII wrappers over `ash`. Every wrapper holds a cloned
//! `ash::Device` and releases its handle on drop, so owners only need to
//! declare fields in the order they must be destroyed.

pub mod context;
pub mod buffer;
pub mod commands;
pub mod descriptor;
pub mod framebuffer;
pub mod image;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use context::{ExtensionRequest, GpuContext, VulkanError, VulkanResult};
pub use buffer::MappedBuffer;
pub use commands::{ActiveRenderPass, CommandPool, CommandRecorder};
pub use descriptor::{DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder};
pub use framebuffer::{Framebuffer, ImageView};
pub use image::HostImage;
#[cfg(feature = "kms")]
pub use image::DmaBufImage;
pub use render_pass::RenderPass;
pub use shader::{GraphicsPipeline, ShaderModule, VertexStreams};
pub use surface::Surface;
pub use swapchain::Swapchain;
pub use sync::{Fence, Semaphore};
