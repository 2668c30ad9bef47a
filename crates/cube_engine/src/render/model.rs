//! Render models selectable by the renderer
//!
//! A closed set: adding a model means adding a variant and its arms here.

use ash::vk;

use crate::core::config::ShaderConfig;
use crate::render::cube::{CubeModel, UniformBlock};
use crate::render::vulkan::{ActiveRenderPass, GpuContext, VulkanResult};

/// Geometry and pipeline drawn every frame
pub enum RenderModel {
    /// The vertex-colored, lit cube
    Cube(CubeModel),
}

impl RenderModel {
    /// Build the cube's GPU objects against `render_pass`
    pub fn init_cube(
        context: &GpuContext,
        render_pass: vk::RenderPass,
        shaders: &ShaderConfig,
    ) -> VulkanResult<Self> {
        CubeModel::new(context, render_pass, shaders).map(Self::Cube)
    }

    /// Update per-frame state for tick `t` and record the draws
    pub fn render(
        &mut self,
        pass: &mut ActiveRenderPass<'_>,
        extent: vk::Extent2D,
        tick: u64,
    ) -> VulkanResult<()> {
        match self {
            Self::Cube(cube) => {
                cube.update_uniforms(&UniformBlock::at_tick(tick, extent.width, extent.height))?;
                cube.draw(pass, extent);
                Ok(())
            }
        }
    }
}
