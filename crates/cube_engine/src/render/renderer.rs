//! # Renderer
//!
//! Owns the render pass, the render model and one [`PerImage`] slot for each
//! image a back-end renders into. Back-ends hand it their image set once it is
//! known and call [`Renderer::render_frame`] with the index they acquired.
//!
//! ## Frame ordering
//!
//! 1. Wait on the slot's fence
//! 2. Write the uniform block and record the pass into the slot's command buffer
//! 3. Reset the fence and submit, waiting on the acquire semaphore when one
//!    was signalled
//!
//! The context is passed into every call instead of being stored, so a
//! back-end can keep the context, its swapchain and the renderer side by side.

use ash::{vk, Device};

use crate::core::config::ShaderConfig;
use crate::foundation::time::FrameClock;
use crate::render::cube::CLEAR_COLOR;
use crate::render::model::RenderModel;
use crate::render::vulkan::{
    CommandRecorder, Fence, Framebuffer, GpuContext, ImageView, RenderPass, VulkanError,
    VulkanResult,
};

/// Per-image slot: view, framebuffer, fence and command buffer
pub struct PerImage {
    framebuffer: Framebuffer,
    _view: ImageView,
    fence: Fence,
    command_buffer: vk::CommandBuffer,
    device: Device,
    command_pool: vk::CommandPool,
}

impl PerImage {
    fn new(
        context: &GpuContext,
        render_pass: vk::RenderPass,
        image: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let device = context.device().clone();
        let view = ImageView::new(device.clone(), image, format)?;
        let framebuffer = Framebuffer::new(device.clone(), render_pass, &[view.handle()], extent)?;
        let fence = Fence::new(device.clone(), true)?;
        let command_buffer = context.command_pool().allocate()?;

        Ok(Self {
            framebuffer,
            _view: view,
            fence,
            command_buffer,
            device,
            command_pool: context.command_pool().handle(),
        })
    }
}

impl Drop for PerImage {
    fn drop(&mut self) {
        unsafe {
            self.device.free_command_buffers(self.command_pool, &[self.command_buffer]);
        }
    }
}

/// Records and submits frames for one back-end
pub struct Renderer {
    images: Vec<PerImage>,
    model: RenderModel,
    render_pass: RenderPass,
    format: vk::Format,
    extent: vk::Extent2D,
    clock: FrameClock,
    device: Device,
}

impl Renderer {
    /// Build the render pass and model for `format`
    ///
    /// `final_layout` is `PRESENT_SRC_KHR` for swapchain back-ends and
    /// `COLOR_ATTACHMENT_OPTIMAL` when the image is read back or scanned out.
    pub fn new(
        context: &GpuContext,
        format: vk::Format,
        extent: vk::Extent2D,
        final_layout: vk::ImageLayout,
        shaders: &ShaderConfig,
        clock: FrameClock,
    ) -> VulkanResult<Self> {
        let render_pass = RenderPass::new(context.device().clone(), format, final_layout)?;
        let model = RenderModel::init_cube(context, render_pass.handle(), shaders)?;

        Ok(Self {
            images: Vec::new(),
            model,
            render_pass,
            format,
            extent,
            clock,
            device: context.device().clone(),
        })
    }

    /// Replace the per-image set with one slot per entry of `images`
    pub fn set_images(
        &mut self,
        context: &GpuContext,
        images: &[vk::Image],
        extent: vk::Extent2D,
    ) -> VulkanResult<()> {
        self.clear_images(context)?;
        self.extent = extent;

        log::debug!(
            "Building {} per-image slots at {}x{}",
            images.len(), extent.width, extent.height
        );

        self.images = images
            .iter()
            .map(|&image| PerImage::new(context, self.render_pass.handle(), image, self.format, extent))
            .collect::<VulkanResult<_>>()?;
        Ok(())
    }

    /// Drop every per-image slot once the queue has drained
    pub fn clear_images(&mut self, context: &GpuContext) -> VulkanResult<()> {
        if !self.images.is_empty() {
            context.wait_idle()?;
            log::debug!("Dropping {} per-image slots", self.images.len());
            self.images.clear();
        }
        Ok(())
    }

    /// Record and submit one frame into image `index`
    ///
    /// `wait` is the semaphore signalled by a swapchain acquire, if any.
    pub fn render_frame(
        &mut self,
        context: &GpuContext,
        index: u32,
        wait: Option<vk::Semaphore>,
    ) -> VulkanResult<()> {
        let slot = self.images.get(index as usize).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("image index {} out of range ({} images)", index, self.images.len()),
        })?;

        slot.fence.wait(u64::MAX)?;

        let tick = self.clock.tick();
        log::trace!("Frame tick {} into image {}", tick, index);

        let extent = self.extent;
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue { float32: CLEAR_COLOR },
        }];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        let mut recorder = CommandRecorder::new(slot.command_buffer, context.device().clone());
        recorder.begin()?;
        {
            let mut pass = recorder.begin_render_pass(
                self.render_pass.handle(),
                slot.framebuffer.handle(),
                render_area,
                &clear_values,
            )?;
            self.model.render(&mut pass, extent, tick)?;
        }
        let command_buffer = recorder.end()?;

        let wait_semaphores: Vec<vk::Semaphore> = wait.into_iter().collect();
        let wait_stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait_semaphores.len()];
        let command_buffers = [command_buffer];

        // Reset only once the buffer is recorded, so a failed frame leaves the fence signalled
        slot.fence.reset()?;
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers);

        unsafe {
            context
                .device()
                .queue_submit(context.queue(), &[submit_info.build()], slot.fence.handle())
                .map_err(VulkanError::Api)
        }
    }

    /// Attachment format the render pass was built for
    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        unsafe {
            // Slots and the model may still be referenced by in-flight work
            let _ = self.device.device_wait_idle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::context::{built_shaders, no_gpu};
    use crate::render::vulkan::{ExtensionRequest, HostImage};

    #[test]
    fn test_fence_stays_signalled_across_frames() {
        let Some(shaders) = built_shaders() else {
            return;
        };
        let context = match GpuContext::new(&ExtensionRequest::none()) {
            Ok(context) => context,
            Err(e) if no_gpu(&e) => return,
            Err(e) => panic!("context creation failed: {}", e),
        };

        let format = vk::Format::B8G8R8A8_SRGB;
        let extent = vk::Extent2D { width: 64, height: 48 };
        let image = HostImage::new(&context, format, extent).unwrap();
        let mut renderer = Renderer::new(
            &context,
            format,
            extent,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            &shaders,
            FrameClock::fixed(0),
        )
        .unwrap();
        renderer.set_images(&context, &[image.handle()], extent).unwrap();

        assert!(renderer.render_frame(&context, 1, None).is_err());
        for _ in 0..3 {
            renderer.render_frame(&context, 0, None).unwrap();
        }
        context.wait_idle().unwrap();

        let fence = renderer.images[0].fence.handle();
        let signalled = unsafe { context.device().get_fence_status(fence) }.unwrap();
        assert!(signalled);

        drop(renderer);
        drop(image);
    }
}
