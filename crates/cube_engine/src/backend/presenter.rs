//! Swapchain plumbing shared by the XCB, Wayland and KHR display back-ends

use ash::vk;

use super::{AcquireResult, BackendError, BackendResult, PresentResult};
use crate::core::config::CubeConfig;
use crate::render::renderer::Renderer;
use crate::render::vulkan::{swapchain, GpuContext, Surface, Swapchain, VulkanError};

/// Renderer, swapchain and surface for one window or display plane
///
/// The swapchain is optional: it is dropped when it goes out of date and
/// rebuilt lazily by [`ensure_swapchain`](Self::ensure_swapchain).
pub struct SwapchainPresenter {
    renderer: Renderer,
    swapchain: Option<Swapchain>,
    surface: Surface,
    extent: vk::Extent2D,
}

impl SwapchainPresenter {
    /// Pick a surface format and build the renderer for it
    pub fn new(
        context: &GpuContext,
        surface: Surface,
        extent: vk::Extent2D,
        config: &CubeConfig,
    ) -> BackendResult<Self> {
        let formats = surface.formats(context.physical_device())?;
        let format = swapchain::choose_format(&formats).ok_or_else(|| {
            BackendError::SurfaceUnsupported("Surface offers no sRGB 8-bit format".to_string())
        })?;

        let renderer = Renderer::new(
            context,
            format,
            extent,
            vk::ImageLayout::PRESENT_SRC_KHR,
            &config.shaders,
            super::frame_clock(config),
        )?;

        Ok(Self {
            renderer,
            swapchain: None,
            surface,
            extent,
        })
    }

    /// Create the swapchain and per-image slots if there are none
    pub fn ensure_swapchain(&mut self, context: &GpuContext) -> BackendResult<()> {
        if self.swapchain.is_some() {
            return Ok(());
        }

        let swapchain = Swapchain::new(context, &self.surface, self.renderer.format(), self.extent)
            .map_err(|e| match e {
                VulkanError::InitializationFailed(msg) => BackendError::Init(msg),
                VulkanError::SurfaceUnsupported(msg) => BackendError::SurfaceUnsupported(msg),
                other => BackendError::Vulkan(other),
            })?;
        self.renderer.set_images(context, swapchain.images(), swapchain.extent())?;
        self.swapchain = Some(swapchain);
        Ok(())
    }

    /// Drop the per-image slots and the swapchain
    pub fn invalidate(&mut self, context: &GpuContext) -> BackendResult<()> {
        self.renderer.clear_images(context)?;
        if self.swapchain.take().is_some() {
            log::debug!("Dropped swapchain");
        }
        Ok(())
    }

    /// Size requested for the next swapchain
    pub fn set_extent(&mut self, extent: vk::Extent2D) {
        self.extent = extent;
    }

    /// Requested extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Acquire the next image, signalling the context's semaphore
    pub fn acquire(&mut self, context: &GpuContext, timeout: u64) -> BackendResult<AcquireResult> {
        let Some(swapchain) = self.swapchain.as_ref() else {
            return Ok(AcquireResult::Resize);
        };

        match swapchain.acquire(timeout, context.semaphore()) {
            Ok(Some(index)) => Ok(AcquireResult::Image(index)),
            Ok(None) => Ok(AcquireResult::Retry),
            Err(VulkanError::SwapchainLost) => Ok(AcquireResult::Resize),
            Err(e) => {
                log::error!("Failed to acquire swapchain image: {}", e);
                Ok(AcquireResult::Fatal)
            }
        }
    }

    /// Render into `index`, waiting on the acquire semaphore
    pub fn render(&mut self, context: &GpuContext, index: u32) -> BackendResult<()> {
        self.renderer.render_frame(context, index, Some(context.semaphore()))?;
        Ok(())
    }

    /// Present `index` and drain the queue
    pub fn present(&mut self, context: &GpuContext, index: u32) -> BackendResult<PresentResult> {
        let swapchain = self.swapchain.as_ref().ok_or_else(|| {
            BackendError::Vulkan(VulkanError::InvalidOperation {
                reason: "present without a swapchain".to_string(),
            })
        })?;

        let result = match swapchain.present(context.queue(), index) {
            Ok(()) => PresentResult::Presented,
            Err(VulkanError::SwapchainLost) => PresentResult::Resize,
            Err(e) => return Err(e.into()),
        };
        context.wait_idle()?;
        Ok(result)
    }
}
