//! Vulkan swapchain management
//!
//! Creation parameters shared by the XCB, Wayland and direct-display
//! back-ends, plus acquire and present with their results folded into
//! `VulkanError`.

use ash::vk;
use ash::extensions::khr::Swapchain as SwapchainLoader;
use super::context::{GpuContext, VulkanResult, VulkanError};
use super::surface::Surface;

/// Largest number of images the renderer keeps per-image resources for
pub const MAX_IMAGES: u32 = 4;

/// First of the two sRGB 8-bit formats the surface reports, in its order
pub fn choose_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::Format> {
    formats
        .iter()
        .map(|sf| sf.format)
        .find(|&format| format == vk::Format::R8G8B8A8_SRGB || format == vk::Format::B8G8R8A8_SRGB)
}

/// FIFO if the surface offers it, otherwise MAILBOX
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::FIFO) {
        vk::PresentModeKHR::FIFO
    } else {
        vk::PresentModeKHR::MAILBOX
    }
}

/// `clamp(2, min, min(max, 4))`, failing when the surface demands more
/// than [`MAX_IMAGES`]
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> VulkanResult<u32> {
    let mut count = 2;
    if count < caps.min_image_count {
        if caps.min_image_count > MAX_IMAGES {
            return Err(VulkanError::InitializationFailed(format!(
                "surface_caps.minImageCount is too large (is: {}, max: {})",
                caps.min_image_count, MAX_IMAGES
            )));
        }
        count = caps.min_image_count;
    }

    if caps.max_image_count > 0 && count > caps.max_image_count {
        count = caps.max_image_count;
    }
    Ok(count)
}

/// Surface-reported extent when it is fixed, otherwise `requested`
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width == u32::MAX {
        requested
    } else {
        caps.current_extent
    }
}

/// Swapchain management wrapper with RAII cleanup
pub struct Swapchain {
    swapchain_loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain for `surface` with images of `format`
    pub fn new(
        context: &GpuContext,
        surface: &Surface,
        format: vk::Format,
        requested_extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let physical_device = context.physical_device();
        let caps = surface.capabilities(physical_device)?;
        if !caps.supported_composite_alpha.contains(vk::CompositeAlphaFlagsKHR::OPAQUE) {
            return Err(VulkanError::InitializationFailed(
                "Surface does not support opaque composition".to_string()
            ));
        }
        surface.require_present_support(context, "Surface cannot be presented from queue family 0")?;

        let present_mode = choose_present_mode(&surface.present_modes(physical_device)?);
        let image_count = choose_image_count(&caps)?;
        let extent = choose_extent(&caps, requested_extent);

        log::info!(
            "Creating swapchain: format {:?}, present mode {:?}, {} images, {}x{}",
            format, present_mode, image_count, extent.width, extent.height
        );

        let queue_families = [context.queue_family()];
        let swapchain_create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(format)
            .image_color_space(vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .pre_transform(vk::SurfaceTransformFlagsKHR::IDENTITY)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain_loader = SwapchainLoader::new(context.instance(), context.device());
        let swapchain = unsafe {
            swapchain_loader
                .create_swapchain(&swapchain_create_info, None)
                .map_err(VulkanError::Api)?
        };

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) if !images.is_empty() && images.len() <= MAX_IMAGES as usize => images,
            Ok(images) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(VulkanError::InitializationFailed(format!(
                    "Swapchain returned {} images, expected 1..={}",
                    images.len(), MAX_IMAGES
                )));
            }
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(VulkanError::Api(e));
            }
        };

        Ok(Self {
            swapchain_loader,
            swapchain,
            images,
            extent,
        })
    }

    /// Acquire the next image, signalling `semaphore`
    ///
    /// Returns `Ok(None)` when the image is not ready within `timeout` and
    /// `Err(SwapchainLost)` when the swapchain is out of date.
    pub fn acquire(&self, timeout: u64, semaphore: vk::Semaphore) -> VulkanResult<Option<u32>> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(self.swapchain, timeout, semaphore, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::warn!("Acquired image {} from a suboptimal swapchain", index);
                }
                Ok(Some(index))
            }
            Err(vk::Result::NOT_READY) | Err(vk::Result::TIMEOUT) => {
                log::debug!("Swapchain image not ready, retrying");
                Ok(None)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date on acquire");
                Err(VulkanError::SwapchainLost)
            }
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Queue image `index` for presentation
    pub fn present(&self, queue: vk::Queue, index: u32) -> VulkanResult<()> {
        let swapchains = [self.swapchain];
        let indices = [index];
        let present_info = vk::PresentInfoKHR::builder()
            .swapchains(&swapchains)
            .image_indices(&indices);

        match unsafe { self.swapchain_loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(()),
            Ok(true) => {
                log::warn!("Presented to a suboptimal swapchain");
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date on present");
                Err(VulkanError::SwapchainLost)
            }
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Get swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Images in swapchain order
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            ..Default::default()
        }
    }

    #[test]
    fn test_format_takes_first_srgb_in_surface_order() {
        let formats = [
            surface_format(vk::Format::B8G8R8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::R8G8B8A8_SRGB),
        ];
        assert_eq!(choose_format(&formats), Some(vk::Format::B8G8R8A8_SRGB));
    }

    #[test]
    fn test_format_without_srgb_is_none() {
        let formats = [
            surface_format(vk::Format::B8G8R8A8_UNORM),
            surface_format(vk::Format::R5G6B5_UNORM_PACK16),
        ];
        assert_eq!(choose_format(&formats), None);
    }

    #[test]
    fn test_present_mode_prefers_fifo() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn test_image_count_clamping() {
        assert_eq!(choose_image_count(&caps(1, 0)).unwrap(), 2);
        assert_eq!(choose_image_count(&caps(3, 0)).unwrap(), 3);
        assert_eq!(choose_image_count(&caps(1, 1)).unwrap(), 1);
        assert_eq!(choose_image_count(&caps(4, 8)).unwrap(), 4);
    }

    #[test]
    fn test_image_count_rejects_large_minimum() {
        assert!(choose_image_count(&caps(5, 0)).is_err());
    }

    #[test]
    fn test_extent_follows_surface_when_fixed() {
        let requested = vk::Extent2D { width: 1024, height: 768 };
        let mut c = caps(2, 0);
        c.current_extent = vk::Extent2D { width: 640, height: 480 };
        assert_eq!(choose_extent(&c, requested), c.current_extent);

        c.current_extent = vk::Extent2D { width: u32::MAX, height: u32::MAX };
        assert_eq!(choose_extent(&c, requested), requested);
    }
}
