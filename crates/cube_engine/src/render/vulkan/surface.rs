//! Vulkan surface management
//!
//! Handles platform surface creation and the presentation queries made
//! against it

use ash::{vk, extensions::khr};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use super::context::{GpuContext, VulkanResult, VulkanError};

/// Vulkan surface wrapper for presentation
pub struct Surface {
    surface_loader: khr::Surface,
    surface: vk::SurfaceKHR,
}

impl Surface {
    /// Create a platform surface from raw display and window handles
    ///
    /// # Safety
    ///
    /// The handles must stay valid for the lifetime of the returned surface.
    pub unsafe fn from_raw(
        context: &GpuContext,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> VulkanResult<Self> {
        let surface = ash_window::create_surface(
            context.entry(),
            context.instance(),
            display,
            window,
            None,
        )
        .map_err(|e| VulkanError::InitializationFailed(format!("Failed to create surface: {:?}", e)))?;

        Ok(Self::from_handle(context, surface))
    }

    /// Take ownership of a surface created through another extension
    pub fn from_handle(context: &GpuContext, surface: vk::SurfaceKHR) -> Self {
        Self {
            surface_loader: context.surface_loader().clone(),
            surface,
        }
    }

    /// Get the underlying surface handle
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Get surface capabilities for a physical device
    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Get surface formats for a physical device
    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Get surface present modes for a physical device
    pub fn present_modes(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Fail with `SurfaceUnsupported(message)` unless the context's queue
    /// family can present to this surface
    pub fn require_present_support(&self, context: &GpuContext, message: &str) -> VulkanResult<()> {
        let supported = unsafe {
            self.surface_loader
                .get_physical_device_surface_support(
                    context.physical_device(),
                    context.queue_family(),
                    self.surface,
                )
                .map_err(VulkanError::Api)?
        };

        if supported {
            Ok(())
        } else {
            Err(VulkanError::SurfaceUnsupported(message.to_string()))
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
