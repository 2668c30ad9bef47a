//! Images owned by back-ends that have no swap chain
//!
//! - [`HostImage`]: linear, host-visible render target read back on the CPU
//! - [`DmaBufImage`]: linear image bound to memory imported from a dma-buf

use ash::{vk, Device};
use super::context::{GpuContext, VulkanResult, VulkanError};

const COLOR_SUBRESOURCE: vk::ImageSubresource = vk::ImageSubresource {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    mip_level: 0,
    array_layer: 0,
};

fn linear_color_target<'a>(format: vk::Format, extent: vk::Extent2D) -> vk::ImageCreateInfoBuilder<'a> {
    vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::LINEAR)
        .usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
}

/// Linear color image in host-coherent memory
pub struct HostImage {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    extent: vk::Extent2D,
    layout: vk::SubresourceLayout,
}

impl HostImage {
    /// Create the image and bind freshly allocated host-coherent memory
    pub fn new(context: &GpuContext, format: vk::Format, extent: vk::Extent2D) -> VulkanResult<Self> {
        let device = context.device().clone();

        let image = unsafe {
            device.create_image(&linear_color_target(format, extent), None)
                .map_err(VulkanError::Api)?
        };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = context
            .find_host_coherent_memory(requirements.memory_type_bits)
            .and_then(|memory_type_index| {
                let alloc_info = vk::MemoryAllocateInfo::builder()
                    .allocation_size(requirements.size)
                    .memory_type_index(memory_type_index);
                unsafe { device.allocate_memory(&alloc_info, None) }.map_err(VulkanError::Api)
            });

        let memory = match memory {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let layout = unsafe {
            let bound = device.bind_image_memory(image, memory, 0);
            if let Err(e) = bound {
                device.destroy_image(image, None);
                device.free_memory(memory, None);
                return Err(VulkanError::Api(e));
            }
            device.get_image_subresource_layout(image, COLOR_SUBRESOURCE)
        };

        Ok(Self {
            device,
            image,
            memory,
            extent,
            layout,
        })
    }

    /// Get image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Copy the pixels out as tightly packed rows of `width * 4` bytes
    ///
    /// The caller must have waited for rendering into the image to finish.
    pub fn read_pixels(&self) -> VulkanResult<Vec<u8>> {
        let row_bytes = self.extent.width as usize * 4;
        let row_pitch = self.layout.row_pitch as usize;
        let height = self.extent.height as usize;
        if row_pitch < row_bytes {
            return Err(VulkanError::InvalidOperation {
                reason: format!("row pitch {} is smaller than a {} byte row", row_pitch, row_bytes),
            });
        }

        let mapped_size = self.layout.offset + self.layout.size;
        let ptr = unsafe {
            self.device
                .map_memory(self.memory, 0, mapped_size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?
        };

        let mut pixels = Vec::with_capacity(row_bytes * height);
        unsafe {
            let base = ptr.cast::<u8>().add(self.layout.offset as usize);
            for y in 0..height {
                let row = std::slice::from_raw_parts(base.add(y * row_pitch), row_bytes);
                pixels.extend_from_slice(row);
            }
            self.device.unmap_memory(self.memory);
        }

        Ok(pixels)
    }
}

impl Drop for HostImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Linear image whose memory is a dma-buf exported by another driver
#[cfg(feature = "kms")]
pub struct DmaBufImage {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
}

#[cfg(feature = "kms")]
impl DmaBufImage {
    /// Instance extensions the import path needs
    pub fn instance_extensions() -> Vec<&'static std::ffi::CStr> {
        vec![
            vk::KhrGetPhysicalDeviceProperties2Fn::name(),
            vk::KhrExternalMemoryCapabilitiesFn::name(),
        ]
    }

    /// Device extensions the import path needs
    pub fn device_extensions() -> Vec<&'static std::ffi::CStr> {
        vec![
            vk::KhrExternalMemoryFn::name(),
            vk::KhrExternalMemoryFdFn::name(),
            vk::ExtExternalMemoryDmaBufFn::name(),
        ]
    }

    /// Import `fd` as the backing memory of a linear `format` image
    ///
    /// Fails when the driver's row pitch for the image differs from
    /// `stride`, the pitch the buffer was allocated with.
    pub fn import(
        context: &GpuContext,
        fd: std::os::fd::OwnedFd,
        format: vk::Format,
        extent: vk::Extent2D,
        stride: u32,
    ) -> VulkanResult<Self> {
        use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd};

        let device = context.device().clone();
        let handle_type = vk::ExternalMemoryHandleTypeFlags::DMA_BUF_EXT;

        let mut external_info = vk::ExternalMemoryImageCreateInfo::builder()
            .handle_types(handle_type);
        let create_info = linear_color_target(format, extent).push_next(&mut external_info);

        let image = unsafe {
            device.create_image(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let destroy_image = |e: VulkanError| {
            unsafe { device.destroy_image(image, None) };
            e
        };

        let layout = unsafe { device.get_image_subresource_layout(image, COLOR_SUBRESOURCE) };
        if layout.row_pitch != vk::DeviceSize::from(stride) {
            return Err(destroy_image(VulkanError::InitializationFailed(format!(
                "image row pitch {} does not match buffer stride {}",
                layout.row_pitch, stride
            ))));
        }

        let loader = ash::extensions::khr::ExternalMemoryFd::new(context.instance(), &device);
        let fd_properties = unsafe { loader.get_memory_fd_properties(handle_type, fd.as_raw_fd()) }
            .map_err(|e| destroy_image(VulkanError::Api(e)))?;

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory_type_index = super::context::find_memory_type(
            context.memory_properties(),
            requirements.memory_type_bits & fd_properties.memory_type_bits,
            vk::MemoryPropertyFlags::empty(),
        )
        .map_err(destroy_image)?;

        // A successful import transfers ownership of the descriptor
        let raw_fd = fd.into_raw_fd();
        let mut import_info = vk::ImportMemoryFdInfoKHR::builder()
            .handle_type(handle_type)
            .fd(raw_fd);
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index)
            .push_next(&mut import_info);

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                drop(unsafe { OwnedFd::from_raw_fd(raw_fd) });
                return Err(destroy_image(VulkanError::Api(e)));
            }
        };

        if let Err(e) = unsafe { device.bind_image_memory(image, memory, 0) } {
            unsafe { device.free_memory(memory, None) };
            return Err(destroy_image(VulkanError::Api(e)));
        }

        Ok(Self {
            device,
            image,
            memory,
        })
    }

    /// Get image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }
}

#[cfg(feature = "kms")]
impl Drop for DmaBufImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}
