//! Persistently mapped host-coherent buffers
//!
//! The cube keeps its uniform block and all vertex streams in one buffer
//! that stays mapped for its whole life. Host writes need no flush.

use ash::{vk, Device};
use super::context::{GpuContext, VulkanResult, VulkanError};

/// Buffer wrapper with host-coherent memory mapped for its lifetime
pub struct MappedBuffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    mapped: *mut u8,
    size: vk::DeviceSize,
}

impl MappedBuffer {
    /// Create a buffer of `size` bytes, allocate host-coherent memory for it
    /// and map the whole range
    pub fn new(
        context: &GpuContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<Self> {
        let device = context.device().clone();

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device.create_buffer(&buffer_info, None)
                .map_err(VulkanError::Api)?
        };

        let mem_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory_type_index = match context.find_host_coherent_memory(mem_requirements.memory_type_bits) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(VulkanError::Api(e));
            }
        };

        let mapped = unsafe {
            device.bind_buffer_memory(buffer, memory, 0)
                .and_then(|()| device.map_memory(memory, 0, size, vk::MemoryMapFlags::empty()))
        };

        let mapped = match mapped {
            Ok(ptr) => ptr.cast::<u8>(),
            Err(e) => {
                unsafe {
                    device.destroy_buffer(buffer, None);
                    device.free_memory(memory, None);
                }
                return Err(VulkanError::Api(e));
            }
        };

        Ok(Self {
            device,
            buffer,
            memory,
            mapped,
            size,
        })
    }

    /// Copy `bytes` into the mapping at `offset`
    pub fn write(&mut self, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        let end = offset.checked_add(bytes.len() as vk::DeviceSize);
        if end.map_or(true, |end| end > self.size) {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "write of {} bytes at offset {} overruns buffer of {} bytes",
                    bytes.len(), offset, self.size
                ),
            });
        }

        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped.add(offset as usize), bytes.len());
        }
        Ok(())
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.unmap_memory(self.memory);
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}
