//! Vulkan context management
//!
//! Owns the instance, the single logical device and its graphics queue, the
//! command pool and the image-available semaphore. Everything else in the
//! renderer borrows a cloned `ash::Device` from here and must be dropped
//! before the context.

use ash::{Device, Entry, Instance};
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::vk;
use std::ffi::{CStr, CString};
use thiserror::Error;

use super::commands::CommandPool;
use super::sync::Semaphore;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Physical device enumeration returned nothing
    #[error("No Vulkan physical device found")]
    NoDevice,

    /// No memory type satisfies the request
    #[error("No suitable memory type found")]
    NoSuitableMemory,

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// The queue family cannot present to the surface
    #[error("{0}")]
    SurfaceUnsupported(String),

    /// Acquire or present reported an out-of-date swap chain
    #[error("Swap chain out of date")]
    SwapchainLost,
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Extensions requested on top of `VK_KHR_surface` and `VK_KHR_swapchain`
#[derive(Debug, Clone, Default)]
pub struct ExtensionRequest {
    /// Additional instance extensions
    pub instance: Vec<&'static CStr>,
    /// Additional device extensions
    pub device: Vec<&'static CStr>,
}

impl ExtensionRequest {
    /// Only the base surface and swap-chain extensions
    pub fn none() -> Self {
        Self::default()
    }

    /// Base extensions plus one platform surface extension
    pub fn surface(extension: &'static CStr) -> Self {
        Self {
            instance: vec![extension],
            device: Vec::new(),
        }
    }
}

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
}

impl VulkanInstance {
    /// Load the Vulkan library and create an instance with `extensions`
    pub fn new(app_name: &str, extensions: &[&CStr]) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {:?}", e)))?;

        let app_name_cstr = CString::new(app_name)
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid application name: {}", e)))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(0)
            .api_version(vk::API_VERSION_1_0);

        let extension_ptrs: Vec<*const std::os::raw::c_char> = extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs);

        let instance = unsafe {
            entry.create_instance(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { entry, instance })
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}

/// The physical device in use and the tables read from it
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory types and heaps
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl PhysicalDeviceInfo {
    /// Take the first enumerated device
    pub fn select_first(instance: &Instance) -> VulkanResult<Self> {
        let devices = unsafe {
            instance.enumerate_physical_devices()
                .map_err(VulkanError::Api)?
        };

        log::info!("{} physical devices", devices.len());
        let device = *devices.first().ok_or(VulkanError::NoDevice)?;

        let properties = unsafe { instance.get_physical_device_properties(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        log::info!(
            "vendor id {:04x}, device name {}",
            properties.vendor_id,
            name.to_string_lossy()
        );

        let queue_families = unsafe {
            instance.get_physical_device_queue_family_properties(device)
        };
        let graphics = queue_families
            .first()
            .map_or(false, |family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS));
        if !graphics {
            return Err(VulkanError::InitializationFailed(
                "Queue family 0 has no graphics capability".to_string()
            ));
        }

        Ok(Self {
            device,
            properties,
            memory_properties,
        })
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub queue: vk::Queue,
}

impl LogicalDevice {
    /// Index of the one queue family the device is created on
    pub const QUEUE_FAMILY: u32 = 0;

    /// Create the device with one graphics queue and `extensions` enabled
    pub fn new(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        extensions: &[&CStr],
    ) -> VulkanResult<Self> {
        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(Self::QUEUE_FAMILY)
            .queue_priorities(&priorities)
            .build()];

        let extension_ptrs: Vec<*const std::os::raw::c_char> = extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs);

        let device = unsafe {
            instance.create_device(physical_device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let queue = unsafe { device.get_device_queue(Self::QUEUE_FAMILY, 0) };

        Ok(Self { device, queue })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Smallest index that is set in `allowed_mask` and whose memory type has
/// every flag in `required`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    allowed_mask: u32,
    required: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    (0..memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32))
        .find(|&i| {
            allowed_mask & (1 << i) != 0
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or(VulkanError::NoSuitableMemory)
}

/// Main Vulkan context that owns the core Vulkan objects
///
/// Fields drop in declaration order, so the device-owned objects go first
/// and the instance last.
pub struct GpuContext {
    semaphore: Semaphore,
    command_pool: CommandPool,
    device: LogicalDevice,
    physical_device: PhysicalDeviceInfo,
    surface_loader: Surface,
    instance: VulkanInstance,
}

impl GpuContext {
    /// Create the instance, device, queue, command pool and semaphore
    pub fn new(request: &ExtensionRequest) -> VulkanResult<Self> {
        let mut instance_extensions = vec![Surface::name()];
        instance_extensions.extend(request.instance.iter().copied());
        let instance = VulkanInstance::new("vkcube", &instance_extensions)?;

        let physical_device = PhysicalDeviceInfo::select_first(&instance.instance)?;

        let mut device_extensions = vec![SwapchainLoader::name()];
        device_extensions.extend(request.device.iter().copied());
        let device = LogicalDevice::new(&instance.instance, physical_device.device, &device_extensions)?;

        let command_pool = CommandPool::new(device.device.clone(), LogicalDevice::QUEUE_FAMILY)?;
        let semaphore = Semaphore::new(device.device.clone())?;
        let surface_loader = Surface::new(&instance.entry, &instance.instance);

        Ok(Self {
            semaphore,
            command_pool,
            device,
            physical_device,
            surface_loader,
            instance,
        })
    }

    /// Memory type for host-visible, host-coherent allocations
    pub fn find_host_coherent_memory(&self, allowed_mask: u32) -> VulkanResult<u32> {
        find_memory_type(
            &self.physical_device.memory_properties,
            allowed_mask,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Get a reference to the Vulkan entry
    pub fn entry(&self) -> &Entry {
        &self.instance.entry
    }

    /// Get a reference to the Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Get the logical device
    pub fn device(&self) -> &Device {
        &self.device.device
    }

    /// Get the physical device handle
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device.device
    }

    /// Memory type table of the physical device
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.physical_device.memory_properties
    }

    /// Get the graphics queue
    pub fn queue(&self) -> vk::Queue {
        self.device.queue
    }

    /// Get the graphics queue family index
    pub fn queue_family(&self) -> u32 {
        LogicalDevice::QUEUE_FAMILY
    }

    /// Get the command pool
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    /// Semaphore signalled by swap-chain image acquisition
    pub fn semaphore(&self) -> vk::Semaphore {
        self.semaphore.handle()
    }

    /// Get the surface loader
    pub fn surface_loader(&self) -> &Surface {
        &self.surface_loader
    }

    /// Block until the graphics queue has drained
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe {
            self.device.device.queue_wait_idle(self.device.queue)
                .map_err(VulkanError::Api)
        }
    }
}

/// Whether `err` means there is no usable Vulkan driver on this machine
#[cfg(test)]
pub(crate) fn no_gpu(err: &VulkanError) -> bool {
    match err {
        VulkanError::NoDevice => true,
        VulkanError::Api(vk::Result::ERROR_INCOMPATIBLE_DRIVER) => true,
        VulkanError::InitializationFailed(reason) => reason.starts_with("Failed to load Vulkan"),
        _ => false,
    }
}

/// Shaders built by the crate's build script, if glslc was available
#[cfg(test)]
pub(crate) fn built_shaders() -> Option<crate::core::config::ShaderConfig> {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../target/shaders");
    let shaders = crate::core::config::ShaderConfig::new(
        dir.join(crate::core::config::ShaderConfig::VERTEX_SPV),
        dir.join(crate::core::config::ShaderConfig::FRAGMENT_SPV),
    );
    (shaders.vertex_shader_path.exists() && shaders.fragment_shader_path.exists()).then_some(shaders)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_driver_is_recognised() {
        assert!(no_gpu(&VulkanError::NoDevice));
        assert!(no_gpu(&VulkanError::Api(vk::Result::ERROR_INCOMPATIBLE_DRIVER)));
        assert!(!no_gpu(&VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)));
        assert!(!no_gpu(&VulkanError::SwapchainLost));
    }

    fn memory_table(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (slot, &property_flags) in props.memory_types.iter_mut().zip(flags) {
            slot.property_flags = property_flags;
        }
        props
    }

    const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    #[test]
    fn test_picks_smallest_matching_index() {
        let table = memory_table(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            HOST | vk::MemoryPropertyFlags::HOST_CACHED,
            HOST,
        ]);
        assert_eq!(find_memory_type(&table, 0b1111, HOST).unwrap(), 2);
    }

    #[test]
    fn test_respects_allowed_mask() {
        let table = memory_table(&[HOST, vk::MemoryPropertyFlags::DEVICE_LOCAL, HOST]);
        assert_eq!(find_memory_type(&table, 0b110, HOST).unwrap(), 2);
    }

    #[test]
    fn test_visible_without_coherent_is_rejected() {
        let table = memory_table(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);
        assert!(matches!(
            find_memory_type(&table, u32::MAX, HOST),
            Err(VulkanError::NoSuitableMemory)
        ));
    }

    #[test]
    fn test_empty_mask_never_matches() {
        let table = memory_table(&[HOST]);
        assert!(find_memory_type(&table, 0, HOST).is_err());
    }

    #[test]
    fn test_bits_beyond_type_count_are_ignored() {
        let table = memory_table(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert!(find_memory_type(&table, 0b10, HOST).is_err());
    }
}
