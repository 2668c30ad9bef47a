//! Direct-to-display back-end through `VK_KHR_display`
//!
//! The user picks a display, a mode and a plane by index. Any index left
//! unset prints the matching inventory on stdout and fails initialisation,
//! so `-k 0` lists the modes of display 0 and `-k 0:0` its planes.

use std::ffi::CStr;
use std::fmt::Write as _;

use ash::extensions::khr::Display;
use ash::vk;

use super::presenter::SwapchainPresenter;
use super::{AcquireResult, BackendError, BackendResult, FrameCycle, PresentResult};
use crate::core::config::{CubeConfig, KhrSelection};
use crate::render::vulkan::{ExtensionRequest, GpuContext, Surface, VulkanError};

fn yes_no(value: vk::Bool32) -> &'static str {
    if value == vk::TRUE {
        "yes"
    } else {
        "no"
    }
}

fn display_name(display: &vk::DisplayPropertiesKHR) -> String {
    if display.display_name.is_null() {
        String::from("(null)")
    } else {
        unsafe { CStr::from_ptr(display.display_name) }.to_string_lossy().into_owned()
    }
}

/// Inventory of every display
pub fn format_displays(displays: &[vk::DisplayPropertiesKHR]) -> String {
    let mut out = String::new();
    for (i, display) in displays.iter().enumerate() {
        let _ = writeln!(out, "display [{}]:", i);
        let _ = writeln!(out, "   name: {}", display_name(display));
        let _ = writeln!(
            out,
            "   physical dimensions: {}x{}",
            display.physical_dimensions.width, display.physical_dimensions.height
        );
        let _ = writeln!(
            out,
            "   physical resolution: {}x{}",
            display.physical_resolution.width, display.physical_resolution.height
        );
        let _ = writeln!(out, "   plane reorder: {}", yes_no(display.plane_reorder_possible));
        let _ = writeln!(out, "   persistent content: {}", yes_no(display.persistent_content));
    }
    out
}

/// Inventory of the modes of display `index`
pub fn format_modes(index: u32, name: &str, modes: &[vk::DisplayModePropertiesKHR]) -> String {
    let mut out = format!("display [{}] ({}) modes:\n", index, name);
    for (i, mode) in modes.iter().enumerate() {
        let _ = writeln!(out, "mode [{}]:", i);
        let _ = writeln!(
            out,
            "   visible region: {}x{}",
            mode.parameters.visible_region.width, mode.parameters.visible_region.height
        );
        let _ = writeln!(out, "   refresh rate: {}", mode.parameters.refresh_rate);
    }
    out
}

/// One plane as seen from the chosen display and mode
#[derive(Debug, Clone, Default)]
pub struct PlaneReport {
    /// Stack index the plane currently occupies
    pub current_stack_index: u32,
    /// Display indices the plane can be bound to
    pub supported_displays: Vec<u32>,
    /// The plane's limits for the chosen mode
    pub capabilities: vk::DisplayPlaneCapabilitiesKHR,
}

/// Inventory of the planes usable with display `index`
pub fn format_planes(index: u32, name: &str, planes: &[PlaneReport]) -> String {
    let mut out = String::new();
    for (i, plane) in planes.iter().enumerate() {
        let caps = &plane.capabilities;
        let _ = writeln!(out, "display [{}] ({}) plane [{}]", index, name, i);
        let _ = writeln!(out, "   current stack index: {}", plane.current_stack_index);
        out.push_str("   displays supported:");
        for display in &plane.supported_displays {
            let _ = write!(out, " {}", display);
        }
        out.push('\n');
        let _ = writeln!(
            out,
            "   src pos: {}x{} -> {}x{}",
            caps.min_src_position.x, caps.min_src_position.y,
            caps.max_src_position.x, caps.max_src_position.y
        );
        let _ = writeln!(
            out,
            "   src size: {}x{} -> {}x{}",
            caps.min_src_extent.width, caps.min_src_extent.height,
            caps.max_src_extent.width, caps.max_src_extent.height
        );
        let _ = writeln!(
            out,
            "   dst pos: {}x{} -> {}x{}",
            caps.min_dst_position.x, caps.min_dst_position.y,
            caps.max_dst_position.x, caps.max_dst_position.y
        );
    }
    out
}

/// Check a user-supplied index against `count` items
///
/// `None` prints `inventory()` and fails; an out-of-range index fails with
/// `Invalid <what> index I/N`.
fn select_index(
    index: Option<u32>,
    count: usize,
    what: &str,
    inventory: impl FnOnce() -> BackendResult<String>,
) -> BackendResult<usize> {
    match index {
        None => {
            print!("{}", inventory()?);
            Err(BackendError::Init(format!("no {} index given", what)))
        }
        Some(i) if i as usize >= count => Err(BackendError::Init(format!(
            "Invalid {} index {}/{}",
            what, i, count
        ))),
        Some(i) => Ok(i as usize),
    }
}

/// Swapchain on a display plane
pub struct KhrBackend {
    presenter: SwapchainPresenter,
    context: GpuContext,
}

impl KhrBackend {
    /// Resolve the selection, create the display mode and plane surface and
    /// build the swapchain
    pub fn new(config: &CubeConfig) -> BackendResult<Self> {
        let context = GpuContext::new(&ExtensionRequest::surface(Display::name()))?;
        let loader = Display::new(context.entry(), context.instance());

        let (surface, extent) = create_plane_surface(&context, &loader, &config.khr)?;
        let mut presenter = SwapchainPresenter::new(&context, surface, extent, config)?;
        presenter.ensure_swapchain(&context)?;

        Ok(Self { presenter, context })
    }
}

fn create_plane_surface(
    context: &GpuContext,
    loader: &Display,
    selection: &KhrSelection,
) -> BackendResult<(Surface, vk::Extent2D)> {
    let physical_device = context.physical_device();
    let api = |e: vk::Result| BackendError::Vulkan(VulkanError::Api(e));

    let displays = unsafe { loader.get_physical_device_display_properties(physical_device) }
        .map_err(api)?;
    if displays.is_empty() {
        return Err(BackendError::Init("No available display".to_string()));
    }

    let display_index = select_index(selection.display, displays.len(), "display", || {
        Ok(format_displays(&displays))
    })?;
    let display = &displays[display_index];
    let name = display_name(display);

    let modes = unsafe { loader.get_display_mode_properties(physical_device, display.display) }
        .map_err(api)?;
    if modes.is_empty() {
        return Err(BackendError::Init(format!(
            "Not mode available for display {} ({})",
            display_index, name
        )));
    }

    let mode_index = select_index(selection.mode, modes.len(), "mode", || {
        Ok(format_modes(display_index as u32, &name, &modes))
    })?;
    let mode = &modes[mode_index];

    let planes = unsafe { loader.get_physical_device_display_plane_properties(physical_device) }
        .map_err(api)?;
    if planes.is_empty() {
        return Err(BackendError::Init(format!(
            "Not plane available for display {} ({})",
            display_index, name
        )));
    }

    let plane_index = select_index(selection.plane, planes.len(), "plane", || {
        planes
            .iter()
            .enumerate()
            .map(|(i, plane)| {
                let supported = unsafe {
                    loader.get_display_plane_supported_displays(physical_device, i as u32)
                }
                .map_err(api)?;
                let capabilities = unsafe {
                    loader.get_display_plane_capabilities(physical_device, mode.display_mode, i as u32)
                }
                .map_err(api)?;

                Ok(PlaneReport {
                    current_stack_index: plane.current_stack_index,
                    supported_displays: supported
                        .iter()
                        .filter_map(|s| displays.iter().position(|d| d.display == *s))
                        .map(|k| k as u32)
                        .collect(),
                    capabilities,
                })
            })
            .collect::<BackendResult<Vec<_>>>()
            .map(|reports| format_planes(display_index as u32, &name, &reports))
    })?;

    let mode_info = vk::DisplayModeCreateInfoKHR::builder().parameters(mode.parameters);
    let display_mode = unsafe { loader.create_display_mode(physical_device, display.display, &mode_info, None) }
        .map_err(|_| BackendError::Init("Unable to create mode".to_string()))?;

    let extent = mode.parameters.visible_region;
    let surface_info = vk::DisplaySurfaceCreateInfoKHR::builder()
        .display_mode(display_mode)
        .plane_index(plane_index as u32)
        .image_extent(extent);
    let surface = unsafe { loader.create_display_plane_surface(&surface_info, None) }
        .map_err(api)?;

    log::info!(
        "Display {} ({}), mode {} at {}x{}, plane {}",
        display_index, name, mode_index, extent.width, extent.height, plane_index
    );

    Ok((Surface::from_handle(context, surface), extent))
}

impl FrameCycle for KhrBackend {
    fn acquire(&mut self) -> BackendResult<AcquireResult> {
        self.presenter.acquire(&self.context, u64::MAX)
    }

    fn render(&mut self, index: u32) -> BackendResult<()> {
        self.presenter.render(&self.context, index)
    }

    fn present(&mut self, index: u32) -> BackendResult<PresentResult> {
        self.presenter.present(&self.context, index)
    }

    fn resize(&mut self) -> BackendResult<()> {
        self.presenter.invalidate(&self.context)?;
        self.presenter.ensure_swapchain(&self.context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(width: u32, height: u32, refresh_rate: u32) -> vk::DisplayModePropertiesKHR {
        vk::DisplayModePropertiesKHR {
            display_mode: vk::DisplayModeKHR::null(),
            parameters: vk::DisplayModeParametersKHR {
                visible_region: vk::Extent2D { width, height },
                refresh_rate,
            },
        }
    }

    #[test]
    fn test_display_inventory() {
        let name = CStr::from_bytes_with_nul(b"HDMI-1\0").unwrap();
        let display = vk::DisplayPropertiesKHR {
            display_name: name.as_ptr(),
            physical_dimensions: vk::Extent2D { width: 600, height: 340 },
            physical_resolution: vk::Extent2D { width: 1920, height: 1080 },
            plane_reorder_possible: vk::TRUE,
            persistent_content: vk::FALSE,
            ..Default::default()
        };

        assert_eq!(
            format_displays(&[display]),
            "display [0]:\n\
             \x20  name: HDMI-1\n\
             \x20  physical dimensions: 600x340\n\
             \x20  physical resolution: 1920x1080\n\
             \x20  plane reorder: yes\n\
             \x20  persistent content: no\n"
        );
    }

    #[test]
    fn test_mode_inventory() {
        let text = format_modes(0, "HDMI-1", &[mode(1920, 1080, 60000), mode(1280, 720, 50000)]);
        assert!(text.starts_with("display [0] (HDMI-1) modes:\nmode [0]:\n"));
        assert!(text.contains("   visible region: 1280x720\n"));
        assert!(text.ends_with("   refresh rate: 50000\n"));
    }

    #[test]
    fn test_plane_inventory_lists_supported_displays() {
        let mut report = PlaneReport {
            current_stack_index: 2,
            supported_displays: vec![0, 1],
            ..Default::default()
        };
        report.capabilities.max_src_extent = vk::Extent2D { width: 4096, height: 4096 };

        let text = format_planes(1, "DP-2", &[report]);
        assert!(text.starts_with("display [1] (DP-2) plane [0]\n"));
        assert!(text.contains("   current stack index: 2\n"));
        assert!(text.contains("   displays supported: 0 1\n"));
        assert!(text.contains("   src size: 0x0 -> 4096x4096\n"));
    }

    #[test]
    fn test_index_out_of_range() {
        let err = select_index(Some(3), 1, "display", || Ok(String::new())).unwrap_err();
        assert_eq!(err.to_string(), "Invalid display index 3/1");
    }

    #[test]
    fn test_missing_index_fails_after_inventory() {
        let mut printed = false;
        let result = select_index(None, 2, "mode", || {
            printed = true;
            Ok(String::new())
        });
        assert!(printed);
        assert!(matches!(result, Err(BackendError::Init(_))));
    }

    #[test]
    fn test_valid_index_is_returned() {
        assert_eq!(select_index(Some(1), 2, "plane", || Ok(String::new())).unwrap(), 1);
    }
}
