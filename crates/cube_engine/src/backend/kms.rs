//! Kernel mode-setting back-end
//!
//! Renders straight into two GBM scan-out buffers and flips between them on
//! the CRTC that currently drives the first connected connector, in the mode
//! it is already running. Frames are paced by page-flip completion events
//! read from the DRM file descriptor; stdin is polled alongside it for the
//! quit keys.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};

use ash::vk;
use drm::control::{
    connector, crtc, framebuffer, Device as ControlDevice, FbCmd2Flags, Mode, PageFlipFlags,
};
use gbm::{BufferObject, BufferObjectFlags};

use super::vt::VtGuard;
use super::{AcquireResult, BackendError, BackendResult, FrameCycle, PresentResult};
use crate::core::config::CubeConfig;
use crate::render::renderer::Renderer;
use crate::render::vulkan::{DmaBufImage, ExtensionRequest, GpuContext, VulkanError};

/// Attachment format of the imported scan-out images
pub const FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Scan-out buffers flipped between
const BUFFER_COUNT: usize = 2;

/// An open DRM device node
struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl drm::Device for Card {}
impl ControlDevice for Card {}

fn drm_error(context: &'static str) -> impl Fn(std::io::Error) -> BackendError {
    move |e| BackendError::Drm(format!("{}: {}", context, e))
}

/// Whether a chunk read from the raw console asks to quit
///
/// `q` quits; so does ESC, but only on its own, since escape sequences from
/// arrow and function keys arrive in one read.
fn is_quit_input(input: &[u8]) -> bool {
    match input.first() {
        Some(b'q') => true,
        Some(0x1b) => input.len() == 1,
        _ => false,
    }
}

/// Line printed to stdout once the output mode is known
fn mode_info(hdisplay: u16, vdisplay: u16) -> String {
    format!("mode info: hdisplay {}, vdisplay {}", hdisplay, vdisplay)
}

/// One GBM buffer object seen by Vulkan as an image and by DRM as a framebuffer
struct ScanoutBuffer {
    image: DmaBufImage,
    framebuffer: framebuffer::Handle,
    _bo: BufferObject<()>,
}

/// Output of the current CRTC configuration
struct Output {
    connector: connector::Handle,
    crtc: crtc::Handle,
    mode: Mode,
}

fn find_output(card: &impl ControlDevice) -> BackendResult<Output> {
    let resources = card
        .resource_handles()
        .map_err(drm_error("failed to get KMS resources"))?;

    let connector = resources
        .connectors()
        .iter()
        .filter_map(|&handle| card.get_connector(handle, false).ok())
        .find(|info| info.state() == connector::State::Connected)
        .ok_or_else(|| BackendError::Init("no connected connector!".to_string()))?;

    let encoder = connector
        .current_encoder()
        .and_then(|handle| card.get_encoder(handle).ok())
        .ok_or_else(|| BackendError::Drm("failed to get encoder".to_string()))?;

    let crtc = encoder
        .crtc()
        .and_then(|handle| card.get_crtc(handle).ok())
        .ok_or_else(|| BackendError::Drm("failed to get crtc".to_string()))?;

    let mode = crtc
        .mode()
        .ok_or_else(|| BackendError::Drm("crtc has no active mode".to_string()))?;

    Ok(Output {
        connector: connector.handle(),
        crtc: crtc.handle(),
        mode,
    })
}

/// Double-buffered scan-out on the first connected output
pub struct KmsBackend {
    renderer: Renderer,
    buffers: Vec<ScanoutBuffer>,
    context: GpuContext,
    gbm: gbm::Device<Card>,
    output: Output,
    current: u32,
    started: bool,
    _vt: VtGuard,
}

impl KmsBackend {
    /// Take over the console, find the output and import its scan-out buffers
    pub fn new(config: &CubeConfig) -> BackendResult<Self> {
        let vt = VtGuard::acquire()?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config.drm_device)
            .map_err(|e| {
                BackendError::Init(format!(
                    "failed to open {}: {}",
                    config.drm_device.display(),
                    e
                ))
            })?;
        let card = Card(file);

        let output = find_output(&card)?;
        let (width, height) = output.mode.size();
        println!("{}", mode_info(width, height));
        let extent = vk::Extent2D {
            width: u32::from(width),
            height: u32::from(height),
        };

        let gbm = gbm::Device::new(card).map_err(drm_error("failed to create GBM device"))?;

        let context = GpuContext::new(&ExtensionRequest {
            instance: DmaBufImage::instance_extensions(),
            device: DmaBufImage::device_extensions(),
        })?;

        let mut buffers = Vec::with_capacity(BUFFER_COUNT);
        for _ in 0..BUFFER_COUNT {
            buffers.push(create_scanout_buffer(&context, &gbm, extent)?);
        }

        let mut renderer = Renderer::new(
            &context,
            FORMAT,
            extent,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            &config.shaders,
            super::frame_clock(config),
        )?;
        let images: Vec<vk::Image> = buffers.iter().map(|b| b.image.handle()).collect();
        renderer.set_images(&context, &images, extent)?;

        Ok(Self {
            renderer,
            buffers,
            context,
            gbm,
            output,
            current: 0,
            started: false,
            _vt: vt,
        })
    }

    fn flip_to(&self, index: usize) -> BackendResult<()> {
        self.gbm
            .page_flip(
                self.output.crtc,
                self.buffers[index].framebuffer,
                PageFlipFlags::EVENT,
                None,
            )
            .map_err(drm_error("pageflip failed"))
    }

    /// Set the mode on the first buffer and queue the first flip
    fn start(&mut self) -> BackendResult<()> {
        self.gbm
            .set_crtc(
                self.output.crtc,
                Some(self.buffers[0].framebuffer),
                (0, 0),
                &[self.output.connector],
                Some(self.output.mode),
            )
            .map_err(drm_error("modeset failed"))?;
        self.flip_to(0)?;
        self.started = true;
        Ok(())
    }
}

fn create_scanout_buffer(
    context: &GpuContext,
    gbm: &gbm::Device<Card>,
    extent: vk::Extent2D,
) -> BackendResult<ScanoutBuffer> {
    let bo = gbm
        .create_buffer_object::<()>(
            extent.width,
            extent.height,
            gbm::Format::Xrgb8888,
            BufferObjectFlags::SCANOUT | BufferObjectFlags::LINEAR,
        )
        .map_err(drm_error("failed to create buffer object"))?;

    let fd = bo
        .fd()
        .map_err(|e| BackendError::Drm(format!("failed to export buffer object: {}", e)))?;

    let image = DmaBufImage::import(context, fd, FORMAT, extent, bo.stride()).map_err(|e| match e {
        VulkanError::InitializationFailed(reason) => BackendError::Init(reason),
        other => BackendError::Vulkan(other),
    })?;

    let framebuffer = gbm
        .add_planar_framebuffer(&bo, FbCmd2Flags::empty())
        .map_err(drm_error("addfb2 failed"))?;

    Ok(ScanoutBuffer {
        image,
        framebuffer,
        _bo: bo,
    })
}

impl FrameCycle for KmsBackend {
    fn acquire(&mut self) -> BackendResult<AcquireResult> {
        if !self.started {
            self.start()?;
        }

        loop {
            let mut fds = [
                libc::pollfd {
                    fd: libc::STDIN_FILENO,
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.gbm.as_fd().as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];

            if unsafe { libc::poll(fds.as_mut_ptr(), 2, -1) } == -1 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }

            if fds[0].revents & libc::POLLIN != 0 {
                let mut input = [0u8; 16];
                let len = unsafe { libc::read(libc::STDIN_FILENO, input.as_mut_ptr().cast(), input.len()) };
                let len = usize::try_from(len).unwrap_or(0);
                if is_quit_input(&input[..len]) {
                    return Ok(AcquireResult::Quit);
                }
            }

            if fds[1].revents & libc::POLLIN != 0 {
                let events = self.gbm.receive_events().map_err(drm_error("failed to read DRM events"))?;
                for _ in events {}
                return Ok(AcquireResult::Image(self.current & 1));
            }
        }
    }

    fn render(&mut self, index: u32) -> BackendResult<()> {
        self.renderer.render_frame(&self.context, index, None)?;
        Ok(())
    }

    fn present(&mut self, index: u32) -> BackendResult<PresentResult> {
        // Nothing fences scan-out against the GPU, so finish the frame first
        self.context.wait_idle()?;
        self.flip_to(index as usize)?;
        self.current = self.current.wrapping_add(1);
        Ok(PresentResult::Presented)
    }

    fn resize(&mut self) -> BackendResult<()> {
        Ok(())
    }
}

impl Drop for KmsBackend {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::warn!("Failed to drain the queue before teardown: {}", e);
        }
        for buffer in &self.buffers {
            if let Err(e) = self.gbm.destroy_framebuffer(buffer.framebuffer) {
                log::warn!("Failed to destroy framebuffer: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_info_line() {
        assert_eq!(mode_info(1920, 1080), "mode info: hdisplay 1920, vdisplay 1080");
    }

    #[test]
    fn test_q_quits() {
        assert!(is_quit_input(b"q"));
        assert!(is_quit_input(b"q\n"));
    }

    #[test]
    fn test_lone_escape_quits() {
        assert!(is_quit_input(&[0x1b]));
    }

    #[test]
    fn test_escape_sequence_does_not_quit() {
        // Up arrow
        assert!(!is_quit_input(&[0x1b, b'[', b'A']));
        assert!(!is_quit_input(b"x"));
        assert!(!is_quit_input(&[]));
    }
}
