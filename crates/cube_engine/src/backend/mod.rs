//! # Presentation Back-ends
//!
//! Each back-end supplies the renderer with an output size, an image format
//! and a fixed image set, and drives an acquire / render / present cycle over
//! it. [`Backend`] is a closed union over the compiled-in variants; the
//! driver only talks to it through [`FrameCycle`].
//!
//! ## Variants
//!
//! - **Headless**: one linear host-visible image, written out as PNG
//! - **KMS**: two GBM scan-out buffers flipped on the CRTC (feature `kms`)
//! - **KHR display**: swapchain on a display plane
//! - **XCB**: swapchain on an X11 window (feature `xcb`)
//! - **Wayland**: swapchain on an xdg-toplevel (feature `wayland`)

pub mod headless;
pub mod khr;
pub mod png;
pub mod presenter;
#[cfg(feature = "kms")]
pub mod kms;
#[cfg(feature = "kms")]
pub mod vt;
#[cfg(feature = "wayland")]
pub mod wayland;
#[cfg(feature = "xcb")]
pub mod xcb;

use thiserror::Error;

use crate::core::config::{CubeConfig, DisplayMode};
use crate::foundation::time::FrameClock;
use crate::render::vulkan::VulkanError;

pub use headless::HeadlessBackend;
pub use khr::KhrBackend;
#[cfg(feature = "kms")]
pub use kms::KmsBackend;
pub use presenter::SwapchainPresenter;
#[cfg(feature = "wayland")]
pub use wayland::WaylandBackend;
#[cfg(feature = "xcb")]
pub use xcb::XcbBackend;

/// Presentation-layer errors
#[derive(Error, Debug)]
pub enum BackendError {
    /// The back-end cannot start here; auto mode tries the next one
    #[error("{0}")]
    Init(String),

    /// The GPU cannot present to the back-end's surface
    #[error("{0}")]
    SurfaceUnsupported(String),

    /// GPU-side failure
    #[error(transparent)]
    Vulkan(#[from] VulkanError),

    /// Operating-system I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// PNG encoding failure
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// DRM or GBM failure
    #[error("{0}")]
    Drm(String),

    /// Window-system protocol failure after initialisation
    #[error("{0}")]
    Protocol(String),
}

impl BackendError {
    /// Whether auto mode may fall back to the next back-end
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Init(_))
    }
}

/// Result type for back-end operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Outcome of asking a back-end for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    /// Render into this image
    Image(u32),
    /// Nothing ready yet; a repaint has been scheduled
    Retry,
    /// The image set is stale and must be rebuilt
    Resize,
    /// The user asked to quit or the back-end is done
    Quit,
    /// The presentation engine failed; stop cleanly
    Fatal,
}

/// Outcome of presenting a rendered image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentResult {
    /// The image is on its way to the screen (or disk)
    Presented,
    /// The image set went stale while presenting
    Resize,
}

/// The acquire / render / present cycle the driver loop runs
pub trait FrameCycle {
    /// Wait for and claim the next image to render into
    fn acquire(&mut self) -> BackendResult<AcquireResult>;

    /// Record and submit one frame into image `index`
    fn render(&mut self, index: u32) -> BackendResult<()>;

    /// Hand image `index` to the display
    fn present(&mut self, index: u32) -> BackendResult<PresentResult>;

    /// Drop the stale image set and rebuild it
    fn resize(&mut self) -> BackendResult<()>;
}

/// One initialised presentation back-end
pub enum Backend {
    /// Single PNG snapshot
    Headless(HeadlessBackend),
    /// Kernel mode-setting scan-out
    #[cfg(feature = "kms")]
    Kms(KmsBackend),
    /// Direct-to-display plane
    Khr(KhrBackend),
    /// X11 window
    #[cfg(feature = "xcb")]
    Xcb(XcbBackend),
    /// Wayland window
    #[cfg(feature = "wayland")]
    Wayland(WaylandBackend),
}

impl Backend {
    /// Initialise the back-end for a concrete `mode`
    ///
    /// `Auto` is resolved by the driver and is rejected here.
    pub fn init(mode: DisplayMode, config: &CubeConfig) -> BackendResult<Self> {
        log::debug!("Initializing {} back-end", mode);
        match mode {
            DisplayMode::Headless => HeadlessBackend::new(config).map(Self::Headless),
            DisplayMode::Khr => KhrBackend::new(config).map(Self::Khr),
            #[cfg(feature = "kms")]
            DisplayMode::Kms => KmsBackend::new(config).map(Self::Kms),
            #[cfg(feature = "xcb")]
            DisplayMode::Xcb => XcbBackend::new(config).map(Self::Xcb),
            #[cfg(feature = "wayland")]
            DisplayMode::Wayland => WaylandBackend::new(config).map(Self::Wayland),
            DisplayMode::Auto => Err(BackendError::Init(
                "auto mode must be resolved before initialisation".to_string(),
            )),
            #[allow(unreachable_patterns)]
            _ => Err(BackendError::Init(format!(
                "{} support is not available in this build",
                mode
            ))),
        }
    }

    /// Display mode this back-end implements
    pub fn mode(&self) -> DisplayMode {
        match self {
            Self::Headless(_) => DisplayMode::Headless,
            #[cfg(feature = "kms")]
            Self::Kms(_) => DisplayMode::Kms,
            Self::Khr(_) => DisplayMode::Khr,
            #[cfg(feature = "xcb")]
            Self::Xcb(_) => DisplayMode::Xcb,
            #[cfg(feature = "wayland")]
            Self::Wayland(_) => DisplayMode::Wayland,
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $backend:ident => $call:expr) => {
        match $self {
            Backend::Headless($backend) => $call,
            #[cfg(feature = "kms")]
            Backend::Kms($backend) => $call,
            Backend::Khr($backend) => $call,
            #[cfg(feature = "xcb")]
            Backend::Xcb($backend) => $call,
            #[cfg(feature = "wayland")]
            Backend::Wayland($backend) => $call,
        }
    };
}

impl FrameCycle for Backend {
    fn acquire(&mut self) -> BackendResult<AcquireResult> {
        dispatch!(self, backend => backend.acquire())
    }

    fn render(&mut self, index: u32) -> BackendResult<()> {
        dispatch!(self, backend => backend.render(index))
    }

    fn present(&mut self, index: u32) -> BackendResult<PresentResult> {
        dispatch!(self, backend => backend.present(index))
    }

    fn resize(&mut self) -> BackendResult<()> {
        dispatch!(self, backend => backend.resize())
    }
}

/// Animation clock for a back-end: fixed when the configuration pins a tick
pub(crate) fn frame_clock(config: &CubeConfig) -> FrameClock {
    config.fixed_tick.map_or_else(FrameClock::start, FrameClock::fixed)
}

/// Wrap a failure as an initialisation error, prefixed with `context`
pub(crate) fn init_error<E: std::fmt::Display>(context: &'static str) -> impl Fn(E) -> BackendError {
    move |e| BackendError::Init(format!("{}: {}", context, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_init_errors_are_recoverable() {
        assert!(BackendError::Init("no display".to_string()).is_recoverable());
        assert!(!BackendError::SurfaceUnsupported("nope".to_string()).is_recoverable());
        assert!(!BackendError::Vulkan(VulkanError::NoDevice).is_recoverable());
        assert!(!BackendError::Protocol("gone".to_string()).is_recoverable());
    }

    #[test]
    fn test_error_messages_are_single_line() {
        let e = BackendError::SurfaceUnsupported("Vulkan not supported on given X window".to_string());
        assert_eq!(e.to_string(), "Vulkan not supported on given X window");
        assert!(!BackendError::Vulkan(VulkanError::SwapchainLost).to_string().contains('\n'));
    }

    #[test]
    fn test_frame_clock_follows_fixed_tick() {
        let mut config = CubeConfig::default();
        config.fixed_tick = Some(0);
        assert_eq!(frame_clock(&config).tick(), 0);
    }

    #[test]
    fn test_auto_is_not_a_backend() {
        let config = CubeConfig::default();
        assert!(matches!(
            Backend::init(DisplayMode::Auto, &config),
            Err(BackendError::Init(_))
        ));
    }
}
