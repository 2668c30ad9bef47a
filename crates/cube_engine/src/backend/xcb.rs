//! X11 window back-end over XCB
//!
//! Repaints are driven through the X event queue: every finished frame sends
//! a `ClientMessage` of type `NOTICE` to the window, and the next call to
//! `acquire` renders when it sees one.

use ash::extensions::khr::XcbSurface;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle, XcbDisplayHandle, XcbWindowHandle};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    AtomEnum, ClientMessageEvent, ConnectionExt as _, CreateWindowAux, EventMask, PropMode,
    Visualid, Window, WindowClass,
};
use x11rb::protocol::Event;
use x11rb::wrapper::ConnectionExt as _;
use x11rb::xcb_ffi::XCBConnection;

use super::presenter::SwapchainPresenter;
use super::{init_error, AcquireResult, BackendError, BackendResult, FrameCycle, PresentResult};
use crate::core::config::CubeConfig;
use crate::render::vulkan::{ExtensionRequest, GpuContext, Surface};

/// Window title set through `_NET_WM_NAME`
pub const TITLE: &str = "Vulkan Cube";

/// X key code of the Escape key
const KEY_ESCAPE: u8 = 9;

/// Acquire timeout in nanoseconds
const ACQUIRE_TIMEOUT: u64 = 60;

fn protocol_error(e: impl std::fmt::Display) -> BackendError {
    BackendError::Protocol(format!("X connection error: {}", e))
}

/// What one X event asks the loop to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum XcbAction {
    None,
    Repaint,
    Resize(vk::Extent2D),
    Quit,
}

#[derive(Debug, Clone, Copy)]
struct Atoms {
    wm_protocols: u32,
    wm_delete_window: u32,
}

/// Swapchain on an X11 window
pub struct XcbBackend {
    presenter: SwapchainPresenter,
    context: GpuContext,
    window: Window,
    atoms: Atoms,
    conn: XCBConnection,
}

impl XcbBackend {
    /// Open the window, check Vulkan can present to it and build the renderer
    ///
    /// The swapchain itself is created on the first repaint.
    pub fn new(config: &CubeConfig) -> BackendResult<Self> {
        let (conn, screen_num) = XCBConnection::connect(None).map_err(init_error("failed to connect to X"))?;
        let screen = &conn.setup().roots[screen_num];
        let (root, root_visual) = (screen.root, screen.root_visual);

        let window = conn.generate_id().map_err(init_error("failed to allocate window id"))?;
        let width = u16::try_from(config.width).unwrap_or(u16::MAX);
        let height = u16::try_from(config.height).unwrap_or(u16::MAX);

        conn.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            window,
            root,
            0,
            0,
            width,
            height,
            0,
            WindowClass::INPUT_OUTPUT,
            root_visual,
            &CreateWindowAux::new()
                .event_mask(EventMask::EXPOSURE | EventMask::STRUCTURE_NOTIFY | EventMask::KEY_PRESS),
        )
        .map_err(init_error("failed to create window"))?;

        let atoms = Atoms {
            wm_protocols: intern_atom(&conn, b"WM_PROTOCOLS")?,
            wm_delete_window: intern_atom(&conn, b"WM_DELETE_WINDOW")?,
        };
        conn.change_property32(
            PropMode::REPLACE,
            window,
            atoms.wm_protocols,
            AtomEnum::ATOM,
            &[atoms.wm_delete_window],
        )
        .map_err(init_error("failed to set WM_PROTOCOLS"))?;

        let net_wm_name = intern_atom(&conn, b"_NET_WM_NAME")?;
        let utf8_string = intern_atom(&conn, b"UTF8_STRING")?;
        conn.change_property8(PropMode::REPLACE, window, net_wm_name, utf8_string, TITLE.as_bytes())
            .map_err(init_error("failed to set window title"))?;

        conn.map_window(window).map_err(init_error("failed to map window"))?;
        conn.flush().map_err(init_error("failed to flush X connection"))?;

        let context = GpuContext::new(&ExtensionRequest::surface(XcbSurface::name()))?;
        require_xcb_presentation(&context, &conn, root_visual)?;

        let mut display = XcbDisplayHandle::empty();
        display.connection = conn.get_raw_xcb_connection();
        display.screen = i32::try_from(screen_num).unwrap_or(0);
        let mut handle = XcbWindowHandle::empty();
        handle.window = window;
        handle.visual_id = root_visual;

        let surface = unsafe {
            Surface::from_raw(&context, RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle))?
        };
        let extent = vk::Extent2D {
            width: config.width,
            height: config.height,
        };
        let presenter = SwapchainPresenter::new(&context, surface, extent, config)?;

        Ok(Self {
            presenter,
            context,
            window,
            atoms,
            conn,
        })
    }

    fn schedule_repaint(&self) -> BackendResult<()> {
        let event = ClientMessageEvent::new(32, self.window, AtomEnum::NOTICE, [0u32; 5]);
        self.conn
            .send_event(false, self.window, EventMask::NO_EVENT, event)
            .map_err(protocol_error)?;
        self.conn.flush().map_err(protocol_error)
    }

    fn classify(&self, event: &Event) -> XcbAction {
        match event {
            Event::ClientMessage(message) if message.window == self.window => {
                if message.type_ == self.atoms.wm_protocols
                    && message.data.as_data32()[0] == self.atoms.wm_delete_window
                {
                    XcbAction::Quit
                } else if message.type_ == u32::from(AtomEnum::NOTICE) {
                    XcbAction::Repaint
                } else {
                    XcbAction::None
                }
            }
            Event::ConfigureNotify(configure) => {
                let extent = vk::Extent2D {
                    width: u32::from(configure.width),
                    height: u32::from(configure.height),
                };
                if extent == self.presenter.extent() {
                    XcbAction::None
                } else {
                    XcbAction::Resize(extent)
                }
            }
            Event::Expose(_) => XcbAction::Repaint,
            Event::KeyPress(key) if key.detail == KEY_ESCAPE => XcbAction::Quit,
            _ => XcbAction::None,
        }
    }
}

fn intern_atom(conn: &XCBConnection, name: &'static [u8]) -> BackendResult<u32> {
    let reply = conn
        .intern_atom(false, name)
        .map_err(init_error("failed to intern atom"))?
        .reply()
        .map_err(init_error("failed to intern atom"))?;
    Ok(reply.atom)
}

fn require_xcb_presentation(
    context: &GpuContext,
    conn: &XCBConnection,
    visual: Visualid,
) -> BackendResult<()> {
    let loader = XcbSurface::new(context.entry(), context.instance());
    let raw = conn.get_raw_xcb_connection().cast::<vk::xcb_connection_t>();
    let supported = unsafe {
        loader.get_physical_device_xcb_presentation_support(
            context.physical_device(),
            context.queue_family(),
            &mut *raw,
            visual,
        )
    };

    if supported {
        Ok(())
    } else {
        Err(BackendError::SurfaceUnsupported(
            "Vulkan not supported on given X window".to_string(),
        ))
    }
}

impl FrameCycle for XcbBackend {
    fn acquire(&mut self) -> BackendResult<AcquireResult> {
        loop {
            let mut repaint = false;
            let mut next = Some(self.conn.wait_for_event().map_err(protocol_error)?);

            while let Some(event) = next {
                match self.classify(&event) {
                    XcbAction::Quit => return Ok(AcquireResult::Quit),
                    XcbAction::Repaint => repaint = true,
                    XcbAction::Resize(extent) => {
                        log::debug!("Window resized to {}x{}", extent.width, extent.height);
                        self.presenter.invalidate(&self.context)?;
                        self.presenter.set_extent(extent);
                    }
                    XcbAction::None => {}
                }
                next = self.conn.poll_for_event().map_err(protocol_error)?;
            }

            if repaint {
                self.presenter.ensure_swapchain(&self.context)?;
                let result = self.presenter.acquire(&self.context, ACQUIRE_TIMEOUT)?;
                if result == AcquireResult::Retry {
                    self.schedule_repaint()?;
                }
                return Ok(result);
            }

            self.conn.flush().map_err(protocol_error)?;
        }
    }

    fn render(&mut self, index: u32) -> BackendResult<()> {
        self.presenter.render(&self.context, index)
    }

    fn present(&mut self, index: u32) -> BackendResult<PresentResult> {
        let result = self.presenter.present(&self.context, index)?;
        self.schedule_repaint()?;
        Ok(result)
    }

    fn resize(&mut self) -> BackendResult<()> {
        self.presenter.invalidate(&self.context)?;
        self.schedule_repaint()
    }
}
