//! Wayland window back-end over xdg-shell
//!
//! The loop never blocks on the compositor: each `acquire` dispatches what
//! is already queued, reads the socket only if it is readable, and then
//! acquires the next swapchain image.

use std::os::fd::AsRawFd;

use ash::extensions::khr::WaylandSurface;
use ash::vk;
use raw_window_handle::{
    RawDisplayHandle, RawWindowHandle, WaylandDisplayHandle, WaylandWindowHandle,
};
use wayland_client::backend::WaylandError;
use wayland_client::protocol::{
    wl_compositor::WlCompositor,
    wl_keyboard::{self, WlKeyboard},
    wl_registry::{self, WlRegistry},
    wl_seat::{self, WlSeat},
    wl_surface::WlSurface,
};
use wayland_client::{delegate_noop, Connection, Dispatch, EventQueue, Proxy, QueueHandle, WEnum};
use wayland_protocols::xdg::shell::client::{
    xdg_surface::{self, XdgSurface},
    xdg_toplevel::{self, XdgToplevel},
    xdg_wm_base::{self, XdgWmBase},
};

use super::presenter::SwapchainPresenter;
use super::{init_error, AcquireResult, BackendError, BackendResult, FrameCycle, PresentResult};
use crate::core::config::CubeConfig;
use crate::render::vulkan::{ExtensionRequest, GpuContext, Surface};

/// Toplevel title
pub const TITLE: &str = "vkcube";

/// Linux input code of the Escape key
const KEY_ESC: u32 = 1;

/// Acquire timeout in nanoseconds
const ACQUIRE_TIMEOUT: u64 = 60;

fn protocol_error(e: impl std::fmt::Display) -> BackendError {
    BackendError::Protocol(format!("Wayland connection error: {}", e))
}

/// Globals and input state filled in by the event handlers
#[derive(Default)]
struct WaylandState {
    compositor: Option<WlCompositor>,
    wm_base: Option<XdgWmBase>,
    seat: Option<WlSeat>,
    keyboard: Option<WlKeyboard>,
    configured: bool,
    quit: bool,
}

impl Dispatch<WlRegistry, ()> for WaylandState {
    fn event(
        state: &mut Self,
        registry: &WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        if let wl_registry::Event::Global { name, interface, .. } = event {
            match interface.as_str() {
                "wl_compositor" => state.compositor = Some(registry.bind(name, 1, qh, ())),
                "xdg_wm_base" => state.wm_base = Some(registry.bind(name, 1, qh, ())),
                "wl_seat" => state.seat = Some(registry.bind(name, 1, qh, ())),
                _ => {}
            }
        }
    }
}

impl Dispatch<XdgWmBase, ()> for WaylandState {
    fn event(
        _: &mut Self,
        wm_base: &XdgWmBase,
        event: xdg_wm_base::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            wm_base.pong(serial);
        }
    }
}

impl Dispatch<XdgSurface, ()> for WaylandState {
    fn event(
        state: &mut Self,
        surface: &XdgSurface,
        event: xdg_surface::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_surface::Event::Configure { serial } = event {
            surface.ack_configure(serial);
            state.configured = true;
        }
    }
}

impl Dispatch<XdgToplevel, ()> for WaylandState {
    fn event(
        state: &mut Self,
        _: &XdgToplevel,
        event: xdg_toplevel::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_toplevel::Event::Close = event {
            state.quit = true;
        }
    }
}

impl Dispatch<WlSeat, ()> for WaylandState {
    fn event(
        state: &mut Self,
        seat: &WlSeat,
        event: wl_seat::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        if let wl_seat::Event::Capabilities { capabilities: WEnum::Value(capabilities) } = event {
            let has_keyboard = capabilities.contains(wl_seat::Capability::Keyboard);
            if has_keyboard && state.keyboard.is_none() {
                state.keyboard = Some(seat.get_keyboard(qh, ()));
            } else if !has_keyboard {
                state.keyboard = None;
            }
        }
    }
}

impl Dispatch<WlKeyboard, ()> for WaylandState {
    fn event(
        state: &mut Self,
        _: &WlKeyboard,
        event: wl_keyboard::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_keyboard::Event::Key { key, state: WEnum::Value(key_state), .. } = event {
            if key == KEY_ESC && key_state == wl_keyboard::KeyState::Pressed {
                state.quit = true;
            }
        }
    }
}

delegate_noop!(WaylandState: ignore WlCompositor);
delegate_noop!(WaylandState: ignore WlSurface);

/// Swapchain on an xdg-toplevel
pub struct WaylandBackend {
    presenter: SwapchainPresenter,
    context: GpuContext,
    state: WaylandState,
    _toplevel: XdgToplevel,
    _xdg_surface: XdgSurface,
    _surface: WlSurface,
    queue: EventQueue<WaylandState>,
    conn: Connection,
}

impl WaylandBackend {
    /// Connect, create the toplevel, wait for its first configure and build
    /// the swapchain
    pub fn new(config: &CubeConfig) -> BackendResult<Self> {
        let conn = Connection::connect_to_env().map_err(init_error("failed to connect to Wayland"))?;
        let mut queue = conn.new_event_queue();
        let qh = queue.handle();

        let _registry = conn.display().get_registry(&qh, ());
        let mut state = WaylandState::default();
        queue.roundtrip(&mut state).map_err(init_error("registry roundtrip failed"))?;

        let compositor = state
            .compositor
            .clone()
            .ok_or_else(|| BackendError::Init("Compositor is missing wl_compositor".to_string()))?;
        let surface = compositor.create_surface(&qh, ());

        let wm_base = state.wm_base.clone().ok_or_else(|| {
            BackendError::Protocol("Compositor is missing xdg_wm_base protocol support".to_string())
        })?;
        let xdg_surface = wm_base.get_xdg_surface(&surface, &qh, ());
        let toplevel = xdg_surface.get_toplevel(&qh, ());
        toplevel.set_title(TITLE.to_string());
        surface.commit();

        while !state.configured {
            queue.blocking_dispatch(&mut state).map_err(protocol_error)?;
        }

        let context = GpuContext::new(&ExtensionRequest::surface(WaylandSurface::name()))?;
        require_wayland_presentation(&context, &conn)?;

        let mut display = WaylandDisplayHandle::empty();
        display.display = conn.backend().display_ptr().cast();
        let mut handle = WaylandWindowHandle::empty();
        handle.surface = surface.id().as_ptr().cast();

        let surface_khr = unsafe {
            Surface::from_raw(&context, RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle))?
        };
        let extent = vk::Extent2D {
            width: config.width,
            height: config.height,
        };
        let mut presenter = SwapchainPresenter::new(&context, surface_khr, extent, config)?;
        presenter.ensure_swapchain(&context)?;

        Ok(Self {
            presenter,
            context,
            state,
            _toplevel: toplevel,
            _xdg_surface: xdg_surface,
            _surface: surface,
            queue,
            conn,
        })
    }

    /// Dispatch queued events and whatever is readable, without blocking
    fn pump_events(&mut self) -> BackendResult<()> {
        self.queue.dispatch_pending(&mut self.state).map_err(protocol_error)?;

        match self.conn.flush() {
            Ok(()) => {}
            Err(WaylandError::Io(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(protocol_error(e)),
        }

        if let Some(guard) = self.queue.prepare_read() {
            let mut pollfd = libc::pollfd {
                fd: guard.connection_fd().as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            let readable = unsafe { libc::poll(&mut pollfd, 1, 0) } > 0;
            if readable {
                match guard.read() {
                    Ok(_) => {}
                    Err(WaylandError::Io(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(protocol_error(e)),
                }
            }
        }

        self.queue.dispatch_pending(&mut self.state).map_err(protocol_error)?;
        Ok(())
    }
}

fn require_wayland_presentation(context: &GpuContext, conn: &Connection) -> BackendResult<()> {
    let loader = WaylandSurface::new(context.entry(), context.instance());
    let display = conn.backend().display_ptr().cast::<vk::wl_display>();
    let supported = unsafe {
        loader.get_physical_device_wayland_presentation_support(
            context.physical_device(),
            context.queue_family(),
            &mut *display,
        )
    };

    if supported {
        Ok(())
    } else {
        Err(BackendError::SurfaceUnsupported(
            "Vulkan not supported on given Wayland surface".to_string(),
        ))
    }
}

impl FrameCycle for WaylandBackend {
    fn acquire(&mut self) -> BackendResult<AcquireResult> {
        self.pump_events()?;
        if self.state.quit {
            return Ok(AcquireResult::Quit);
        }
        self.presenter.acquire(&self.context, ACQUIRE_TIMEOUT)
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
