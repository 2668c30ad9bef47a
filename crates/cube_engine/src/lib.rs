//! # Cube Engine
//!
//! Renders an animated, vertex-lit cube with Vulkan and shows it through one
//! of several presentation back-ends.
//!
//! ## Back-ends
//!
//! - **Wayland**: xdg-toplevel window with a swap chain
//! - **XCB**: X11 window with a swap chain
//! - **KMS**: GBM scan-out buffers flipped on the CRTC (feature `kms`)
//! - **KHR display**: direct-to-plane swap chain through `VK_KHR_display`
//! - **Headless**: one frame rendered to a linear image and written as PNG
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cube_engine::core::config::{CubeConfig, DisplayMode};
//! use cube_engine::driver;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = CubeConfig::default();
//!     config.display_mode = DisplayMode::Headless;
//!     let backend = driver::init_display(&config)?;
//!     driver::run(backend)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod foundation;
pub mod config;
pub mod core;
pub mod render;
pub mod backend;
pub mod driver;

/// Common imports for applications driving the cube
pub mod prelude {
    pub use crate::backend::{Backend, BackendError};
    pub use crate::core::config::{CubeConfig, DisplayMode, KhrSelection};
    pub use crate::driver::{init_display, run, DriverError};
    pub use crate::foundation::logging::{debug, error, info, trace, warn};
}
