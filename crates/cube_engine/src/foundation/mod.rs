//! Foundation module - Core utilities and types
//!
//! - Matrix kit for the cube transforms
//! - Animation clock
//! - Logging utilities

pub mod math;
pub mod time;
pub mod logging;
