//! # Core Module
//!
//! Run-time configuration shared by the driver and every back-end.
//!
//! ## Organization
//!
//! - **Config**: `CubeConfig` and its parts, loaded through the generic
//!   [`Config`](crate::config::Config) trait

pub mod config;

pub use config::{Config, ConfigError, CubeConfig, DisplayMode, KhrSelection, ShaderConfig};
