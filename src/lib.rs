//! Ripple Glass Library
//!
//! Interactive heightfield water viewed through transmissive glass:
//! - Ping-pong compute grid with CPU and wgpu backends
//! - Damped wave propagation with pointer perturbation
//! - Multi-pass transmission compositor with optional back-face capture

pub mod compute;
pub mod config;
pub mod physics;
pub mod render;
pub mod export;

pub use config::SceneConfig;
