//! Export modules
//!
//! - Image: PNG export of rendered frames and heightmaps

pub mod image_export;

pub use image_export::{export_frame, export_heightmap, ExportError};
