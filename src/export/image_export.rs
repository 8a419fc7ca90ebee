//! Image export functionality

use std::path::{Path, PathBuf};

use crate::compute::{GridExtent, Texel};

/// Errors that can occur during export
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("data length {actual} doesn't match expected {expected}")]
    DataLength { expected: usize, actual: usize },

    #[error("failed to save {}: {source}", .path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

fn check_len(width: u32, height: u32, expected: usize, actual: usize) -> Result<(), ExportError> {
    if width == 0 || height == 0 {
        return Err(ExportError::InvalidDimensions { width, height });
    }
    if expected != actual {
        return Err(ExportError::DataLength { expected, actual });
    }
    Ok(())
}

/// Export raw RGBA pixel data to a PNG file
///
/// # Arguments
/// * `path` - Output file path
/// * `width` - Image width in pixels
/// * `height` - Image height in pixels
/// * `data` - RGBA u8 pixel data (length must be width * height * 4)
pub fn export_frame<P: AsRef<Path>>(
    path: P,
    width: u32,
    height: u32,
    data: &[u8],
) -> Result<(), ExportError> {
    let path = path.as_ref();
    check_len(width, height, width as usize * height as usize * 4, data.len())?;

    let image_buffer = image::RgbaImage::from_raw(width, height, data.to_vec()).ok_or(
        ExportError::DataLength {
            expected: width as usize * height as usize * 4,
            actual: data.len(),
        },
    )?;

    image_buffer.save(path).map_err(|source| ExportError::Save {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("Saved frame {}x{} to {}", width, height, path.display());
    Ok(())
}

/// Export the height channel of a grid as an 8-bit grayscale PNG.
///
/// Heights are mapped linearly from `[-range, range]` to `[0, 255]`; values
/// outside the range saturate.
///
/// # Arguments
/// * `path` - Output file path
/// * `extent` - Grid resolution
/// * `texels` - Grid contents, row-major
/// * `range` - Height that maps to white
pub fn export_heightmap<P: AsRef<Path>>(
    path: P,
    extent: GridExtent,
    texels: &[Texel],
    range: f32,
) -> Result<(), ExportError> {
    let path = path.as_ref();
    check_len(extent.width, extent.height, extent.texel_count(), texels.len())?;

    let range = if range > 0.0 { range } else { 1.0 };
    let pixels = texels
        .iter()
        .map(|t| (((t[0] / range) * 0.5 + 0.5).clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect::<Vec<_>>();

    let image_buffer = image::GrayImage::from_raw(extent.width, extent.height, pixels).ok_or(
        ExportError::DataLength {
            expected: extent.texel_count(),
            actual: texels.len(),
        },
    )?;
    image_buffer.save(path).map_err(|source| ExportError::Save {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_export_frame() {
        let red_pixel = [255u8, 0, 0, 255];
        let data: Vec<u8> = red_pixel.iter().cycle().take(16).copied().collect();

        let path = std::env::temp_dir().join("ripple_glass_test_export.png");
        export_frame(&path, 2, 2, &data).unwrap();

        let loaded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(loaded.get_pixel(1, 1).0, red_pixel);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_invalid_dimensions() {
        let result = export_frame("unused.png", 0, 100, &[]);
        assert!(matches!(result, Err(ExportError::InvalidDimensions { .. })));
    }

    #[test]
    fn test_wrong_data_length() {
        let result = export_frame("unused.png", 10, 10, &[0u8; 100]);
        assert!(matches!(
            result,
            Err(ExportError::DataLength {
                expected: 400,
                actual: 100
            })
        ));
    }

    #[test]
    fn test_export_heightmap_maps_zero_to_mid_gray() {
        let extent = GridExtent::new(2, 1);
        let texels = vec![[0.0, 0.0, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0]];
        let path = std::env::temp_dir().join("ripple_glass_test_heightmap.png");
        export_heightmap(&path, extent, &texels, 1.0).unwrap();

        let loaded = image::open(&path).unwrap().to_luma8();
        assert_eq!(loaded.get_pixel(0, 0).0, [128]);
        assert_eq!(loaded.get_pixel(1, 0).0, [255]);
        let _ = fs::remove_file(path);
    }
}
