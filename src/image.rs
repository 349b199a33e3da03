//! Conversions from raw device samples into frame buffers.

use crate::backend::RawImage;
use crate::frame::{DepthBuffer, RgbaBuffer};
use crate::types::{CameraModel, PixelFormat};
use crate::{BridgeError, Result};

/// Longest usable depth of front-facing and short-range cameras, in mm.
pub const NEAR_RANGE_MAX_DEPTH_MM: f32 = 1000.0;
/// Longest usable depth of world-facing cameras, in mm.
pub const FAR_RANGE_MAX_DEPTH_MM: f32 = 3000.0;

fn check_sample(img: &RawImage<'_>, width: u32, height: u32) -> Result<()> {
    if img.width != width || img.height != height {
        return Err(BridgeError::SampleMismatch {
            expected_width: width,
            expected_height: height,
            actual_width: img.width,
            actual_height: img.height,
        });
    }
    if img.data.len() < img.required_len() {
        return Err(BridgeError::Acquire(format!(
            "sample holds {} bytes, {} needed",
            img.data.len(),
            img.required_len()
        )));
    }
    Ok(())
}

/// Copy an RGB24 or RGBA8 sample into an RGBA8 buffer of the same size.
/// RGB input gets an opaque alpha channel.
pub fn copy_color_sample(img: &RawImage<'_>, out: &mut RgbaBuffer) -> Result<()> {
    check_sample(img, out.width(), out.height())?;
    let width = img.width as usize;
    if width == 0 {
        return Ok(());
    }
    let dst = out.as_mut_slice();

    match img.format {
        PixelFormat::Rgb24 => {
            for (y, dst_row) in dst.chunks_exact_mut(width * 4).enumerate() {
                let src_row = &img.data[y * img.pitch..y * img.pitch + width * 3];
                for (d, s) in dst_row.chunks_exact_mut(4).zip(src_row.chunks_exact(3)) {
                    d[..3].copy_from_slice(s);
                    d[3] = 0xFF;
                }
            }
        }
        PixelFormat::Rgba8 => {
            for (y, dst_row) in dst.chunks_exact_mut(width * 4).enumerate() {
                dst_row.copy_from_slice(&img.data[y * img.pitch..y * img.pitch + width * 4]);
            }
        }
        PixelFormat::Depth16 => {
            return Err(BridgeError::Acquire("depth sample passed as color".into()));
        }
    }
    Ok(())
}

/// Copy a 16-bit little-endian depth sample into a depth buffer.
pub fn copy_depth_sample(img: &RawImage<'_>, out: &mut DepthBuffer) -> Result<()> {
    if img.format != PixelFormat::Depth16 {
        return Err(BridgeError::Acquire(format!(
            "expected depth sample, got {:?}",
            img.format
        )));
    }
    check_sample(img, out.width(), out.height())?;
    let width = img.width as usize;
    if width == 0 {
        return Ok(());
    }

    for (y, dst_row) in out.as_mut_slice().chunks_exact_mut(width).enumerate() {
        let src_row = &img.data[y * img.pitch..y * img.pitch + width * 2];
        for (d, s) in dst_row.iter_mut().zip(src_row.chunks_exact(2)) {
            *d = u16::from_le_bytes([s[0], s[1]]);
        }
    }
    Ok(())
}

/// Maximum meaningful depth for a camera, in mm.
///
/// Unknown models fall back on the depth stream width: 640 wide streams come
/// from near-range cameras.
pub fn max_depth_mm(model: CameraModel, depth_width: u32) -> f32 {
    match model {
        CameraModel::F200 | CameraModel::SR300 => NEAR_RANGE_MAX_DEPTH_MM,
        CameraModel::R200 => FAR_RANGE_MAX_DEPTH_MM,
        CameraModel::None | CameraModel::Other => {
            if depth_width == 640 {
                NEAR_RANGE_MAX_DEPTH_MM
            } else {
                FAR_RANGE_MAX_DEPTH_MM
            }
        }
    }
}

/// Map a depth value to an 8-bit intensity: near is bright, far is dark.
/// Zero (no data) and anything at or beyond `max_depth` map to black.
pub fn depth_to_intensity(depth: u16, max_depth: f32) -> u8 {
    let depth = depth as f32;
    if depth == 0.0 || depth >= max_depth {
        return 0;
    }
    (255.0 * ((max_depth - depth) / max_depth)) as u8
}

/// Render a depth buffer as grey RGBA8 pixels.
pub fn depth_to_rgba(depth: &[u16], max_depth: f32, out: &mut Vec<u8>) {
    out.clear();
    out.reserve(depth.len() * 4);
    for &d in depth {
        let i = depth_to_intensity(d, max_depth);
        out.extend_from_slice(&[i, i, i, 0xFF]);
    }
}

/// FNV-1a over a byte slice. Cheap content fingerprint for frame checks.
pub fn checksum(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_rows_respect_pitch() {
        // 2x2 RGB with two bytes of row padding.
        let data = [
            1, 2, 3, 4, 5, 6, 0xAA, 0xAA, //
            7, 8, 9, 10, 11, 12, 0xAA, 0xAA,
        ];
        let img = RawImage {
            width: 2,
            height: 2,
            pitch: 8,
            format: PixelFormat::Rgb24,
            data: &data,
        };
        let mut out = RgbaBuffer::new(2, 2);
        copy_color_sample(&img, &mut out).unwrap();
        assert_eq!(
            out.as_slice(),
            &[1, 2, 3, 255, 4, 5, 6, 255, 7, 8, 9, 255, 10, 11, 12, 255]
        );
    }

    #[test]
    fn color_size_mismatch_is_rejected() {
        let data = [0u8; 12];
        let img = RawImage {
            width: 2,
            height: 2,
            pitch: 6,
            format: PixelFormat::Rgb24,
            data: &data,
        };
        let mut out = RgbaBuffer::new(4, 4);
        assert!(matches!(
            copy_color_sample(&img, &mut out),
            Err(BridgeError::SampleMismatch { .. })
        ));
    }

    #[test]
    fn depth_is_little_endian() {
        let data = [0x34, 0x12, 0xE8, 0x03];
        let img = RawImage {
            width: 2,
            height: 1,
            pitch: 4,
            format: PixelFormat::Depth16,
            data: &data,
        };
        let mut out = DepthBuffer::new(2, 1);
        copy_depth_sample(&img, &mut out).unwrap();
        assert_eq!(out.as_slice(), &[0x1234, 1000]);
    }

    #[test]
    fn depth_intensity_edges() {
        let max = max_depth_mm(CameraModel::F200, 640);
        assert_eq!(depth_to_intensity(0, max), 0);
        assert_eq!(depth_to_intensity(1000, max), 0);
        assert_eq!(depth_to_intensity(4000, max), 0);
        assert_eq!(depth_to_intensity(1, max), 254);
    }

    #[test]
    fn depth_intensity_decreases_with_distance() {
        let max = max_depth_mm(CameraModel::R200, 628);
        assert_eq!(max, FAR_RANGE_MAX_DEPTH_MM);
        let mut last = u8::MAX;
        for d in (1..3000u16).step_by(7) {
            let i = depth_to_intensity(d, max);
            assert!(i <= last, "intensity rose at {d}mm");
            last = i;
        }
    }

    #[test]
    fn unknown_models_use_width_heuristic() {
        assert_eq!(max_depth_mm(CameraModel::Other, 640), NEAR_RANGE_MAX_DEPTH_MM);
        assert_eq!(max_depth_mm(CameraModel::None, 480), FAR_RANGE_MAX_DEPTH_MM);
    }

    #[test]
    fn depth_rgba_is_grey_and_opaque() {
        let mut out = Vec::new();
        depth_to_rgba(&[0, 500], 1000.0, &mut out);
        assert_eq!(out, vec![0, 0, 0, 255, 127, 127, 127, 255]);
    }
}
