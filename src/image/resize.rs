//! Downscaling
//!
//! Uses an area-averaging (box filter) convolution from `fast_image_resize`.
//! Alpha is premultiplied around the resize so transparent pixels do not
//! bleed color into their neighbours.

use fast_image_resize::{FilterType, Image, MulDiv, PixelType, ResizeAlg, Resizer};
use std::num::NonZeroU32;

use super::codec::Raster;
use crate::error::GatewayError;

/// Compute output dimensions for a requested width.
///
/// Never upscales: a request wider than the source keeps the source size.
/// Aspect ratio is preserved and the height is at least 1 pixel.
pub fn target_dimensions(src_width: u32, src_height: u32, requested: Option<u32>) -> (u32, u32) {
    let Some(requested) = requested else {
        return (src_width, src_height);
    };
    if requested == 0 || requested >= src_width {
        return (src_width, src_height);
    }

    let height = (src_height as u64 * requested as u64 + src_width as u64 / 2) / src_width as u64;
    (requested, height.max(1) as u32)
}

/// Resize `raster` to exactly `width` x `height`
pub fn resize(raster: Raster, width: u32, height: u32) -> Result<Raster, GatewayError> {
    if raster.width == width && raster.height == height {
        return Ok(raster);
    }

    let resize_err = |msg: String| GatewayError::resize_failed(msg);

    let src_width =
        NonZeroU32::new(raster.width).ok_or_else(|| resize_err("source width is 0".into()))?;
    let src_height =
        NonZeroU32::new(raster.height).ok_or_else(|| resize_err("source height is 0".into()))?;
    let dst_width = NonZeroU32::new(width).ok_or_else(|| resize_err("target width is 0".into()))?;
    let dst_height =
        NonZeroU32::new(height).ok_or_else(|| resize_err("target height is 0".into()))?;

    let mut src_image = Image::from_vec_u8(src_width, src_height, raster.pixels, PixelType::U8x4)
        .map_err(|e| resize_err(format!("{:?}", e)))?;
    let mut dst_image = Image::new(dst_width, dst_height, PixelType::U8x4);

    let alpha = MulDiv::default();
    alpha
        .multiply_alpha_inplace(&mut src_image.view_mut())
        .map_err(|e| resize_err(format!("{:?}", e)))?;

    Resizer::new(ResizeAlg::Convolution(FilterType::Box))
        .resize(&src_image.view(), &mut dst_image.view_mut())
        .map_err(|e| resize_err(format!("{:?}", e)))?;

    alpha
        .divide_alpha_inplace(&mut dst_image.view_mut())
        .map_err(|e| resize_err(format!("{:?}", e)))?;

    Raster::new(width, height, dst_image.into_vec())
}
