//! Codec adapter
//!
//! Wraps the decoding and encoding crates behind a small trait so the
//! pipeline never talks to a specific codec library directly:
//! - `image` for decoding every supported source format and for JPEG/PNG output
//! - `webp` (libwebp) for lossy WebP output
//! - `ravif` for AVIF output

use image::io::Reader as ImageReader;
use rgb::FromSlice;
use std::io::Cursor;

use super::format::OutputFormat;
use crate::error::GatewayError;

/// Decoded RGBA8 pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA, 4 bytes per pixel
    pub pixels: Vec<u8>,
}

impl Raster {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, GatewayError> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(GatewayError::decode_failed(format!(
                "pixel buffer holds {} bytes, expected {} for {}x{}",
                pixels.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }
}

/// Decode and encode images.
///
/// Implementations are called from the blocking thread pool and must be
/// safe to share between workers.
pub trait Codec: Send + Sync {
    /// Read dimensions from the header without decoding pixels
    fn dimensions(&self, data: &[u8]) -> Result<(u32, u32), GatewayError>;

    fn decode(&self, data: &[u8]) -> Result<Raster, GatewayError>;

    fn encode(
        &self,
        raster: &Raster,
        format: OutputFormat,
        quality: u8,
    ) -> Result<Vec<u8>, GatewayError>;
}

/// Default codec backed by `image`, `webp` and `ravif`
#[derive(Debug, Clone)]
pub struct StandardCodec {
    /// AVIF encoder speed (1 = slowest/best, 10 = fastest)
    avif_speed: u8,
}

impl StandardCodec {
    pub fn new(avif_speed: u8) -> Self {
        Self {
            avif_speed: avif_speed.clamp(1, 10),
        }
    }

    fn reader(data: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, GatewayError> {
        ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| GatewayError::decode_failed(format!("Failed to read image: {}", e)))
    }

    fn encode_jpeg(raster: &Raster, quality: u8) -> Result<Vec<u8>, GatewayError> {
        use image::codecs::jpeg::JpegEncoder;
        use image::ImageEncoder as _;

        let rgb = flatten_onto_white(&raster.pixels);
        let mut output = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut output, quality)
            .write_image(&rgb, raster.width, raster.height, image::ColorType::Rgb8)
            .map_err(|e| GatewayError::encode_failed("jpeg", e.to_string()))?;
        Ok(output.into_inner())
    }

    fn encode_png(raster: &Raster) -> Result<Vec<u8>, GatewayError> {
        use image::codecs::png::PngEncoder;
        use image::ImageEncoder as _;

        let mut output = Cursor::new(Vec::new());
        PngEncoder::new(&mut output)
            .write_image(
                &raster.pixels,
                raster.width,
                raster.height,
                image::ColorType::Rgba8,
            )
            .map_err(|e| GatewayError::encode_failed("png", e.to_string()))?;
        Ok(output.into_inner())
    }

    fn encode_webp(raster: &Raster, quality: u8) -> Result<Vec<u8>, GatewayError> {
        let encoder = webp::Encoder::from_rgba(&raster.pixels, raster.width, raster.height);
        let memory = encoder
            .encode_simple(false, quality as f32)
            .map_err(|e| GatewayError::encode_failed("webp", format!("{:?}", e)))?;
        Ok(memory.to_vec())
    }

    fn encode_avif(&self, raster: &Raster, quality: u8) -> Result<Vec<u8>, GatewayError> {
        let img = imgref::Img::new(
            raster.pixels.as_rgba(),
            raster.width as usize,
            raster.height as usize,
        );
        let encoded = ravif::Encoder::new()
            .with_quality(quality as f32)
            .with_alpha_quality(quality as f32)
            .with_speed(self.avif_speed)
            .encode_rgba(img)
            .map_err(|e| GatewayError::encode_failed("avif", e.to_string()))?;
        Ok(encoded.avif_file)
    }
}

impl Codec for StandardCodec {
    fn dimensions(&self, data: &[u8]) -> Result<(u32, u32), GatewayError> {
        Self::reader(data)?
            .into_dimensions()
            .map_err(|e| GatewayError::decode_failed(e.to_string()))
    }

    fn decode(&self, data: &[u8]) -> Result<Raster, GatewayError> {
        let img = Self::reader(data)?
            .decode()
            .map_err(|e| GatewayError::decode_failed(e.to_string()))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Raster::new(width, height, rgba.into_raw())
    }

    fn encode(
        &self,
        raster: &Raster,
        format: OutputFormat,
        quality: u8,
    ) -> Result<Vec<u8>, GatewayError> {
        match format {
            OutputFormat::Jpeg => Self::encode_jpeg(raster, quality),
            OutputFormat::Png => Self::encode_png(raster),
            OutputFormat::WebP => Self::encode_webp(raster, quality),
            OutputFormat::Avif => self.encode_avif(raster, quality),
        }
    }
}

/// Composite RGBA over a white background and drop alpha (JPEG has none)
fn flatten_onto_white(rgba: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(rgba.len() / 4 * 3);
    for px in rgba.chunks_exact(4) {
        let alpha = px[3] as u32;
        for &channel in &px[..3] {
            let blended = (channel as u32 * alpha + 255 * (255 - alpha) + 127) / 255;
            rgb.push(blended as u8);
        }
    }
    rgb
}
