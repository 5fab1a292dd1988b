//! Image codec and resize primitives used by the transform pipeline

pub mod codec;
pub mod format;
pub mod resize;

pub use codec::{Codec, Raster, StandardCodec};
pub use format::{AcceptedFormats, OutputFormat};
pub use resize::{resize, target_dimensions};
