//! Snapshot of the drawing surface.

use image::{DynamicImage, Rgba, RgbaImage};

use crate::service::RecognitionError;

/// Number of bytes of an RGBA pixel.
pub const CHANNELS: usize = 4;

/// An immutable RGBA snapshot of the drawing surface, row-major, 8 bits per channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCanvasFrame {
    image: RgbaImage,
}

impl RawCanvasFrame {
    /// Wraps a pixel buffer of `width * height` RGBA pixels.
    ///
    /// Fails with [`RecognitionError::InvalidInputShape`] when a side is zero
    /// or the buffer length does not match the dimensions.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, RecognitionError> {
        let (w, h) = (width as usize, height as usize);
        if w == 0 || h == 0 {
            return Err(RecognitionError::InvalidInputShape {
                expected: vec![h.max(1), w.max(1), CHANNELS],
                actual: vec![h, w, CHANNELS],
            });
        }
        if pixels.len() != w * h * CHANNELS {
            return Err(RecognitionError::InvalidInputShape {
                expected: vec![w * h * CHANNELS],
                actual: vec![pixels.len()],
            });
        }
        let image = RgbaImage::from_raw(width, height, pixels).ok_or_else(|| {
            RecognitionError::InvalidInputShape {
                expected: vec![w * h * CHANNELS],
                actual: vec![0],
            }
        })?;
        Ok(Self { image })
    }

    /// A frame of the given size filled with one color.
    pub fn filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, Rgba(color)),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// The RGBA value of the pixel at (`x`, `y`).
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.image.get_pixel(x, y).0
    }

    /// Returns true when every pixel has the same value, that is when nothing has been drawn.
    pub fn is_blank(&self) -> bool {
        let mut pixels = self.pixels().chunks_exact(CHANNELS);
        match pixels.next() {
            Some(first) => pixels.all(|p| p == first),
            None => true,
        }
    }
}

impl From<RgbaImage> for RawCanvasFrame {
    fn from(image: RgbaImage) -> Self {
        Self { image }
    }
}

impl From<&DynamicImage> for RawCanvasFrame {
    fn from(image: &DynamicImage) -> Self {
        Self {
            image: image.to_rgba8(),
        }
    }
}

impl From<DynamicImage> for RawCanvasFrame {
    fn from(image: DynamicImage) -> Self {
        Self {
            image: image.into_rgba8(),
        }
    }
}
