//! In-memory bitmap images.

use crate::error::CodecError;

/// Largest accepted width or height in pixels.
pub const MAX_DIMENSION: u16 = 32767;

/// A width × height × depth array of 8-bit samples.
///
/// Samples are stored scanline-major with row 0 at the top and channels
/// interleaved, so a 24-bit image is laid out `R G B  R G B …` left to
/// right, top to bottom. `depth` is bytes per pixel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u16,
    pub height: u16,
    pub depth: u8,
    pub pixels: Vec<u8>,
}

impl Default for Bitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl Bitmap {
    /// Create an empty 0×0 bitmap with depth 3.
    #[must_use]
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            depth: 3,
            pixels: Vec::new(),
        }
    }

    /// Create a zero-filled bitmap of the given size.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidInput`] if a dimension is outside
    /// `1..=32767` or depth is zero.
    pub fn with_size(width: u16, height: u16, depth: u8) -> Result<Self, CodecError> {
        let mut bitmap = Self::new();
        bitmap.resize(width, height, depth)?;
        Ok(bitmap)
    }

    /// Resize the image, reallocating and zero-filling the pixel data.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidInput`] if a dimension is outside
    /// `1..=32767` or depth is zero.
    pub fn resize(&mut self, width: u16, height: u16, depth: u8) -> Result<(), CodecError> {
        if width < 1 || width > MAX_DIMENSION || height < 1 || height > MAX_DIMENSION {
            return Err(CodecError::InvalidInput(format!(
                "image size must be within 1..={MAX_DIMENSION}, got {width} x {height}"
            )));
        }
        if depth == 0 {
            return Err(CodecError::InvalidInput("image depth must be nonzero".into()));
        }
        self.width = width;
        self.height = height;
        self.depth = depth;
        self.pixels.clear();
        self.pixels
            .resize(width as usize * height as usize * depth as usize, 0);
        Ok(())
    }

    /// Length of the pixel buffer in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }

    /// Bytes per scanline.
    #[must_use]
    pub fn scanline(&self) -> usize {
        self.width as usize * self.depth as usize
    }

    /// Copy `src` into this bitmap, padding the right and bottom margins
    /// with zeros. This bitmap keeps its own (padded) dimensions; `src`
    /// must not be larger in either dimension and must have the same depth.
    pub fn copy_padded_from(&mut self, src: &Bitmap) {
        debug_assert_eq!(self.depth, src.depth);
        debug_assert!(src.width <= self.width && src.height <= self.height);

        if self.width == src.width && self.height == src.height {
            self.pixels.copy_from_slice(&src.pixels);
            return;
        }

        let src_scan = src.scanline();
        let dst_scan = self.scanline();
        for y in 0..src.height as usize {
            let s = y * src_scan;
            let d = y * dst_scan;
            self.pixels[d..d + src_scan].copy_from_slice(&src.pixels[s..s + src_scan]);
            self.pixels[d + src_scan..d + dst_scan].fill(0);
        }
        self.pixels[src.height as usize * dst_scan..].fill(0);
    }
}
