//! anip: a lossy video codec for hand-drawn animation
//!
//! Cel animation is mostly flat colour, thin lines, and slow change between
//! frames. This codec leans on all three: every frame is reduced to a
//! 256-colour palette, change is tracked in 8×8 blocks against a rolling
//! reference frame, and each changed 16×16 macroblock is re-quantized to a
//! 16-colour sub-palette and run-length coded as nibbles.
//!
//! # Architecture
//!
//! ```text
//! Encode: RGB frames -> change map -> frame palette (median cut)
//!         -> per-macroblock sub-palette -> nibble RLE -> AP container
//! Decode: AP container -> nibble RLE -> sub-palette -> frame palette
//!         -> paint changed blocks onto the rolling frame buffer
//! ```
//!
//! The container ("AP" stream, magic `ANIP`) stores one record per frame and
//! a keyframe index chained by byte offsets that is back-patched when the
//! encoder closes the file.
//!
//! # Example
//!
//! ```no_run
//! use anip::{ApEncoder, Bitmap};
//!
//! let mut encoder = ApEncoder::new();
//! encoder.set_file("out.ap")?;
//! encoder.set_options(25.0, 7)?;
//!
//! let frame = Bitmap::with_size(320, 240, 3)?;
//! encoder.put_image(&frame)?;
//! encoder.close()?;
//! # Ok::<(), anip::CodecError>(())
//! ```

pub mod bitmap;
pub mod bmp;
pub mod change;
pub mod container;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod median_cut;
pub mod rle;

// Re-exports
pub use bitmap::Bitmap;
pub use decoder::ApDecoder;
pub use encoder::ApEncoder;
pub use error::CodecError;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Width of a block in pixels. Change between frames is detected and
/// painted at this granularity.
pub const BLOCK_WIDTH: usize = 8;

/// Width of a macroblock in pixels. Sub-palettes and RLE payloads are
/// emitted at this granularity; a macroblock is 2×2 blocks.
pub const MACROBLOCK_WIDTH: usize = BLOCK_WIDTH * 2;

/// Pixels in one macroblock.
pub const MACROBLOCK_AREA: usize = MACROBLOCK_WIDTH * MACROBLOCK_WIDTH;

/// Colours in a frame palette.
pub const FRAME_PALETTE_COLORS: usize = 256;

/// Bytes of one serialized frame palette (256 × RGB).
pub const FRAME_PALETTE_BYTES: usize = FRAME_PALETTE_COLORS * 3;

/// Colours in a macroblock sub-palette.
pub const SUB_PALETTE_COLORS: usize = 16;

/// Block and macroblock layout derived from the logical frame size.
///
/// The encoder pads frames up to the next multiple of [`MACROBLOCK_WIDTH`]
/// in both dimensions; `width`/`height` keep the logical size while the
/// padded size is what both codec halves actually operate on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameLayout {
    /// Logical frame width in pixels.
    pub width: u16,
    /// Logical frame height in pixels.
    pub height: u16,
    /// Width of the padded frame in blocks.
    pub blocks_w: usize,
    /// Height of the padded frame in blocks.
    pub blocks_h: usize,
    /// Width of the padded frame in macroblocks.
    pub mbs_w: usize,
    /// Height of the padded frame in macroblocks.
    pub mbs_h: usize,
}

impl FrameLayout {
    #[must_use]
    pub fn new(width: u16, height: u16) -> Self {
        let w = width as usize;
        let h = height as usize;
        Self {
            width,
            height,
            blocks_w: w.div_ceil(BLOCK_WIDTH),
            blocks_h: h.div_ceil(BLOCK_WIDTH),
            mbs_w: w.div_ceil(MACROBLOCK_WIDTH),
            mbs_h: h.div_ceil(MACROBLOCK_WIDTH),
        }
    }

    /// Padded width in pixels (a multiple of [`MACROBLOCK_WIDTH`]).
    #[must_use]
    pub fn padded_width(&self) -> usize {
        self.mbs_w * MACROBLOCK_WIDTH
    }

    /// Padded height in pixels (a multiple of [`MACROBLOCK_WIDTH`]).
    #[must_use]
    pub fn padded_height(&self) -> usize {
        self.mbs_h * MACROBLOCK_WIDTH
    }

    /// Total number of blocks in the padded frame.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks_w * self.blocks_h
    }

    /// Bytes of the packed changed-block bitmap in a delta frame record.
    #[must_use]
    pub fn change_map_bytes(&self) -> usize {
        self.block_count().div_ceil(8)
    }

    /// True if any of the four blocks of macroblock (`mb_x`, `mb_y`) is
    /// marked changed in `changed`.
    #[must_use]
    pub fn macroblock_has_changes(&self, changed: &[u8], mb_x: usize, mb_y: usize) -> bool {
        let bx = mb_x * 2;
        let by = mb_y * 2;
        for dy in 0..2 {
            for dx in 0..2 {
                if changed[(by + dy) * self.blocks_w + bx + dx] == 1 {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_exact_multiple() {
        let l = FrameLayout::new(32, 16);
        assert_eq!(l.blocks_w, 4);
        assert_eq!(l.blocks_h, 2);
        assert_eq!(l.mbs_w, 2);
        assert_eq!(l.mbs_h, 1);
        assert_eq!(l.padded_width(), 32);
        assert_eq!(l.padded_height(), 16);
        assert_eq!(l.change_map_bytes(), 1);
    }

    #[test]
    fn layout_rounds_up() {
        let l = FrameLayout::new(33, 17);
        assert_eq!(l.blocks_w, 5);
        assert_eq!(l.blocks_h, 3);
        assert_eq!(l.mbs_w, 3);
        assert_eq!(l.mbs_h, 2);
        assert_eq!(l.padded_width(), 48);
        assert_eq!(l.padded_height(), 32);
        assert_eq!(l.change_map_bytes(), 2);
    }

    #[test]
    fn macroblock_change_lookup() {
        let l = FrameLayout::new(32, 32);
        let mut changed = vec![0u8; l.block_count()];
        assert!(!l.macroblock_has_changes(&changed, 1, 1));
        // Bottom-right block of macroblock (1, 1)
        changed[3 * l.blocks_w + 3] = 1;
        assert!(l.macroblock_has_changes(&changed, 1, 1));
        assert!(!l.macroblock_has_changes(&changed, 0, 1));
    }
}
