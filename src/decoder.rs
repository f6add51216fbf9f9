//! The AP frame decoder.
//!
//! Frames decode strictly in stored order into a caller-owned rolling
//! buffer: a delta frame only paints the blocks its change map marks, so the
//! same buffer must be passed back for every frame of a session. The buffer
//! is padded to macroblock-divisible dimensions ([`buffer_width`] ×
//! [`buffer_height`]); display sinks should crop to the logical
//! [`frame_width`] × [`frame_height`].
//!
//! [`buffer_width`]: ApDecoder::buffer_width
//! [`buffer_height`]: ApDecoder::buffer_height
//! [`frame_width`]: ApDecoder::frame_width
//! [`frame_height`]: ApDecoder::frame_height

use std::path::Path;

use crate::bitmap::Bitmap;
use crate::container::ContainerReader;
use crate::error::CodecError;
use crate::rle::PixelRle;
use crate::{
    FrameLayout, BLOCK_WIDTH, FRAME_PALETTE_BYTES, MACROBLOCK_AREA, MACROBLOCK_WIDTH,
    SUB_PALETTE_COLORS,
};

/// Video frame decoder.
///
/// Owns the input file handle and all parsing scratch for the lifetime of a
/// session.
pub struct ApDecoder {
    reader: ContainerReader,
    layout: FrameLayout,
    next_frame: u32,
    payload: Vec<u8>,
    changed: Vec<u8>,
    frame_palette: [u8; FRAME_PALETTE_BYTES],
    sub_palette: [u8; SUB_PALETTE_COLORS],
    mb_indexed: [u8; MACROBLOCK_AREA],
    rle: PixelRle,
}

impl ApDecoder {
    /// Open an AP file and position at the first frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidContainer`] if the file is not a
    /// version-1 AP container, or [`CodecError::Io`] if it cannot be read.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CodecError> {
        let reader = ContainerReader::open(path.as_ref())?;
        let header = reader.header();
        let layout = FrameLayout::new(header.width, header.height);
        Ok(Self {
            reader,
            layout,
            next_frame: 0,
            payload: Vec::new(),
            changed: vec![0; layout.block_count()],
            frame_palette: [0; FRAME_PALETTE_BYTES],
            sub_palette: [0; SUB_PALETTE_COLORS],
            mb_indexed: [0; MACROBLOCK_AREA],
            rle: PixelRle::new(),
        })
    }

    /// Playback speed in frames per second.
    #[must_use]
    pub fn fps(&self) -> f32 {
        self.reader.header().fps
    }

    /// Total number of frames in the video.
    #[must_use]
    pub fn frame_count(&self) -> u32 {
        self.reader.header().frame_count
    }

    /// Logical frame width in pixels.
    #[must_use]
    pub fn frame_width(&self) -> u16 {
        self.layout.width
    }

    /// Logical frame height in pixels.
    #[must_use]
    pub fn frame_height(&self) -> u16 {
        self.layout.height
    }

    /// Width of the decode buffer in pixels.
    #[must_use]
    pub fn buffer_width(&self) -> usize {
        self.layout.padded_width()
    }

    /// Height of the decode buffer in pixels.
    #[must_use]
    pub fn buffer_height(&self) -> usize {
        self.layout.padded_height()
    }

    /// Number of the next frame [`get_frame`](Self::get_frame) would decode.
    #[must_use]
    pub fn next_frame(&self) -> u32 {
        self.next_frame
    }

    /// A zeroed bitmap sized for [`get_frame`](Self::get_frame).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidInput`] if the padded dimensions are
    /// somehow out of range (they never are for a valid container).
    pub fn create_frame_buffer(&self) -> Result<Bitmap, CodecError> {
        Bitmap::with_size(self.buffer_width() as u16, self.buffer_height() as u16, 3)
    }

    /// Length in elements of the packed-RGB buffer for
    /// [`get_frame_rgb`](Self::get_frame_rgb).
    #[must_use]
    pub fn rgb_buffer_len(&self) -> usize {
        self.buffer_width() * self.buffer_height()
    }

    /// Decode the next frame into `out`, painting only the blocks the frame
    /// marks changed. Returns `false` without touching `out` when every
    /// frame has been decoded.
    ///
    /// `out` must have the padded buffer dimensions and depth 3, and must be
    /// the same buffer across the calls of a session.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidInput`] for a wrong buffer shape,
    /// [`CodecError::InvalidContainer`] for a truncated file, and
    /// [`CodecError::CorruptPayload`] for an inconsistent frame payload.
    pub fn get_frame(&mut self, out: &mut Bitmap) -> Result<bool, CodecError> {
        if out.width as usize != self.buffer_width()
            || out.height as usize != self.buffer_height()
            || out.depth != 3
        {
            return Err(CodecError::InvalidInput(format!(
                "frame buffer is {} x {} x {}, expected {} x {} x 3",
                out.width,
                out.height,
                out.depth,
                self.buffer_width(),
                self.buffer_height()
            )));
        }
        if self.next_frame >= self.frame_count() {
            return Ok(false);
        }

        let keyframe = {
            let record = self.reader.read_record(&mut self.payload)?;
            record.keyframe
        };
        let mut pos = self.parse_prelude(keyframe)?;

        let scanline = self.buffer_width() * 3;
        for mb_y in 0..self.layout.mbs_h {
            for mb_x in 0..self.layout.mbs_w {
                if !self.layout.macroblock_has_changes(&self.changed, mb_x, mb_y) {
                    continue;
                }
                pos = self.read_macroblock(pos)?;

                for by in 0..2 {
                    for bx in 0..2 {
                        let block = (mb_y * 2 + by) * self.layout.blocks_w + mb_x * 2 + bx;
                        if self.changed[block] != 1 {
                            continue;
                        }
                        let start = by * BLOCK_WIDTH * MACROBLOCK_WIDTH + bx * BLOCK_WIDTH;
                        let mut row = ((mb_y * 2 + by) * BLOCK_WIDTH) * scanline
                            + (mb_x * 2 + bx) * BLOCK_WIDTH * 3;
                        for y in 0..BLOCK_WIDTH {
                            let mut d = row;
                            for x in 0..BLOCK_WIDTH {
                                let sub = self.mb_indexed[start + y * MACROBLOCK_WIDTH + x];
                                let p = usize::from(self.sub_palette[usize::from(sub)]) * 3;
                                out.pixels[d..d + 3]
                                    .copy_from_slice(&self.frame_palette[p..p + 3]);
                                d += 3;
                            }
                            row += scanline;
                        }
                    }
                }
            }
        }

        self.finish_frame(pos)
    }

    /// Decode the next frame into a packed-RGB buffer, one
    /// `(R << 16) | (G << 8) | B` element per pixel of the padded buffer.
    /// Behaves exactly like [`get_frame`](Self::get_frame) otherwise.
    ///
    /// # Errors
    ///
    /// As for [`get_frame`](Self::get_frame).
    pub fn get_frame_rgb(&mut self, out: &mut [u32]) -> Result<bool, CodecError> {
        if out.len() != self.rgb_buffer_len() {
            return Err(CodecError::InvalidInput(format!(
                "rgb buffer holds {} pixels, expected {}",
                out.len(),
                self.rgb_buffer_len()
            )));
        }
        if self.next_frame >= self.frame_count() {
            return Ok(false);
        }

        let keyframe = {
            let record = self.reader.read_record(&mut self.payload)?;
            record.keyframe
        };
        let mut pos = self.parse_prelude(keyframe)?;

        let scanline = self.buffer_width();
        for mb_y in 0..self.layout.mbs_h {
            for mb_x in 0..self.layout.mbs_w {
                if !self.layout.macroblock_has_changes(&self.changed, mb_x, mb_y) {
                    continue;
                }
                pos = self.read_macroblock(pos)?;

                // Pre-pack the sub-palette colours for the int surface.
                let mut packed = [0u32; SUB_PALETTE_COLORS];
                for (slot, &index) in self.sub_palette.iter().enumerate() {
                    let p = usize::from(index) * 3;
                    packed[slot] = (u32::from(self.frame_palette[p]) << 16)
                        | (u32::from(self.frame_palette[p + 1]) << 8)
                        | u32::from(self.frame_palette[p + 2]);
                }

                for by in 0..2 {
                    for bx in 0..2 {
                        let block = (mb_y * 2 + by) * self.layout.blocks_w + mb_x * 2 + bx;
                        if self.changed[block] != 1 {
                            continue;
                        }
                        let start = by * BLOCK_WIDTH * MACROBLOCK_WIDTH + bx * BLOCK_WIDTH;
                        let mut row = ((mb_y * 2 + by) * BLOCK_WIDTH) * scanline
                            + (mb_x * 2 + bx) * BLOCK_WIDTH;
                        for y in 0..BLOCK_WIDTH {
                            for x in 0..BLOCK_WIDTH {
                                let sub = self.mb_indexed[start + y * MACROBLOCK_WIDTH + x];
                                out[row + x] = packed[usize::from(sub)];
                            }
                            row += scanline;
                        }
                    }
                }
            }
        }

        self.finish_frame(pos)
    }

    /// Reposition so the next decoded frame is `frame`. Only frame 0 is
    /// supported; a complete implementation would walk the keyframe chain
    /// and replay deltas forward.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnsupportedOperation`] for any nonzero frame.
    pub fn seek(&mut self, frame: u32) -> Result<(), CodecError> {
        if frame != 0 {
            return Err(CodecError::UnsupportedOperation(format!(
                "seek supports only frame 0, got {frame}"
            )));
        }
        self.reader.rewind()?;
        self.next_frame = 0;
        Ok(())
    }

    /// Release the file handle.
    pub fn close(self) {}

    /// Parse the frame palette and changed-block map from the front of the
    /// payload; returns the position of the first macroblock.
    fn parse_prelude(&mut self, keyframe: bool) -> Result<usize, CodecError> {
        let palette = self
            .payload
            .get(0..FRAME_PALETTE_BYTES)
            .ok_or_else(|| CodecError::CorruptPayload("payload too short for frame palette".into()))?;
        self.frame_palette.copy_from_slice(palette);
        let mut pos = FRAME_PALETTE_BYTES;

        if keyframe {
            self.changed.fill(1);
        } else {
            let map_bytes = self.layout.change_map_bytes();
            let map = self.payload.get(pos..pos + map_bytes).ok_or_else(|| {
                CodecError::CorruptPayload("payload too short for change map".into())
            })?;
            for (i, block) in self.changed.iter_mut().enumerate() {
                *block = (map[i / 8] >> (7 - (i % 8))) & 1;
            }
            pos += map_bytes;
        }
        Ok(pos)
    }

    /// Read one macroblock's sub-palette and RLE block, leaving sub-palette
    /// indices in `mb_indexed`. Returns the new payload position.
    fn read_macroblock(&mut self, pos: usize) -> Result<usize, CodecError> {
        let palette = self
            .payload
            .get(pos..pos + SUB_PALETTE_COLORS)
            .ok_or_else(|| CodecError::CorruptPayload("payload too short for sub-palette".into()))?;
        self.sub_palette.copy_from_slice(palette);
        let pos = pos + SUB_PALETTE_COLORS;

        let consumed = self
            .rle
            .decode(&self.payload[pos..], &mut self.mb_indexed)?;
        Ok(pos + consumed)
    }

    /// Check the payload was consumed exactly and advance the frame counter.
    fn finish_frame(&mut self, pos: usize) -> Result<bool, CodecError> {
        if pos != self.payload.len() {
            return Err(CodecError::CorruptPayload(format!(
                "frame consumed {pos} of {} payload bytes",
                self.payload.len()
            )));
        }
        self.next_frame += 1;
        Ok(true)
    }
}
