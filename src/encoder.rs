//! The AP frame encoder.
//!
//! Call order for one file: [`set_file`], [`set_options`], then
//! [`put_image`] once per frame in display order, and finally [`close`].
//! The first image fixes the frame size, creates the output file and writes
//! the placeholder header; `close` back-patches the header counts and the
//! keyframe chain.
//!
//! [`set_file`]: ApEncoder::set_file
//! [`set_options`]: ApEncoder::set_options
//! [`put_image`]: ApEncoder::put_image
//! [`close`]: ApEncoder::close

use std::path::{Path, PathBuf};

use crate::bitmap::{Bitmap, MAX_DIMENSION};
use crate::change::{find_block_changes, paint_changed_blocks};
use crate::container::ContainerWriter;
use crate::error::CodecError;
use crate::median_cut::{distance_sq, nearest_index, HistogramQuantizer, ListQuantizer};
use crate::rle::PixelRle;
use crate::{
    FrameLayout, BLOCK_WIDTH, FRAME_PALETTE_BYTES, MACROBLOCK_AREA, MACROBLOCK_WIDTH,
    SUB_PALETTE_COLORS,
};

/// Longest stretch without a keyframe, in seconds.
pub const MAX_KEYFRAME_INTERVAL: f32 = 10.0;

/// Shortest stretch after which heavy change may force a keyframe, in
/// seconds.
pub const MIN_KEYFRAME_INTERVAL: f32 = 2.0;

/// Changed-block ratio at which a frame is promoted to a keyframe.
pub const MIN_CHANGE_FOR_KEYFRAME: f32 = 0.8;

/// Minimum colour distance at which a block counts as changed.
pub const BLOCK_CHANGE_THRESHOLD: i32 = 8;

/// Histogram depth for the frame palette unless overridden via
/// [`ApEncoder::set_options`].
pub const DEFAULT_MEDIAN_CUT_DEPTH: u32 = 7;

/// Video frame encoder.
///
/// Owns the output file handle and every scratch buffer for the lifetime of
/// an encode session; nothing is allocated per frame.
pub struct ApEncoder {
    path: Option<PathBuf>,
    fps: f32,
    median_cut_depth: u32,
    session: Option<Session>,
}

impl Default for ApEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ApEncoder {
    /// Create an encoder with default options (25 fps, depth-7 palette
    /// histogram) and no output file bound.
    #[must_use]
    pub fn new() -> Self {
        Self {
            path: None,
            fps: 25.0,
            median_cut_depth: DEFAULT_MEDIAN_CUT_DEPTH,
            session: None,
        }
    }

    /// Bind the output path for the encoded video.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidInput`] if an encode is in progress.
    pub fn set_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), CodecError> {
        if self.session.is_some() {
            return Err(CodecError::InvalidInput(
                "cannot change the output file while encoding".into(),
            ));
        }
        self.path = Some(path.as_ref().to_path_buf());
        Ok(())
    }

    /// Set the playback rate and the palette histogram depth. The depth is
    /// clamped to `6..=8` bits per component.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidInput`] if an encode is in progress or
    /// `fps` is not positive.
    pub fn set_options(&mut self, fps: f32, median_cut_depth: u32) -> Result<(), CodecError> {
        if self.session.is_some() {
            return Err(CodecError::InvalidInput(
                "cannot change options while encoding".into(),
            ));
        }
        if fps <= 0.0 {
            return Err(CodecError::InvalidInput(format!(
                "frames per second must be positive, got {fps}"
            )));
        }
        self.fps = fps;
        self.median_cut_depth = median_cut_depth.clamp(6, 8);
        Ok(())
    }

    /// Encode the next frame. The first call fixes the frame size from the
    /// image, creates the output file and writes the placeholder header;
    /// later images must match that size exactly.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidInput`] for a wrong depth, a size
    /// mismatch, or when no output file is bound, and [`CodecError::Io`] on
    /// write failures.
    pub fn put_image(&mut self, image: &Bitmap) -> Result<(), CodecError> {
        if image.depth != 3 {
            return Err(CodecError::InvalidInput(format!(
                "image depth must be 3 bytes (24-bit), got {}",
                image.depth
            )));
        }

        if self.session.is_none() {
            if image.width < 1
                || image.width > MAX_DIMENSION
                || image.height < 1
                || image.height > MAX_DIMENSION
            {
                return Err(CodecError::InvalidInput(format!(
                    "invalid image size: {} x {}",
                    image.width, image.height
                )));
            }
            let path = self.path.clone().ok_or_else(|| {
                CodecError::InvalidInput("no output file set, call set_file first".into())
            })?;
            self.session = Some(Session::begin(
                &path,
                self.fps,
                self.median_cut_depth,
                image.width,
                image.height,
            )?);
        }

        let session = self.session.as_mut().expect("session exists");
        if image.width != session.layout.width || image.height != session.layout.height {
            return Err(CodecError::InvalidInput(format!(
                "image size is {} x {}, expected {} x {}",
                image.width, image.height, session.layout.width, session.layout.height
            )));
        }
        session.encode_frame(image)
    }

    /// Finalize the file: patch the frame and keyframe counts and the
    /// keyframe chain, then release the file handle.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidInput`] if no encode is in progress and
    /// [`CodecError::Io`] if patching fails.
    pub fn close(&mut self) -> Result<(), CodecError> {
        let session = self
            .session
            .take()
            .ok_or_else(|| CodecError::InvalidInput("no encode in progress".into()))?;
        session.writer.finish(session.frame_count)
    }
}

/// All state of one encode session.
struct Session {
    writer: ContainerWriter,
    layout: FrameLayout,
    fps: f32,
    frame_count: u32,
    last_keyframe_frame: u32,

    /// Rolling reconstruction of what the decoder holds, kept in lock-step
    /// by painting exactly the blocks a delta frame marks changed.
    reference: Bitmap,
    /// Current image padded to macroblock-divisible dimensions.
    padded: Bitmap,
    /// One byte per block, 1 = changed.
    changed: Vec<u8>,

    payload: Vec<u8>,
    frame_palette: [u8; FRAME_PALETTE_BYTES],
    mb_rgb: [u8; MACROBLOCK_AREA * 3],
    mb_indexed: [u8; MACROBLOCK_AREA],
    block_rgb: [u8; BLOCK_WIDTH * BLOCK_WIDTH * 3],
    sub_palette: [u8; SUB_PALETTE_COLORS],
    sub_palette_rgb: [u8; SUB_PALETTE_COLORS * 3],
    sub_palette_used: usize,
    /// Distinct frame-palette indices and their counts, first-seen order.
    tally: Vec<(u8, u16)>,

    quantizer: HistogramQuantizer,
    list_quantizer: ListQuantizer,
    rle: PixelRle,
}

impl Session {
    fn begin(
        path: &Path,
        fps: f32,
        median_cut_depth: u32,
        width: u16,
        height: u16,
    ) -> Result<Self, CodecError> {
        let layout = FrameLayout::new(width, height);
        let writer = ContainerWriter::create(path, fps, width, height)?;
        let padded_w = layout.padded_width() as u16;
        let padded_h = layout.padded_height() as u16;

        Ok(Self {
            writer,
            layout,
            fps,
            frame_count: 0,
            last_keyframe_frame: 0,
            reference: Bitmap::with_size(padded_w, padded_h, 3)?,
            padded: Bitmap::with_size(padded_w, padded_h, 3)?,
            changed: vec![0; layout.block_count()],
            // Palette-indexed pixels pack two per byte at worst, so half the
            // frame plus per-macroblock overhead always fits.
            payload: Vec::with_capacity(
                FRAME_PALETTE_BYTES + layout.padded_width() * layout.padded_height(),
            ),
            frame_palette: [0; FRAME_PALETTE_BYTES],
            mb_rgb: [0; MACROBLOCK_AREA * 3],
            mb_indexed: [0; MACROBLOCK_AREA],
            block_rgb: [0; BLOCK_WIDTH * BLOCK_WIDTH * 3],
            sub_palette: [0; SUB_PALETTE_COLORS],
            sub_palette_rgb: [0; SUB_PALETTE_COLORS * 3],
            sub_palette_used: 0,
            tally: Vec::with_capacity(MACROBLOCK_AREA),
            quantizer: HistogramQuantizer::new(median_cut_depth),
            list_quantizer: ListQuantizer::new(),
            rle: PixelRle::new(),
        })
    }

    fn encode_frame(&mut self, image: &Bitmap) -> Result<(), CodecError> {
        self.padded.copy_padded_from(image);

        // Keyframe policy: always after MAX_KEYFRAME_INTERVAL, early when
        // most of the frame moved and MIN_KEYFRAME_INTERVAL has passed.
        let time_since_key = (self.frame_count - self.last_keyframe_frame) as f32 / self.fps;
        let mut is_keyframe =
            self.writer.keyframe_count() == 0 || time_since_key >= MAX_KEYFRAME_INTERVAL;

        if !is_keyframe {
            let changed_count = find_block_changes(
                &self.reference,
                &self.padded,
                BLOCK_CHANGE_THRESHOLD,
                &self.layout,
                &mut self.changed,
            );
            let ratio = changed_count as f32 / self.layout.block_count() as f32;
            if ratio >= MIN_CHANGE_FOR_KEYFRAME && time_since_key >= MIN_KEYFRAME_INTERVAL {
                is_keyframe = true;
            }
        }

        if is_keyframe {
            self.changed.fill(1);
            self.last_keyframe_frame = self.frame_count;
            self.reference.pixels.copy_from_slice(&self.padded.pixels);
        } else {
            // Keeps the reference in lock-step with the decoder's buffer.
            paint_changed_blocks(&self.padded, &mut self.reference, &self.layout, &self.changed);
        }

        self.quantizer
            .create_palette(&self.padded, &mut self.frame_palette);

        self.payload.clear();
        self.payload.extend_from_slice(&self.frame_palette);
        if !is_keyframe {
            self.pack_change_map();
        }

        for mb_y in 0..self.layout.mbs_h {
            for mb_x in 0..self.layout.mbs_w {
                if self.layout.macroblock_has_changes(&self.changed, mb_x, mb_y) {
                    self.encode_macroblock(mb_x, mb_y);
                }
            }
        }

        if is_keyframe {
            self.writer.write_keyframe_record(&self.payload)?;
        } else {
            self.writer.write_delta_record(&self.payload)?;
        }
        self.frame_count += 1;
        Ok(())
    }

    /// Pack the changed-block map one bit per block, MSB first, final byte
    /// zero-padded in its low bits.
    fn pack_change_map(&mut self) {
        let mut value = 0u8;
        let mut shift = 7i32;
        for &block in &self.changed {
            value |= block << shift;
            shift -= 1;
            if shift == -1 {
                self.payload.push(value);
                value = 0;
                shift = 7;
            }
        }
        if shift != 7 {
            self.payload.push(value);
        }
    }

    fn encode_macroblock(&mut self, mb_x: usize, mb_y: usize) {
        let scanline = self.layout.padded_width() * 3;
        let mb_scanline = MACROBLOCK_WIDTH * 3;
        let top_left = (mb_y * MACROBLOCK_WIDTH) * scanline + mb_x * mb_scanline;

        for row in 0..MACROBLOCK_WIDTH {
            let src = top_left + row * scanline;
            let dst = row * mb_scanline;
            self.mb_rgb[dst..dst + mb_scanline]
                .copy_from_slice(&self.padded.pixels[src..src + mb_scanline]);
        }

        // Full-colour pixels to frame palette indices.
        for (i, px) in self.mb_rgb.chunks_exact(3).enumerate() {
            self.mb_indexed[i] = nearest_index(&self.frame_palette, px) as u8;
        }

        self.build_sub_palette(mb_x, mb_y);
        self.apply_sub_palette();
        self.zero_unchanged_blocks(mb_x, mb_y);

        self.payload.extend_from_slice(&self.sub_palette);
        self.rle.encode(&self.mb_indexed, &mut self.payload);
    }

    /// Choose at most 16 frame-palette indices for this macroblock,
    /// counting colours only in the blocks marked changed.
    fn build_sub_palette(&mut self, mb_x: usize, mb_y: usize) {
        self.tally.clear();
        for start in self.changed_quarters(mb_x, mb_y) {
            for y in 0..BLOCK_WIDTH {
                for x in 0..BLOCK_WIDTH {
                    let color = self.mb_indexed[start + y * MACROBLOCK_WIDTH + x];
                    match self.tally.iter_mut().find(|(c, _)| *c == color) {
                        Some((_, n)) => *n += 1,
                        None => self.tally.push((color, 1)),
                    }
                }
            }
        }

        if self.tally.len() > SUB_PALETTE_COLORS {
            self.build_sub_palette_median_cut(mb_x, mb_y);
            return;
        }

        // Few enough distinct colours: take them all, most used first,
        // ties keeping first-seen order. Unused slots stay zero.
        self.sub_palette.fill(0);
        self.sub_palette_rgb.fill(0);
        let used = self.tally.len();
        for slot in 0..used {
            let mut best = 0;
            let mut best_count = 0u16;
            for (j, &(_, count)) in self.tally.iter().enumerate() {
                if count > best_count {
                    best_count = count;
                    best = j;
                }
            }
            let index = self.tally[best].0;
            self.tally[best].1 = 0;
            self.sub_palette[slot] = index;
            let p = usize::from(index) * 3;
            self.sub_palette_rgb[slot * 3..slot * 3 + 3]
                .copy_from_slice(&self.frame_palette[p..p + 3]);
        }
        self.sub_palette_used = used;
    }

    /// Too many distinct colours: run the sparse median cut over the
    /// changed blocks and snap its centroids back onto the frame palette.
    fn build_sub_palette_median_cut(&mut self, mb_x: usize, mb_y: usize) {
        self.list_quantizer.clear();
        for start in self.changed_quarters(mb_x, mb_y) {
            let mut k = 0;
            for y in 0..BLOCK_WIDTH {
                for x in 0..BLOCK_WIDTH {
                    let p = usize::from(self.mb_indexed[start + y * MACROBLOCK_WIDTH + x]) * 3;
                    self.block_rgb[k..k + 3].copy_from_slice(&self.frame_palette[p..p + 3]);
                    k += 3;
                }
            }
            self.list_quantizer.add_samples(&self.block_rgb);
        }

        let mut centroids = [0u8; SUB_PALETTE_COLORS * 3];
        self.list_quantizer.create_palette(&mut centroids);

        for slot in 0..SUB_PALETTE_COLORS {
            let centroid = &centroids[slot * 3..slot * 3 + 3];
            let index = nearest_index(&self.frame_palette, centroid) as u8;
            self.sub_palette[slot] = index;
            let p = usize::from(index) * 3;
            self.sub_palette_rgb[slot * 3..slot * 3 + 3]
                .copy_from_slice(&self.frame_palette[p..p + 3]);
        }
        self.sub_palette_used = SUB_PALETTE_COLORS;
    }

    /// Rewrite every macroblock pixel from a frame-palette index to the
    /// nearest sub-palette slot (distances taken between the frame-palette
    /// colours both sides resolve to).
    fn apply_sub_palette(&mut self) {
        for pixel in self.mb_indexed.iter_mut() {
            let p = usize::from(*pixel) * 3;
            let rgb = &self.frame_palette[p..p + 3];
            let mut best = 0;
            let mut best_distance = i32::MAX;
            for slot in 0..self.sub_palette_used {
                let entry = &self.sub_palette_rgb[slot * 3..slot * 3 + 3];
                let d = distance_sq(entry, rgb);
                if d < best_distance {
                    best_distance = d;
                    best = slot;
                }
            }
            *pixel = best as u8;
        }
    }

    /// Zero the indices of blocks the change map leaves unpainted; long
    /// zero runs cost almost nothing after RLE.
    fn zero_unchanged_blocks(&mut self, mb_x: usize, mb_y: usize) {
        for by in 0..2 {
            for bx in 0..2 {
                let block = (mb_y * 2 + by) * self.layout.blocks_w + mb_x * 2 + bx;
                if self.changed[block] == 0 {
                    let start = by * BLOCK_WIDTH * MACROBLOCK_WIDTH + bx * BLOCK_WIDTH;
                    for y in 0..BLOCK_WIDTH {
                        let row = start + y * MACROBLOCK_WIDTH;
                        self.mb_indexed[row..row + BLOCK_WIDTH].fill(0);
                    }
                }
            }
        }
    }

    /// Offsets (within the macroblock) of the top-left pixel of every block
    /// the change map marks.
    fn changed_quarters(&self, mb_x: usize, mb_y: usize) -> Vec<usize> {
        let mut quarters = Vec::with_capacity(4);
        for by in 0..2 {
            for bx in 0..2 {
                let block = (mb_y * 2 + by) * self.layout.blocks_w + mb_x * 2 + bx;
                if self.changed[block] == 1 {
                    quarters.push(by * BLOCK_WIDTH * MACROBLOCK_WIDTH + bx * BLOCK_WIDTH);
                }
            }
        }
        quarters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_image_requires_a_file() {
        let mut encoder = ApEncoder::new();
        let image = Bitmap::with_size(16, 16, 3).unwrap();
        assert!(matches!(
            encoder.put_image(&image),
            Err(CodecError::InvalidInput(_))
        ));
    }

    #[test]
    fn options_are_validated() {
        let mut encoder = ApEncoder::new();
        assert!(encoder.set_options(25.0, 7).is_ok());
        assert!(matches!(
            encoder.set_options(0.0, 7),
            Err(CodecError::InvalidInput(_))
        ));
        assert!(matches!(
            encoder.set_options(-1.0, 7),
            Err(CodecError::InvalidInput(_))
        ));
        // Depth clamps silently.
        assert!(encoder.set_options(25.0, 99).is_ok());
    }

    #[test]
    fn frame_size_is_fixed_by_first_image() {
        let dir = tempdir().unwrap();
        let mut encoder = ApEncoder::new();
        encoder.set_file(dir.path().join("fixed.ap")).unwrap();
        encoder.set_options(25.0, 7).unwrap();

        encoder
            .put_image(&Bitmap::with_size(32, 32, 3).unwrap())
            .unwrap();
        let smaller = Bitmap::with_size(16, 16, 3).unwrap();
        assert!(matches!(
            encoder.put_image(&smaller),
            Err(CodecError::InvalidInput(_))
        ));
        encoder.close().unwrap();
    }

    #[test]
    fn wrong_depth_is_rejected() {
        let dir = tempdir().unwrap();
        let mut encoder = ApEncoder::new();
        encoder.set_file(dir.path().join("depth.ap")).unwrap();
        let grey = Bitmap::with_size(16, 16, 1).unwrap();
        assert!(matches!(
            encoder.put_image(&grey),
            Err(CodecError::InvalidInput(_))
        ));
    }

    #[test]
    fn options_locked_while_encoding() {
        let dir = tempdir().unwrap();
        let mut encoder = ApEncoder::new();
        encoder.set_file(dir.path().join("locked.ap")).unwrap();
        encoder
            .put_image(&Bitmap::with_size(16, 16, 3).unwrap())
            .unwrap();
        assert!(matches!(
            encoder.set_options(30.0, 7),
            Err(CodecError::InvalidInput(_))
        ));
        assert!(matches!(
            encoder.set_file(dir.path().join("other.ap")),
            Err(CodecError::InvalidInput(_))
        ));
        encoder.close().unwrap();
    }

    #[test]
    fn close_without_encoding_fails() {
        let mut encoder = ApEncoder::new();
        assert!(matches!(
            encoder.close(),
            Err(CodecError::InvalidInput(_))
        ));
    }
}
