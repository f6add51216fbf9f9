//! Block-level change detection between frames.
//!
//! Two padded frames are compared 8×8 block by 8×8 block. A block is marked
//! changed as soon as any pixel pair differs by at least the threshold in
//! squared RGB distance, so flat regions fall out of the comparison after
//! the first pixel.

use crate::bitmap::Bitmap;
use crate::{FrameLayout, BLOCK_WIDTH};

/// Compare `image` against `reference` block by block, writing 0/1 into
/// `changed` (one byte per block, row-major) and returning how many blocks
/// changed.
///
/// Both bitmaps must be padded to the layout's dimensions; `threshold` is
/// the minimum colour distance (not squared) that makes a pixel count as
/// changed.
pub fn find_block_changes(
    reference: &Bitmap,
    image: &Bitmap,
    threshold: i32,
    layout: &FrameLayout,
    changed: &mut [u8],
) -> usize {
    debug_assert_eq!(reference.pixels.len(), image.pixels.len());
    debug_assert_eq!(changed.len(), layout.block_count());

    // Compare squared distances so no square roots are needed.
    let threshold_sq = threshold * threshold;
    let scanline = layout.padded_width() * 3;
    let mut changed_count = 0;

    for block_y in 0..layout.blocks_h {
        for block_x in 0..layout.blocks_w {
            let mut block_changes = false;
            let mut row_start = block_y * BLOCK_WIDTH * scanline + block_x * BLOCK_WIDTH * 3;
            'block: for _ in 0..BLOCK_WIDTH {
                let mut i = row_start;
                for _ in 0..BLOCK_WIDTH {
                    let dr = i32::from(image.pixels[i]) - i32::from(reference.pixels[i]);
                    let dg = i32::from(image.pixels[i + 1]) - i32::from(reference.pixels[i + 1]);
                    let db = i32::from(image.pixels[i + 2]) - i32::from(reference.pixels[i + 2]);
                    if dr * dr + dg * dg + db * db >= threshold_sq {
                        block_changes = true;
                        break 'block;
                    }
                    i += 3;
                }
                row_start += scanline;
            }

            let index = block_y * layout.blocks_w + block_x;
            if block_changes {
                changed[index] = 1;
                changed_count += 1;
            } else {
                changed[index] = 0;
            }
        }
    }
    changed_count
}

/// Copy every block marked changed from `src` into `dest`. Both bitmaps
/// must be padded to the layout's dimensions.
pub fn paint_changed_blocks(src: &Bitmap, dest: &mut Bitmap, layout: &FrameLayout, changed: &[u8]) {
    debug_assert_eq!(src.pixels.len(), dest.pixels.len());

    let scanline = layout.padded_width() * 3;
    let block_scanline = BLOCK_WIDTH * 3;
    let mut block_index = 0;

    for block_y in 0..layout.blocks_h {
        for block_x in 0..layout.blocks_w {
            if changed[block_index] == 1 {
                let mut row = block_y * BLOCK_WIDTH * scanline + block_x * block_scanline;
                for _ in 0..BLOCK_WIDTH {
                    dest.pixels[row..row + block_scanline]
                        .copy_from_slice(&src.pixels[row..row + block_scanline]);
                    row += scanline;
                }
            }
            block_index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames_16x16() -> (Bitmap, Bitmap, FrameLayout) {
        let layout = FrameLayout::new(16, 16);
        let a = Bitmap::with_size(16, 16, 3).unwrap();
        let b = Bitmap::with_size(16, 16, 3).unwrap();
        (a, b, layout)
    }

    #[test]
    fn identical_frames_have_no_changes() {
        let (a, b, layout) = frames_16x16();
        let mut changed = vec![0xAAu8; layout.block_count()];
        let n = find_block_changes(&a, &b, 8, &layout, &mut changed);
        assert_eq!(n, 0);
        assert!(changed.iter().all(|&c| c == 0));
    }

    #[test]
    fn difference_below_threshold_is_ignored() {
        let (a, mut b, layout) = frames_16x16();
        // d^2 = 3 * 16 = 48 < 64
        b.pixels[0] = 4;
        b.pixels[1] = 4;
        b.pixels[2] = 4;
        let mut changed = vec![0u8; layout.block_count()];
        assert_eq!(find_block_changes(&a, &b, 8, &layout, &mut changed), 0);
    }

    #[test]
    fn difference_at_threshold_marks_one_block() {
        let (a, mut b, layout) = frames_16x16();
        // d^2 = 3 * 36 = 108 >= 64
        let i = (9 * 16 + 9) * 3; // inside block (1, 1)
        b.pixels[i] = 6;
        b.pixels[i + 1] = 6;
        b.pixels[i + 2] = 6;
        let mut changed = vec![0u8; layout.block_count()];
        assert_eq!(find_block_changes(&a, &b, 8, &layout, &mut changed), 1);
        assert_eq!(changed[layout.blocks_w + 1], 1);
        assert_eq!(changed.iter().map(|&c| c as usize).sum::<usize>(), 1);
    }

    #[test]
    fn single_axis_threshold_is_exact() {
        let (a, mut b, layout) = frames_16x16();
        let mut changed = vec![0u8; layout.block_count()];
        b.pixels[0] = 7; // 49 < 64
        assert_eq!(find_block_changes(&a, &b, 8, &layout, &mut changed), 0);
        b.pixels[0] = 8; // 64 >= 64
        assert_eq!(find_block_changes(&a, &b, 8, &layout, &mut changed), 1);
        assert_eq!(changed[0], 1);
    }

    #[test]
    fn painting_copies_only_marked_blocks() {
        let (mut dest, mut src, layout) = frames_16x16();
        src.pixels.fill(42);
        dest.pixels.fill(1);
        let mut changed = vec![0u8; layout.block_count()];
        changed[0] = 1; // top-left block only
        paint_changed_blocks(&src, &mut dest, &layout, &changed);

        // Pixel inside block 0
        assert_eq!(dest.pixels[(3 * 16 + 3) * 3], 42);
        // Pixel inside block 1 untouched
        assert_eq!(dest.pixels[(3 * 16 + 12) * 3], 1);
    }
}
