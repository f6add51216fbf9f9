//! BMP file input and output.
//!
//! Reads and writes the exact subset the CLI exchanges with the outside
//! world: 24-bit uncompressed `BM` files with bottom-up scanlines padded to
//! a multiple of four bytes, BGR sample order, and a 2835 pixels-per-metre
//! (72 dpi) resolution field.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::bitmap::{Bitmap, MAX_DIMENSION};
use crate::error::CodecError;

const FILE_HEADER_BYTES: usize = 54;
const DIB_HEADER_BYTES: u32 = 40;
const RESOLUTION_PPM: u32 = 2835;

/// Read a 24-bit BMP file into `image`, reusing its pixel buffer.
///
/// # Errors
///
/// Returns [`CodecError::InvalidInput`] if the file is not an uncompressed
/// 24-bit BMP within the supported dimensions, and [`CodecError::Io`] on
/// read failures.
pub fn read_bmp<P: AsRef<Path>>(path: P, image: &mut Bitmap) -> Result<(), CodecError> {
    let file = File::open(path.as_ref())?;
    let mut stream = BufReader::new(file);

    let mut header = [0u8; FILE_HEADER_BYTES];
    read_fully(&mut stream, &mut header, "file is too short to be a BMP")?;

    if header[0] != 0x42 || header[1] != 0x4D {
        return Err(CodecError::InvalidInput("file is not a BMP".into()));
    }

    let width = i32::from_le_bytes([header[18], header[19], header[20], header[21]]);
    let height = i32::from_le_bytes([header[22], header[23], header[24], header[25]]);
    if width < 1 || width > i32::from(MAX_DIMENSION) || height < 1 || height > i32::from(MAX_DIMENSION)
    {
        return Err(CodecError::InvalidInput(format!(
            "image size must be within 1..={MAX_DIMENSION}, got {width} x {height}"
        )));
    }
    let planes = u16::from_le_bytes([header[26], header[27]]);
    if planes != 1 {
        return Err(CodecError::InvalidInput(format!(
            "BMP colour plane count must be 1, got {planes}"
        )));
    }
    let bpp = u16::from_le_bytes([header[28], header[29]]);
    if bpp != 24 {
        return Err(CodecError::InvalidInput(format!(
            "BMP bit depth must be 24, got {bpp}"
        )));
    }
    let compression = u32::from_le_bytes([header[30], header[31], header[32], header[33]]);
    if compression != 0 {
        return Err(CodecError::InvalidInput(format!(
            "BMP must be uncompressed, got compression method {compression}"
        )));
    }

    let width = width as u16;
    let height = height as u16;
    image.resize(width, height, 3)?;

    let row_bytes = width as usize * 3;
    let scanline_bytes = row_bytes.div_ceil(4) * 4;
    let mut scanline = vec![0u8; scanline_bytes];

    // Scanlines are stored bottom-up in BGR order.
    for y in (0..height as usize).rev() {
        read_fully(&mut stream, &mut scanline, "BMP pixel data is truncated")?;
        let row = &mut image.pixels[y * row_bytes..(y + 1) * row_bytes];
        for (dst, src) in row.chunks_exact_mut(3).zip(scanline.chunks_exact(3)) {
            dst[0] = src[2];
            dst[1] = src[1];
            dst[2] = src[0];
        }
    }
    Ok(())
}

/// Read exactly `buf.len()` bytes, reporting a short read as a malformed
/// file rather than a plain I/O failure.
fn read_fully<R: Read>(stream: &mut R, buf: &mut [u8], short: &str) -> Result<(), CodecError> {
    stream.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CodecError::InvalidInput(short.into())
        } else {
            CodecError::Io(e)
        }
    })
}

/// Write `image` as a 24-bit uncompressed BMP file.
///
/// # Errors
///
/// Returns [`CodecError::InvalidInput`] if the image is not 24-bit, and
/// [`CodecError::Io`] on write failures.
pub fn write_bmp<P: AsRef<Path>>(path: P, image: &Bitmap) -> Result<(), CodecError> {
    if image.depth != 3 {
        return Err(CodecError::InvalidInput(format!(
            "image depth must be 3 bytes (24-bit), got {}",
            image.depth
        )));
    }
    if image.width < 1 || image.height < 1 {
        return Err(CodecError::InvalidInput(format!(
            "image size must be positive, got {} x {}",
            image.width, image.height
        )));
    }

    let row_bytes = image.width as usize * 3;
    let scanline_bytes = row_bytes.div_ceil(4) * 4;
    let data_bytes = scanline_bytes * image.height as usize;

    let mut header = [0u8; FILE_HEADER_BYTES];
    header[0] = 0x42;
    header[1] = 0x4D;
    header[2..6].copy_from_slice(&((FILE_HEADER_BYTES + data_bytes) as u32).to_le_bytes());
    // 6..10 reserved
    header[10..14].copy_from_slice(&(FILE_HEADER_BYTES as u32).to_le_bytes());
    header[14..18].copy_from_slice(&DIB_HEADER_BYTES.to_le_bytes());
    header[18..22].copy_from_slice(&i32::from(image.width).to_le_bytes());
    header[22..26].copy_from_slice(&i32::from(image.height).to_le_bytes());
    header[26..28].copy_from_slice(&1u16.to_le_bytes());
    header[28..30].copy_from_slice(&24u16.to_le_bytes());
    // 30..34 compression = 0
    header[34..38].copy_from_slice(&(data_bytes as u32).to_le_bytes());
    header[38..42].copy_from_slice(&RESOLUTION_PPM.to_le_bytes());
    header[42..46].copy_from_slice(&RESOLUTION_PPM.to_le_bytes());
    // 46..54 palette colour counts = 0

    let file = File::create(path.as_ref())?;
    let mut stream = BufWriter::new(file);
    stream.write_all(&header)?;

    let mut scanline = vec![0u8; scanline_bytes];
    for y in (0..image.height as usize).rev() {
        let row = &image.pixels[y * row_bytes..(y + 1) * row_bytes];
        for (dst, src) in scanline.chunks_exact_mut(3).zip(row.chunks_exact(3)) {
            dst[0] = src[2];
            dst[1] = src[1];
            dst[2] = src[0];
        }
        stream.write_all(&scanline)?;
    }
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_preserves_pixels() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rt.bmp");

        let mut image = Bitmap::with_size(5, 3, 3).unwrap();
        for (i, px) in image.pixels.iter_mut().enumerate() {
            *px = (i * 17 % 256) as u8;
        }
        write_bmp(&path, &image).unwrap();

        let mut back = Bitmap::new();
        read_bmp(&path, &mut back).unwrap();
        assert_eq!(back, image);
    }

    #[test]
    fn odd_width_scanlines_are_padded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pad.bmp");
        let image = Bitmap::with_size(3, 2, 3).unwrap();
        write_bmp(&path, &image).unwrap();

        // 3 pixels = 9 bytes, padded to 12 per scanline.
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 54 + 2 * 12);

        let mut back = Bitmap::new();
        read_bmp(&path, &mut back).unwrap();
        assert_eq!(back, image);
    }

    #[test]
    fn header_fields_match_the_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hdr.bmp");
        let image = Bitmap::with_size(4, 4, 3).unwrap();
        write_bmp(&path, &image).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..2], b"BM");
        assert_eq!(u16::from_le_bytes([bytes[28], bytes[29]]), 24);
        assert_eq!(
            u32::from_le_bytes([bytes[38], bytes[39], bytes[40], bytes[41]]),
            2835
        );
    }

    #[test]
    fn rejects_non_bmp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("not.bmp");
        std::fs::write(&path, b"PNG........................................................")
            .unwrap();
        let mut image = Bitmap::new();
        assert!(matches!(
            read_bmp(&path, &mut image),
            Err(CodecError::InvalidInput(_))
        ));
    }

    #[test]
    fn rejects_wrong_depth_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("depth.bmp");
        let grey = Bitmap::with_size(4, 4, 1).unwrap();
        assert!(matches!(
            write_bmp(&path, &grey),
            Err(CodecError::InvalidInput(_))
        ));
    }
}
