//! CLI for the AP codec.
//!
//! ```bash
//! anip encode out.ap 25 frames/image0000.bmp
//! anip extract in.ap frames/image0000.bmp 0 100
//! anip info in.ap
//! ```
//!
//! Image sequences are named by a template whose run of zeros carries the
//! frame number: `image0000.bmp` names `image0000.bmp`, `image0001.bmp`, …

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};

use anip::{bmp, ApDecoder, ApEncoder, Bitmap};

#[derive(Parser)]
#[command(
    name = "anip",
    version,
    about = "AP video codec for hand-drawn animation"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a numbered BMP sequence into an .ap video
    #[command(alias = "c")]
    Encode {
        /// Output video file (.ap)
        output: PathBuf,
        /// Playback speed in frames per second
        fps: f32,
        /// First image of the sequence, e.g. image0000.bmp
        first_image: PathBuf,
        /// Palette histogram depth in bits per component (6-8)
        #[arg(short, long, default_value_t = 7)]
        depth: u32,
    },
    /// Extract frames of an .ap video as numbered BMP files
    #[command(alias = "x")]
    Extract {
        /// Input video file (.ap)
        input: PathBuf,
        /// Name template for the written images, e.g. image0000.bmp
        template: PathBuf,
        /// First frame to write
        #[arg(default_value_t = 0)]
        first: u32,
        /// Last frame to write (defaults to the final frame)
        last: Option<u32>,
    },
    /// Show metadata of an .ap video
    Info {
        /// Input video file (.ap)
        input: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Encode {
            output,
            fps,
            first_image,
            depth,
        } => cmd_encode(&output, fps, &first_image, depth),
        Commands::Extract {
            input,
            template,
            first,
            last,
        } => cmd_extract(&input, &template, first, last),
        Commands::Info { input } => cmd_info(&input),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn cmd_encode(output: &Path, fps: f32, first_image: &Path, depth: u32) -> Result<(), String> {
    let template = NameTemplate::parse(first_image)?;

    let mut encoder = ApEncoder::new();
    encoder.set_options(fps, depth).map_err(|e| e.to_string())?;
    encoder.set_file(output).map_err(|e| e.to_string())?;

    let mut image = Bitmap::new();
    let mut count = 0u32;
    loop {
        let name = template.name(count);
        if !name.exists() {
            break;
        }
        bmp::read_bmp(&name, &mut image).map_err(|e| format!("{}: {e}", name.display()))?;
        encoder.put_image(&image).map_err(|e| e.to_string())?;
        count += 1;
    }
    if count == 0 {
        return Err(format!("{} does not exist", template.name(0).display()));
    }
    encoder.close().map_err(|e| e.to_string())?;

    eprintln!(
        "encoded {count} frames of {}x{} at {fps} fps into {}",
        image.width,
        image.height,
        output.display()
    );
    Ok(())
}

fn cmd_extract(input: &Path, template: &Path, first: u32, last: Option<u32>) -> Result<(), String> {
    let mut decoder = ApDecoder::open(input).map_err(|e| e.to_string())?;
    let length = decoder.frame_count();
    if length == 0 {
        return Err("video has no frames".into());
    }
    let last = last.unwrap_or(length - 1);
    if first > last || last >= length {
        return Err(format!(
            "frame range {first}..{last} is outside the video's 0..{}",
            length - 1
        ));
    }

    let mut template = NameTemplate::parse(template)?;
    template.widen(decimal_width(last));

    let mut buffer = decoder.create_frame_buffer().map_err(|e| e.to_string())?;
    let mut image = Bitmap::with_size(decoder.frame_width(), decoder.frame_height(), 3)
        .map_err(|e| e.to_string())?;

    // Delta frames depend on every frame before them, so decoding always
    // starts at frame 0 even when writing begins later.
    for frame in 0..=last {
        decoder.get_frame(&mut buffer).map_err(|e| e.to_string())?;
        if frame >= first {
            let name = template.name(frame);
            crop_into(&buffer, &mut image);
            bmp::write_bmp(&name, &image).map_err(|e| format!("{}: {e}", name.display()))?;
        }
    }

    eprintln!(
        "extracted frames {first}..{last} of {} as {}",
        input.display(),
        template.name(first).display()
    );
    Ok(())
}

fn cmd_info(input: &Path) -> Result<(), String> {
    let decoder = ApDecoder::open(input).map_err(|e| e.to_string())?;

    let seconds = decoder.frame_count() as f32 / decoder.fps();
    println!("AP video info");
    println!("  File:        {}", input.display());
    println!(
        "  Frame size:  {} x {} (decodes as {} x {})",
        decoder.frame_width(),
        decoder.frame_height(),
        decoder.buffer_width(),
        decoder.buffer_height()
    );
    println!("  Frames:      {}", decoder.frame_count());
    println!("  Speed:       {} fps", decoder.fps());
    println!("  Duration:    {seconds:.2} s");
    Ok(())
}

/// Copy the logical frame out of the padded decode buffer.
fn crop_into(buffer: &Bitmap, image: &mut Bitmap) {
    let src_scan = buffer.scanline();
    let dst_scan = image.scanline();
    for y in 0..image.height as usize {
        let s = y * src_scan;
        let d = y * dst_scan;
        image.pixels[d..d + dst_scan].copy_from_slice(&buffer.pixels[s..s + dst_scan]);
    }
}

/// Digits in the decimal rendering of `n`.
fn decimal_width(n: u32) -> usize {
    let mut width = 1;
    let mut n = n / 10;
    while n != 0 {
        width += 1;
        n /= 10;
    }
    width
}

/// A numbered file name split around its zero run: `image0000.bmp` is
/// `image` + 4 digits + `.bmp`.
struct NameTemplate {
    prefix: String,
    digits: usize,
    suffix: String,
}

impl NameTemplate {
    fn parse(path: &Path) -> Result<Self, String> {
        let text = path.to_string_lossy();
        let name_start = text
            .rfind(['/', '\\'])
            .map(|i| i + 1)
            .unwrap_or(0);
        let name = &text[name_start..];

        let zeros_start = name
            .find('0')
            .ok_or_else(|| format!("file name template '{name}' has no zero digits"))?;
        let after = &name[zeros_start..];
        let zeros = after.chars().take_while(|&c| c == '0').count();
        let suffix = &after[zeros..];
        if suffix.is_empty() {
            return Err(format!(
                "file name template '{name}' has nothing after its zero digits"
            ));
        }

        Ok(Self {
            prefix: format!("{}{}", &text[..name_start], &name[..zeros_start]),
            digits: zeros,
            suffix: suffix.to_string(),
        })
    }

    /// Make sure `digits` counters fit without changing shorter names.
    fn widen(&mut self, digits: usize) {
        self.digits = self.digits.max(digits);
    }

    fn name(&self, number: u32) -> PathBuf {
        PathBuf::from(format!(
            "{}{:0width$}{}",
            self.prefix,
            number,
            self.suffix,
            width = self.digits
        ))
    }
}
