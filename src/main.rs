use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use png::{BitDepth, ColorType, Encoder};

use camsync::{
    default_opener, AnnotationSource, FrameUpdate, RenderedFrame, ReviewSession, ReviewSettings,
};

/// Headless review: position the shared timeline, play a few ticks, and dump
/// each stream's raster as PNG.
#[derive(Debug, Parser)]
#[command(name = "camsync", version, about)]
struct Args {
    /// Folder containing one subdirectory per camera
    folder: PathBuf,

    /// Settings JSON (defaults apply to missing fields)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Global frame to seek to before playing
    #[arg(long, default_value_t = 0)]
    start: i64,

    /// Playback ticks to run after the seek
    #[arg(long, default_value_t = 0)]
    ticks: u32,

    /// Annotation source: gt or det
    #[arg(long, default_value = "gt")]
    source: AnnotationSource,

    /// Hide annotation boxes
    #[arg(long)]
    no_overlay: bool,

    /// Output directory for PNG snapshots
    #[arg(long, default_value = "snapshots")]
    out: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let settings = match &args.settings {
        Some(path) => ReviewSettings::load(path)
            .with_context(|| format!("loading settings {}", path.display()))?,
        None => ReviewSettings::default(),
    };

    let opener = default_opener();
    let mut session = ReviewSession::open(&args.folder, &settings, opener.as_ref())
        .with_context(|| format!("opening {}", args.folder.display()))?;
    for skipped in session.skipped() {
        log::warn!("{}: {}", skipped.name, skipped.error);
    }

    session.set_annotation_source(args.source);
    session.set_overlay_visible(!args.no_overlay);

    let mut update = session.seek(args.start);
    if args.ticks > 0 {
        session.play()?;
        for _ in 0..args.ticks {
            update = session.tick();
        }
        session.pause()?;
    }

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("creating {}", args.out.display()))?;
    write_snapshots(&update, &args.out)?;

    let range = session.frame_range();
    log::info!(
        "Wrote {} snapshots at global frame {} (range {}..={})",
        update.rendered().count(),
        update.global_index,
        range.start(),
        range.end()
    );
    Ok(())
}

fn write_snapshots(update: &FrameUpdate, out: &Path) -> Result<()> {
    for frame in update.rendered() {
        let path = out.join(format!("{}_{:06}.png", frame.stream, update.global_index));
        write_png(&path, &frame.raster).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

fn write_png(path: &Path, raster: &RenderedFrame) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    let mut encoder = Encoder::new(writer, raster.width, raster.height);
    encoder.set_color(ColorType::Rgba);
    encoder.set_depth(BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&raster.rgba)?;
    Ok(())
}
