// -----------------------------------------------------------------------------
// Per-frame outputs: lineage log, best-fit / overlay / residual images, debug log
// -----------------------------------------------------------------------------

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use tracing::debug;

use crate::engine::{CellModel, CommittedFrame, DebugRecord, FrameSink, Plane};
use crate::error::RunError;
use super::lineage_log::{LineageLog, LINEAGE_FILE};

const OUTLINE: Rgb<u8> = Rgb([255, 0, 0]);
const OUTLINE_SAMPLES_PER_CAP: usize = 24;

/// Where each output goes. `output` receives the lineage log and the overlays.
#[derive(Clone, Debug, Default)]
pub struct OutputDirs {
    pub output: PathBuf,
    pub bestfit: PathBuf,
    pub residual: Option<PathBuf>,
    pub debug: Option<PathBuf>,
}

#[inline]
fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0) as u8
}

/// Unpadded extent of a padded plane.
fn cropped(plane: &Plane, pad: usize) -> (u32, u32) {
    (
        plane.dims.width.saturating_sub(2 * pad) as u32,
        plane.dims.height.saturating_sub(2 * pad) as u32,
    )
}

pub fn render_bestfit(synthetic: &Plane, pad: usize) -> GrayImage {
    let (w, h) = cropped(synthetic, pad);
    GrayImage::from_fn(w, h, |x, y| Luma([to_u8(synthetic.get(x as usize + pad, y as usize + pad))]))
}

/// The real image with the outline of every active cell drawn in red.
pub fn render_overlay<'a, I>(real: &Plane, cells: I, pad: usize) -> RgbImage
where
    I: IntoIterator<Item = &'a CellModel>,
{
    let (w, h) = cropped(real, pad);
    let mut img = RgbImage::from_fn(w, h, |x, y| {
        let v = to_u8(real.get(x as usize + pad, y as usize + pad));
        Rgb([v, v, v])
    });
    let to_pixel = |(x, y): (f64, f64)| ((x - pad as f64).round() as f32, (y - pad as f64).round() as f32);
    for cell in cells.into_iter().filter(|c| !c.dormant) {
        let pts: Vec<(f32, f32)> = cell.outline(OUTLINE_SAMPLES_PER_CAP).into_iter().map(to_pixel).collect();
        for (i, &start) in pts.iter().enumerate() {
            draw_line_segment_mut(&mut img, start, pts[(i + 1) % pts.len()], OUTLINE);
        }
    }
    img
}

/// Diverging blue-white-red map over `t` in `[0, 1]`.
fn bwr(t: f32) -> Rgb<u8> {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        let v = to_u8(2.0 * t);
        Rgb([v, v, 255])
    } else {
        let v = to_u8(2.0 * (1.0 - t));
        Rgb([255, v, v])
    }
}

/// `real - synthetic`, clipped to `[vmin, vmax]` and colour mapped.
pub fn render_residual(real: &Plane, synthetic: &Plane, pad: usize, vmin: f32, vmax: f32) -> RgbImage {
    let (w, h) = cropped(real, pad);
    let span = (vmax - vmin).max(f32::EPSILON);
    RgbImage::from_fn(w, h, |x, y| {
        let (px, py) = (x as usize + pad, y as usize + pad);
        let r = (real.get(px, py) - synthetic.get(px, py)).clamp(vmin, vmax);
        bwr((r - vmin) / span)
    })
}

fn png_name(file_name: &str) -> PathBuf {
    Path::new(file_name).with_extension("png")
}

/// Writes everything a committed frame produces to disk.
pub struct FileSink {
    dirs: OutputDirs,
    log: LineageLog<File>,
    debug: Option<csv::Writer<File>>,
    residual_range: (f32, f32),
}

impl FileSink {
    pub fn create(dirs: OutputDirs, residual_range: (f32, f32)) -> Result<Self, RunError> {
        fs::create_dir_all(&dirs.output)?;
        fs::create_dir_all(&dirs.bestfit)?;
        if let Some(dir) = &dirs.residual {
            fs::create_dir_all(dir)?;
        }
        let debug = match &dirs.debug {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                Some(csv::Writer::from_path(dir.join("debug.csv"))?)
            }
            None => None,
        };
        let log = LineageLog::create(&dirs.output.join(LINEAGE_FILE))?;
        Ok(Self { dirs, log, debug, residual_range })
    }

    pub fn lineage_path(&self) -> PathBuf {
        self.dirs.output.join(LINEAGE_FILE)
    }
}

impl FrameSink for FileSink {
    fn frame_committed(&mut self, c: &CommittedFrame<'_>) -> Result<(), RunError> {
        self.log.append(c.frame, c.padding)?;

        let name = png_name(&c.frame.file_name);
        render_bestfit(c.synthetic, c.padding).save_with_format(self.dirs.bestfit.join(&name), ImageFormat::Png)?;
        render_overlay(c.real, c.frame.cells(), c.padding)
            .save_with_format(self.dirs.output.join(&name), ImageFormat::Png)?;
        if let Some(dir) = &self.dirs.residual {
            let (vmin, vmax) = self.residual_range;
            render_residual(c.real, c.synthetic, c.padding, vmin, vmax)
                .save_with_format(dir.join(&name), ImageFormat::Png)?;
        }
        debug!(frame = c.frame.number, file = %name.display(), "wrote frame outputs");
        Ok(())
    }

    fn debug_records(&mut self, records: &[DebugRecord]) -> Result<(), RunError> {
        if let Some(w) = self.debug.as_mut() {
            for r in records {
                w.serialize(r)?;
            }
            w.flush()?;
        }
        Ok(())
    }
}
