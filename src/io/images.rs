// -----------------------------------------------------------------------------
// Input frame discovery and decoding
// -----------------------------------------------------------------------------

use std::path::{Path, PathBuf};

use tracing::info;

use crate::engine::{FrameDimensions, FrameSource, Plane};
use crate::error::{ConfigError, RunError};

/// Inclusive frame interval; `last == None` means "until the first gap".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameRange {
    pub first: usize,
    pub last: Option<usize>,
}

/// Expand the printf-style integer conversions of `pattern` with `indices`,
/// one index per conversion.
///
/// Supports `%d`, `%Nd`, `%0Nd` and the `%%` escape.
pub fn format_pattern(pattern: &str, indices: &[usize]) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut chars = pattern.chars().peekable();
    let mut values = indices.iter();
    let mut conversions = 0;
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let zero = chars.peek() == Some(&'0');
        if zero {
            chars.next();
        }
        let mut width = 0usize;
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            width = width * 10 + d as usize;
            chars.next();
        }
        if chars.next() != Some('d') {
            return Err(ConfigError::Invalid(format!(
                "input pattern \"{}\" has an unsupported conversion; use %d or %0Nd",
                pattern
            )));
        }
        conversions += 1;
        let Some(&index) = values.next() else { continue };
        if zero {
            out.push_str(&format!("{:0width$}", index, width = width));
        } else {
            out.push_str(&format!("{:width$}", index, width = width));
        }
    }
    if conversions != indices.len() {
        return Err(ConfigError::Invalid(format!(
            "input pattern \"{}\" has {} %d conversion(s), expected {}",
            pattern,
            conversions,
            indices.len()
        )));
    }
    Ok(out)
}

/// Decode an image as single-channel intensities in `[0, 1]`.
pub fn load_grayscale(path: &Path) -> Result<Plane, RunError> {
    let img = image::open(path)?.to_luma32f();
    let (w, h) = img.dimensions();
    Ok(Plane {
        dims: FrameDimensions { width: w as usize, height: h as usize },
        data: img.into_raw(),
    })
}

/// Mean of same-sized z-slices, so a stack reads like a single frame.
fn project_slices(path: &Path, slices: Vec<Plane>) -> Result<Plane, RunError> {
    let mut slices = slices.into_iter();
    let Some(mut sum) = slices.next() else {
        return Err(RunError::MissingInputFrame(path.to_path_buf()));
    };
    let mut count = 1.0f32;
    for slice in slices {
        if slice.dims != sum.dims {
            return Err(ConfigError::Invalid(format!(
                "z-slices of {} differ in size: {}x{} vs {}x{}",
                path.display(),
                sum.dims.width,
                sum.dims.height,
                slice.dims.width,
                slice.dims.height
            ))
            .into());
        }
        for (acc, v) in sum.data.iter_mut().zip(slice.data) {
            *acc += v;
        }
        count += 1.0;
    }
    if count > 1.0 {
        for v in &mut sum.data {
            *v /= count;
        }
    }
    Ok(sum)
}

/// Frames `first..` of a numbered image series, resolved once up front.
/// Each frame is a stack of one path per z-slice.
#[derive(Clone, Debug)]
pub struct ImageSequence {
    first: usize,
    stacks: Vec<Vec<PathBuf>>,
}

impl ImageSequence {
    /// With `z_slices > 1` the pattern takes two conversions, frame then slice.
    pub fn discover(pattern: &str, range: FrameRange, z_slices: usize) -> Result<Self, RunError> {
        if let Some(last) = range.last {
            if last < range.first {
                return Err(ConfigError::Invalid(format!(
                    "frame_first ({}) must not exceed frame_last ({})",
                    range.first, last
                ))
                .into());
            }
        }
        if z_slices == 0 {
            return Err(ConfigError::Invalid("z_slices must be at least 1".into()).into());
        }

        let mut stacks = Vec::new();
        let mut index = range.first;
        loop {
            let stack = (0..z_slices)
                .map(|z| {
                    let name = if z_slices == 1 {
                        format_pattern(pattern, &[index])?
                    } else {
                        format_pattern(pattern, &[index, z])?
                    };
                    Ok(PathBuf::from(name))
                })
                .collect::<Result<Vec<_>, ConfigError>>()?;
            match stack.iter().find(|p| !p.is_file()) {
                None => {
                    stacks.push(stack);
                    if range.last == Some(index) {
                        break;
                    }
                }
                Some(_) if range.last.is_none() && index != range.first => {
                    info!(last_frame = index - 1, "no more input frames");
                    break;
                }
                Some(missing) => return Err(RunError::MissingInputFrame(missing.clone())),
            }
            index += 1;
        }
        info!(first = range.first, count = stacks.len(), z_slices, "discovered input frames");
        Ok(Self { first: range.first, stacks })
    }

    /// File names in position order.
    pub fn file_names(&self) -> Vec<String> {
        (0..self.stacks.len()).map(|pos| self.file_name(pos)).collect()
    }
}

impl FrameSource for ImageSequence {
    fn len(&self) -> usize {
        self.stacks.len()
    }

    fn first_number(&self) -> usize {
        self.first
    }

    /// Name of the frame's first slice.
    fn file_name(&self, pos: usize) -> String {
        self.stacks
            .get(pos)
            .and_then(|stack| stack.first())
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn load(&self, pos: usize) -> Result<Plane, RunError> {
        let missing = || RunError::MissingInputFrame(PathBuf::from(format!("<frame {}>", self.first + pos)));
        let stack = self.stacks.get(pos).ok_or_else(missing)?;
        let first = stack.first().ok_or_else(missing)?;
        if stack.len() == 1 {
            return load_grayscale(first);
        }
        let slices = stack.iter().map(|p| load_grayscale(p)).collect::<Result<Vec<_>, _>>()?;
        project_slices(first, slices)
    }
}
