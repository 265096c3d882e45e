// src/engine/geom.rs
use std::cmp::{max, min};
use super::{FrameDimensions, IntRect};

/// Smallest rectangle containing both; empty inputs are ignored.
pub(crate) fn union_rect(a: &IntRect, b: &IntRect) -> IntRect {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => *b,
        (_, true) => *a,
        _ => {
            let (x0, y0) = (min(a.x, b.x), min(a.y, b.y));
            let (x1, y1) = (max(a.x + a.w, b.x + b.w), max(a.y + a.h, b.y + b.h));
            IntRect { x: x0, y: y0, w: x1 - x0, h: y1 - y0 }
        }
    }
}

/// Grow `r` by `pad` pixels on every side, clipped to the canvas.
#[inline]
pub(crate) fn pad_and_clamp_rect(r: IntRect, pad: usize, dims: FrameDimensions) -> IntRect {
    if r.is_empty() {
        return IntRect::empty();
    }
    let (x0, y0) = (r.x.saturating_sub(pad), r.y.saturating_sub(pad));
    let x1 = (r.x + r.w + pad).min(dims.width);
    let y1 = (r.y + r.h + pad).min(dims.height);
    IntRect { x: x0, y: y0, w: x1.saturating_sub(x0), h: y1.saturating_sub(y0) }
}

/// Pixel rectangle covering the continuous bounds `[x0, x1] x [y0, y1]`,
/// clipped to the canvas. Pixel `(i, j)` is sampled at its integer coordinate.
pub(crate) fn rect_from_bounds(x0: f64, y0: f64, x1: f64, y1: f64, dims: FrameDimensions) -> IntRect {
    if !(x0.is_finite() && y0.is_finite() && x1.is_finite() && y1.is_finite()) {
        return IntRect::empty();
    }
    let w = dims.width as f64;
    let h = dims.height as f64;
    let lo_x = x0.ceil().max(0.0);
    let lo_y = y0.ceil().max(0.0);
    let hi_x = x1.floor().min(w - 1.0);
    let hi_y = y1.floor().min(h - 1.0);
    if hi_x < lo_x || hi_y < lo_y {
        return IntRect::empty();
    }
    IntRect {
        x: lo_x as usize,
        y: lo_y as usize,
        w: (hi_x - lo_x) as usize + 1,
        h: (hi_y - lo_y) as usize + 1,
    }
}
