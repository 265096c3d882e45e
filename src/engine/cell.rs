// -----------------------------------------------------------------------------
// Bacillus cell model
// -----------------------------------------------------------------------------

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::error::GeometryError;
use super::{rect_from_bounds, FrameDimensions, IntRect};

/// A rod-shaped cell: a rectangle of `width` capped by two half discs, `length`
/// measured tip to tip along `rotation`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellModel {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub length: f64,
    /// Radians in `[0, 2π)`.
    pub rotation: f64,
    /// `[0, 1]`.
    pub opacity: f64,
    /// Set on both children in the frame where a division happened.
    pub split_alpha: Option<f64>,
    pub dormant: bool,
}

/// Additive change to the movable parameters of a cell.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CellDelta {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub length: f64,
    pub rotation: f64,
}

/// Pixel mask of a cell, restricted to its clipped bounding rectangle.
#[derive(Clone, Debug)]
pub struct Footprint {
    pub rect: IntRect,
    /// Row-major over `rect`.
    pub mask: Vec<bool>,
}

impl Footprint {
    pub fn area(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    #[inline]
    pub fn covers(&self, x: usize, y: usize) -> bool {
        if x < self.rect.x || y < self.rect.y || x >= self.rect.x + self.rect.w || y >= self.rect.y + self.rect.h {
            return false;
        }
        self.mask[(y - self.rect.y) * self.rect.w + (x - self.rect.x)]
    }
}

impl CellModel {
    pub fn new(
        name: impl Into<String>,
        x: f64,
        y: f64,
        width: f64,
        length: f64,
        rotation: f64,
    ) -> Result<Self, GeometryError> {
        let cell = Self {
            name: name.into(),
            x,
            y,
            width,
            length,
            rotation: rotation.rem_euclid(TAU),
            opacity: 1.0,
            split_alpha: None,
            dormant: false,
        };
        cell.validate()?;
        Ok(cell)
    }

    pub fn with_opacity(mut self, opacity: f64) -> Result<Self, GeometryError> {
        self.opacity = opacity;
        self.validate()?;
        Ok(self)
    }

    pub(crate) fn validate(&self) -> Result<(), GeometryError> {
        let finite = [self.x, self.y, self.width, self.length, self.rotation, self.opacity]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(GeometryError::invalid(&self.name, "non-finite parameter"));
        }
        if self.width <= 0.0 || self.length <= 0.0 {
            return Err(GeometryError::invalid(
                &self.name,
                format!("non-positive size (width {}, length {})", self.width, self.length),
            ));
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(GeometryError::invalid(&self.name, format!("opacity {} outside [0, 1]", self.opacity)));
        }
        Ok(())
    }

    #[inline]
    fn radius(&self) -> f64 {
        self.width / 2.0
    }

    /// Half length of the straight core segment between the two cap centres.
    #[inline]
    fn core_half_length(&self) -> f64 {
        (self.length / 2.0 - self.radius()).max(0.0)
    }

    #[inline]
    fn direction(&self) -> (f64, f64) {
        (self.rotation.cos(), self.rotation.sin())
    }

    /// Returns a moved copy; `self` is left untouched.
    pub fn with_delta(&self, delta: &CellDelta) -> Result<CellModel, GeometryError> {
        let mut next = self.clone();
        next.x += delta.x;
        next.y += delta.y;
        next.width += delta.width;
        next.length += delta.length;
        next.rotation = (next.rotation + delta.rotation).rem_euclid(TAU);
        next.validate()?;
        Ok(next)
    }

    /// Whether the point `(px, py)` lies inside the cell body.
    #[inline]
    pub fn contains(&self, px: f64, py: f64) -> bool {
        let (c, s) = self.direction();
        let dx = px - self.x;
        let dy = py - self.y;
        let along = dx * c + dy * s;
        let across = -dx * s + dy * c;
        let h = self.core_half_length();
        let excess = along - along.clamp(-h, h);
        let r = self.radius();
        excess * excess + across * across <= r * r
    }

    /// Continuous axis-aligned bounds `(x0, y0, x1, y1)`.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let (c, s) = self.direction();
        let h = self.core_half_length();
        let r = self.radius();
        let hx = h * c.abs() + r;
        let hy = h * s.abs() + r;
        (self.x - hx, self.y - hy, self.x + hx, self.y + hy)
    }

    /// Clipped pixel rectangle that contains every covered pixel.
    pub fn pixel_rect(&self, dims: FrameDimensions) -> IntRect {
        let (x0, y0, x1, y1) = self.bounds();
        rect_from_bounds(x0, y0, x1, y1, dims)
    }

    /// True when no part of the cell can land on the canvas.
    pub fn is_off_canvas(&self, dims: FrameDimensions) -> bool {
        self.pixel_rect(dims).is_empty()
    }

    pub fn footprint(&self, dims: FrameDimensions) -> Footprint {
        let rect = self.pixel_rect(dims);
        let mut mask = Vec::with_capacity(rect.area());
        for y in rect.y..rect.y + rect.h {
            for x in rect.x..rect.x + rect.w {
                mask.push(self.contains(x as f64, y as f64));
            }
        }
        Footprint { rect, mask }
    }

    /// Closed polygon tracing the cell boundary, `samples_per_cap` points per cap.
    pub fn outline(&self, samples_per_cap: usize) -> Vec<(f64, f64)> {
        let n = samples_per_cap.max(2);
        let (c, s) = self.direction();
        let h = self.core_half_length();
        let r = self.radius();
        let mut pts = Vec::with_capacity(2 * n);
        for (cx, cy, start) in [
            (self.x + h * c, self.y + h * s, self.rotation - std::f64::consts::FRAC_PI_2),
            (self.x - h * c, self.y - h * s, self.rotation + std::f64::consts::FRAC_PI_2),
        ] {
            for i in 0..n {
                let a = start + std::f64::consts::PI * (i as f64) / ((n - 1) as f64);
                pts.push((cx + r * a.cos(), cy + r * a.sin()));
            }
        }
        pts
    }

    /// Divide the cell at fraction `alpha` of its length, measured from the back tip.
    ///
    /// Children keep the width and orientation; their lengths are `alpha * length`
    /// and `(1 - alpha) * length`. They are named `<name>0` (back) and `<name>1`
    /// (front) and carry `split_alpha = alpha`.
    pub fn split(&self, alpha: f64) -> Result<(CellModel, CellModel), GeometryError> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(GeometryError::invalid(&self.name, format!("split fraction {} outside (0, 1)", alpha)));
        }
        let (c, s) = self.direction();
        let back = (self.x - c * self.length / 2.0, self.y - s * self.length / 2.0);
        let front = (self.x + c * self.length / 2.0, self.y + s * self.length / 2.0);
        let cut = (back.0 + c * alpha * self.length, back.1 + s * alpha * self.length);

        let mut first = self.clone();
        first.name = format!("{}0", self.name);
        first.x = (back.0 + cut.0) / 2.0;
        first.y = (back.1 + cut.1) / 2.0;
        first.length = alpha * self.length;
        first.split_alpha = Some(alpha);

        let mut second = self.clone();
        second.name = format!("{}1", self.name);
        second.x = (cut.0 + front.0) / 2.0;
        second.y = (cut.1 + front.1) / 2.0;
        second.length = (1.0 - alpha) * self.length;
        second.split_alpha = Some(alpha);

        first.validate()?;
        second.validate()?;
        Ok((first, second))
    }

    /// Join two siblings back into one cell spanning their outermost tips.
    pub fn combine(&self, sibling: &CellModel, name: impl Into<String>) -> Result<CellModel, GeometryError> {
        let tips = |cell: &CellModel| {
            let (c, s) = cell.direction();
            let half = cell.length / 2.0;
            [(cell.x - c * half, cell.y - s * half), (cell.x + c * half, cell.y + s * half)]
        };
        let a = tips(self);
        let b = tips(sibling);
        let mut best = (a[0], b[1], 0.0f64);
        for p in a.iter().chain(b.iter()) {
            for q in a.iter().chain(b.iter()) {
                let d = (q.0 - p.0).hypot(q.1 - p.1);
                if d > best.2 {
                    best = (*p, *q, d);
                }
            }
        }
        let (p, q, length) = best;
        let merged = CellModel {
            name: name.into(),
            x: (p.0 + q.0) / 2.0,
            y: (p.1 + q.1) / 2.0,
            width: (self.width + sibling.width) / 2.0,
            length,
            rotation: (q.1 - p.1).atan2(q.0 - p.0).rem_euclid(TAU),
            opacity: (self.opacity + sibling.opacity) / 2.0,
            split_alpha: None,
            dormant: false,
        };
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rod() -> CellModel {
        CellModel::new("1", 50.0, 50.0, 10.0, 30.0, 0.0).unwrap()
    }

    #[test]
    fn constructor_rejects_non_positive_size() {
        assert!(CellModel::new("a", 0.0, 0.0, 0.0, 10.0, 0.0).is_err());
        assert!(CellModel::new("a", 0.0, 0.0, 5.0, -1.0, 0.0).is_err());
    }

    #[test]
    fn rotation_is_normalised() {
        let c = CellModel::new("a", 0.0, 0.0, 2.0, 4.0, -std::f64::consts::FRAC_PI_2).unwrap();
        assert_relative_eq!(c.rotation, 3.0 * std::f64::consts::FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn containment_follows_the_capsule() {
        let c = rod();
        assert!(c.contains(50.0, 50.0));
        assert!(c.contains(64.0, 50.0));
        assert!(!c.contains(66.0, 50.0));
        assert!(c.contains(50.0, 54.9));
        assert!(!c.contains(50.0, 55.5));
        // corner of the bounding box lies outside the rounded cap
        assert!(!c.contains(64.5, 54.5));
    }

    #[test]
    fn footprint_stays_inside_pixel_rect() {
        let dims = FrameDimensions { width: 100, height: 100 };
        let c = CellModel::new("a", 40.0, 30.0, 8.0, 24.0, 0.7).unwrap();
        let fp = c.footprint(dims);
        assert!(fp.area() > 0);
        let mut counted = 0;
        for y in 0..dims.height {
            for x in 0..dims.width {
                if c.contains(x as f64, y as f64) {
                    counted += 1;
                    assert!(fp.covers(x, y), "pixel ({x},{y}) outside footprint");
                }
            }
        }
        assert_eq!(counted, fp.area());
    }

    #[test]
    fn delta_returns_new_instance_and_keeps_source() {
        let c = rod();
        let moved = c.with_delta(&CellDelta { x: 1.5, length: -2.0, ..Default::default() }).unwrap();
        assert_eq!(c, rod());
        assert_relative_eq!(moved.x, 51.5);
        assert_relative_eq!(moved.length, 28.0);
    }

    #[test]
    fn delta_to_zero_width_is_invalid() {
        let c = rod();
        let err = c.with_delta(&CellDelta { width: -10.0, ..Default::default() }).unwrap_err();
        assert!(matches!(err, GeometryError::InvalidGeometry { .. }));
    }

    #[test]
    fn split_conserves_length_and_names_children() {
        let c = rod();
        let (a, b) = c.split(0.4).unwrap();
        assert_eq!(a.name, "10");
        assert_eq!(b.name, "11");
        assert_relative_eq!(a.length + b.length, c.length, epsilon = 1e-12);
        assert_relative_eq!(a.x, 50.0 - 15.0 + 6.0, epsilon = 1e-12);
        assert_relative_eq!(b.x, 50.0 - 15.0 + 12.0 + 9.0, epsilon = 1e-12);
        assert_eq!(a.split_alpha, Some(0.4));
        assert!(c.split(1.0).is_err());
        assert!(c.split(0.0).is_err());
    }

    #[test]
    fn combine_inverts_split() {
        let c = CellModel::new("7", 20.0, 30.0, 6.0, 24.0, 1.1).unwrap();
        let (a, b) = c.split(0.5).unwrap();
        let m = a.combine(&b, "7").unwrap();
        assert_relative_eq!(m.x, c.x, epsilon = 1e-9);
        assert_relative_eq!(m.y, c.y, epsilon = 1e-9);
        assert_relative_eq!(m.length, c.length, epsilon = 1e-9);
        let dr = (m.rotation - c.rotation).rem_euclid(std::f64::consts::PI);
        assert!(dr < 1e-9 || (std::f64::consts::PI - dr) < 1e-9);
    }

    #[test]
    fn outline_points_lie_on_boundary() {
        let c = rod();
        for (x, y) in c.outline(8) {
            let (cc, s) = (c.rotation.cos(), c.rotation.sin());
            let along = (x - c.x) * cc + (y - c.y) * s;
            let across = -(x - c.x) * s + (y - c.y) * cc;
            let excess = along - along.clamp(-10.0, 10.0);
            assert_relative_eq!((excess * excess + across * across).sqrt(), 5.0, epsilon = 1e-9);
        }
    }
}
