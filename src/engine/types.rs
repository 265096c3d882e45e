/// Dimensions of a frame canvas (after padding).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameDimensions {
    pub width: usize,
    pub height: usize,
}

impl FrameDimensions {
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub(crate) fn full_rect(&self) -> IntRect {
        IntRect { x: 0, y: 0, w: self.width, h: self.height }
    }
}

/// Integer rectangle in pixel space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IntRect {
    pub x: usize,
    pub y: usize,
    pub w: usize,
    pub h: usize,
}

impl IntRect {
    #[inline]
    pub(crate) fn empty() -> Self {
        Self { x: 0, y: 0, w: 0, h: 0 }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.w * self.h
    }

    #[inline]
    pub(crate) fn intersects(&self, other: &IntRect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }
}

/// Single-channel real-valued image, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct Plane {
    pub dims: FrameDimensions,
    pub data: Vec<f32>,
}

impl Plane {
    pub fn filled(dims: FrameDimensions, value: f32) -> Self {
        Self { dims, data: vec![value; dims.pixel_count()] }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.dims.width + x]
    }

    /// Surround the plane with `pad` pixels of `value` on every side.
    pub fn padded(&self, pad: usize, value: f32) -> Plane {
        if pad == 0 {
            return self.clone();
        }
        let dims = FrameDimensions {
            width: self.dims.width + 2 * pad,
            height: self.dims.height + 2 * pad,
        };
        let mut out = Plane::filled(dims, value);
        for y in 0..self.dims.height {
            let src = &self.data[y * self.dims.width..(y + 1) * self.dims.width];
            let start = (y + pad) * dims.width + pad;
            out.data[start..start + self.dims.width].copy_from_slice(src);
        }
        out
    }
}
