//! Minimal geometry types for widget allocations and navigation scoring.
//!
//! The host toolkit reports allocations and window-absolute bounds in
//! logical pixels; there is a single coordinate space, so no unit phantom
//! types are needed.

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Size {
    pub w: f64,
    pub h: f64,
}

impl Size {
    pub fn new(w: f64, h: f64) -> Self {
        Self { w, h }
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0.0 || self.h <= 0.0
    }

    /// The shorter of the two dimensions.
    pub fn short_side(&self) -> f64 {
        f64::min(self.w, self.h)
    }
}

impl From<(f64, f64)> for Size {
    fn from((w, h): (f64, f64)) -> Self {
        Self { w, h }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Rect {
    pub loc: Point,
    pub size: Size,
}

impl Rect {
    pub fn new(loc: impl Into<Point>, size: impl Into<Size>) -> Self {
        Self {
            loc: loc.into(),
            size: size.into(),
        }
    }

    pub fn from_size(size: impl Into<Size>) -> Self {
        Self {
            loc: Point::default(),
            size: size.into(),
        }
    }

    pub fn center(&self) -> Point {
        Point {
            x: self.loc.x + self.size.w / 2.0,
            y: self.loc.y + self.size.h / 2.0,
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.loc.x
            && point.y >= self.loc.y
            && point.x < self.loc.x + self.size.w
            && point.y < self.loc.y + self.size.h
    }
}
