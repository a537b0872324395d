use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// Integer pixel rectangle. `right()` and `bottom()` are exclusive and
/// saturate at `i32::MAX`; [`is_representable`](Self::is_representable)
/// tells whether they are exact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle spanning `[left, right) x [top, bottom)`.
    pub fn from_edges(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self::new(left, top, right.saturating_sub(left), bottom.saturating_sub(top))
    }

    pub fn left(&self) -> i32 {
        self.x
    }

    pub fn top(&self) -> i32 {
        self.y
    }

    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    /// True when both far edges fit in an `i32`.
    pub fn is_representable(&self) -> bool {
        self.x.checked_add(self.width).is_some() && self.y.checked_add(self.height).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.width as usize * self.height as usize
        }
    }

    /// Overlap of two rectangles; an empty default rect when they do not meet.
    pub fn intersected(&self, other: &Rect) -> Rect {
        let left = self.left().max(other.left());
        let top = self.top().max(other.top());
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            Rect::default()
        } else {
            Rect::from_edges(left, top, right, bottom)
        }
    }

    /// Bounding box of both rectangles. Empty rectangles are ignored.
    pub fn united(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect::from_edges(
            self.left().min(other.left()),
            self.top().min(other.top()),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x.saturating_add(dx), self.y.saturating_add(dy), self.width, self.height)
    }

    /// `translated`, or `None` when the moved rect leaves the `i32` range.
    pub fn checked_translated(&self, dx: i32, dy: i32) -> Option<Rect> {
        let moved = Rect::new(self.x.checked_add(dx)?, self.y.checked_add(dy)?, self.width, self.height);
        moved.is_representable().then_some(moved)
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        !self.intersected(other).is_empty()
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.left() && x < self.right() && y >= self.top() && y < self.bottom()
    }

    /// True when `other` lies entirely inside `self`. Empty rects are contained everywhere.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.is_empty()
            || (other.left() >= self.left()
                && other.top() >= self.top()
                && other.right() <= self.right()
                && other.bottom() <= self.bottom())
    }
}

/// Floating-point point used by the perspective code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PointF {
    pub x: f64,
    pub y: f64,
}

impl PointF {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn manhattan_length(&self) -> f64 {
        self.x.abs() + self.y.abs()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// z-component of the 2D cross product.
    pub fn cross(&self, other: PointF) -> f64 {
        self.x * other.y - self.y * other.x
    }
}

impl Add for PointF {
    type Output = PointF;
    fn add(self, rhs: PointF) -> PointF {
        PointF::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for PointF {
    type Output = PointF;
    fn sub(self, rhs: PointF) -> PointF {
        PointF::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for PointF {
    type Output = PointF;
    fn mul(self, rhs: f64) -> PointF {
        PointF::new(self.x * rhs, self.y * rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_of_disjoint_rects_is_empty() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(10, 0, 5, 5);
        assert!(a.intersected(&b).is_empty());
        assert!(!a.intersects(&b));
    }

    #[test]
    fn united_ignores_empty() {
        let a = Rect::new(5, 5, 10, 10);
        assert_eq!(a.united(&Rect::default()), a);
        assert_eq!(Rect::default().united(&a), a);
        assert_eq!(a.united(&Rect::new(0, 0, 1, 1)), Rect::new(0, 0, 15, 15));
    }

    #[test]
    fn contains_uses_half_open_edges() {
        let r = Rect::new(-4, -4, 8, 8);
        assert!(r.contains_point(-4, -4));
        assert!(!r.contains_point(4, 0));
        assert!(r.contains_rect(&Rect::new(-4, -4, 8, 8)));
        assert!(!r.contains_rect(&Rect::new(-4, -4, 9, 8)));
    }

    #[test]
    fn edges_saturate_near_i32_max() {
        let r = Rect::new(i32::MAX - 2, 0, 10, 1);
        assert_eq!(r.right(), i32::MAX);
        assert!(!r.is_representable());
        assert!(Rect::new(i32::MAX - 10, 0, 10, 1).is_representable());
        assert_eq!(Rect::new(0, 0, 4, 4).checked_translated(i32::MAX, 0), None);
        assert_eq!(Rect::new(1, 2, 4, 4).checked_translated(-1, -2), Some(Rect::new(0, 0, 4, 4)));
    }
}
