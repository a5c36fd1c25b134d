use nalgebra::Scalar;
use num_traits::{FromPrimitive, Num};
use serde::{Deserialize, Serialize};

use super::point::{CartesianPoint2d, Point2};

/// Axis-aligned rectangle.
///
/// A rectangle with `x_min >= x_max` or `y_min >= y_max` is considered empty. Empty rectangles
/// are valid values: they have zero area and do not intersect anything.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rect<N = f64> {
    x_min: N,
    y_min: N,
    x_max: N,
    y_max: N,
}

impl<N: Num + Copy + PartialOrd + FromPrimitive + Scalar> Rect<N> {
    /// Creates a new rectangle.
    pub fn new(x_min: N, y_min: N, x_max: N, y_max: N) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Minimum X.
    pub fn x_min(&self) -> N {
        self.x_min
    }

    /// Maximum X.
    pub fn x_max(&self) -> N {
        self.x_max
    }

    /// Minimum Y.
    pub fn y_min(&self) -> N {
        self.y_min
    }

    /// Maximum Y.
    pub fn y_max(&self) -> N {
        self.y_max
    }

    /// Width of the rectangle. Negative for inverted rectangles.
    pub fn width(&self) -> N {
        self.x_max - self.x_min
    }

    /// Height of the rectangle. Negative for inverted rectangles.
    pub fn height(&self) -> N {
        self.y_max - self.y_min
    }

    /// Returns true if the rectangle has no positive area.
    pub fn is_empty(&self) -> bool {
        !(self.x_min < self.x_max && self.y_min < self.y_max)
    }

    /// Area of the rectangle, zero for empty rectangles.
    pub fn area(&self) -> N {
        if self.is_empty() {
            N::zero()
        } else {
            self.width() * self.height()
        }
    }

    /// Center point.
    pub fn center(&self) -> Point2<N> {
        let two = N::one() + N::one();
        Point2::new(
            (self.x_min + self.x_max) / two,
            (self.y_min + self.y_max) / two,
        )
    }

    /// Returns a rectangle with every side moved inward by `amount`. Negative `amount` grows the
    /// rectangle.
    pub fn shrink(&self, amount: N) -> Self {
        Self {
            x_min: self.x_min + amount,
            x_max: self.x_max - amount,
            y_min: self.y_min + amount,
            y_max: self.y_max - amount,
        }
    }

    /// Returns a rectangle with every side moved outward by `amount`.
    pub fn expand(&self, amount: N) -> Self {
        Self {
            x_min: self.x_min - amount,
            x_max: self.x_max + amount,
            y_min: self.y_min - amount,
            y_max: self.y_max + amount,
        }
    }

    /// Returns true if the two rectangles share an area. Rectangles touching only by an edge or a
    /// corner do not intersect.
    pub fn intersects(&self, other: &Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x_min < other.x_max
            && other.x_min < self.x_max
            && self.y_min < other.y_max
            && other.y_min < self.y_max
    }

    /// Common part of two rectangles, or `None` if they do not intersect.
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        if !self.intersects(other) {
            return None;
        }

        Some(Self {
            x_min: max(self.x_min, other.x_min),
            y_min: max(self.y_min, other.y_min),
            x_max: min(self.x_max, other.x_max),
            y_max: min(self.y_max, other.y_max),
        })
    }

    /// Returns true if `other` lies completely inside this rectangle.
    pub fn contains_rect(&self, other: &Self) -> bool {
        self.x_min <= other.x_min
            && self.y_min <= other.y_min
            && self.x_max >= other.x_max
            && self.y_max >= other.y_max
    }

    /// Returns true if the point is inside the rectangle or on its border.
    pub fn contains(&self, point: &impl CartesianPoint2d<Num = N>) -> bool {
        self.x_min <= point.x()
            && self.x_max >= point.x()
            && self.y_min <= point.y()
            && self.y_max >= point.y()
    }
}

fn min<N: PartialOrd>(a: N, b: N) -> N {
    if a < b {
        a
    } else {
        b
    }
}

fn max<N: PartialOrd>(a: N, b: N) -> N {
    if a > b {
        a
    } else {
        b
    }
}
