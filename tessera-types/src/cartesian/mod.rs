//! Types and functions on geometries in cartesian coordinates.

mod point;
mod rect;

pub use point::{CartesianPoint2d, Point2, Point2d};
pub use rect::Rect;
