pub use nalgebra::Point2;
use nalgebra::Scalar;
use num_traits::{Float, FromPrimitive, Num};

/// Point with `f64` coordinates, the type used for projected map coordinates.
pub type Point2d = Point2<f64>;

/// Point in 2d cartesian coordinate space.
pub trait CartesianPoint2d {
    /// Numeric type of the coordinates.
    type Num: Num + Copy + PartialOrd + FromPrimitive;

    /// X coordinate.
    fn x(&self) -> Self::Num;
    /// Y coordinate.
    fn y(&self) -> Self::Num;

    /// Squared euclidean distance between two points.
    fn distance_sq(&self, other: &impl CartesianPoint2d<Num = Self::Num>) -> Self::Num {
        let dx = self.x() - other.x();
        let dy = self.y() - other.y();
        dx * dx + dy * dy
    }

    /// Euclidean distance between two points.
    fn distance(&self, other: &impl CartesianPoint2d<Num = Self::Num>) -> Self::Num
    where
        Self::Num: Float,
    {
        self.distance_sq(other).sqrt()
    }
}

impl<N> CartesianPoint2d for Point2<N>
where
    N: Num + Copy + PartialOrd + FromPrimitive + Scalar,
{
    type Num = N;

    fn x(&self) -> N {
        self.x
    }

    fn y(&self) -> N {
        self.y
    }
}
