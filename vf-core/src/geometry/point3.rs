//! 3-D Points

use super::Vector3;
use crate::common::{absolute_fuzzy_equal, Float};
use num_traits::Num;
use std::ops::{Add, Index, Sub};

/// A 3-D point containing numeric values.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Point3<T> {
    /// X-coordinate.
    pub x: T,

    /// Y-coordinate.
    pub y: T,

    /// Z-coordinate.
    pub z: T,
}

/// 3-D point containing `Float` values.
pub type Point3f = Point3<Float>;

impl Point3f {
    /// Origin.
    pub const ORIGIN: Self = Self { x: 0.0, y: 0.0, z: 0.0 };

    /// Returns true if this point equals `other` within the absolute
    /// tolerance `tol` in every coordinate.
    ///
    /// * `other` - The other point.
    /// * `tol`   - Absolute tolerance.
    pub fn fuzzy_equal(&self, other: &Self, tol: Float) -> bool {
        absolute_fuzzy_equal(self.x, other.x, tol)
            && absolute_fuzzy_equal(self.y, other.y, tol)
            && absolute_fuzzy_equal(self.z, other.z, tol)
    }
}

impl<T: Num> Point3<T> {
    /// Creates a new 3-D point.
    ///
    /// * `x` - X-coordinate.
    /// * `y` - Y-coordinate.
    /// * `z` - Z-coordinate.
    pub fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }

    /// Returns the distance to another point.
    ///
    /// * `other` - The other point.
    pub fn distance(&self, other: &Self) -> T
    where
        T: num_traits::Float,
    {
        (*self - *other).length()
    }
}

impl<T: Num> Add<Vector3<T>> for Point3<T> {
    type Output = Self;

    /// Offsets the point by the given vector.
    ///
    /// * `v` - The displacement vector.
    fn add(self, v: Vector3<T>) -> Self::Output {
        Self::Output::new(self.x + v.x, self.y + v.y, self.z + v.z)
    }
}

impl<T: Num> Sub for Point3<T> {
    type Output = Vector3<T>;

    /// Returns the displacement vector from `other` to this point.
    ///
    /// * `other` - The other point.
    fn sub(self, other: Self) -> Self::Output {
        Self::Output::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl<T> Index<usize> for Point3<T> {
    type Output = T;

    /// Index the point by 0, 1, 2 to get the immutable coordinate value.
    ///
    /// * `i` - The coordinate index.
    fn index(&self, i: usize) -> &Self::Output {
        match i {
            0 => &self.x,
            1 => &self.y,
            2 => &self.z,
            _ => panic!("coordinate index {i} out of range"),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Vector3f;

    #[test]
    fn point_vector_arithmetic() {
        let p = Point3f::new(1.0, 2.0, 3.0);
        let v = Vector3f::new(0.5, -1.0, 2.0);
        assert_eq!(p + v, Point3f::new(1.5, 1.0, 5.0));
        assert_eq!((p + v) - p, v);
    }

    #[test]
    fn distance() {
        let p1 = Point3f::new(0.0, 0.0, 0.0);
        let p2 = Point3f::new(3.0, 4.0, 0.0);
        assert_eq!(p1.distance(&p2), 5.0);
    }

    #[test]
    fn fuzzy_equal() {
        let p1 = Point3f::new(1.0, 1.0, 0.0);
        let p2 = Point3f::new(1.0 + 1e-12, 1.0 - 1e-12, 0.0);
        assert!(p1.fuzzy_equal(&p2, 1e-9));
        assert!(!p1.fuzzy_equal(&Point3f::new(1.1, 1.0, 0.0), 1e-9));
    }
}
