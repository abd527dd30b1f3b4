//! Geometry

mod point3;
mod vector3;

pub use point3::*;
pub use vector3::*;

/// Trait to support dot product of two vector-like types.
pub trait Dot<Rhs> {
    /// Scalar type of the product.
    type Output;

    /// Returns the dot product.
    ///
    /// * `other` - The other vector.
    fn dot(&self, other: &Rhs) -> Self::Output;
}
