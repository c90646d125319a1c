//! Simple math utilities: a small three-dimensional vector type,
//! transform and partition counting, and compensated summation.

use std::convert::TryFrom;
use std::ops::{Add, Mul};

/// Simple three-dimensional vector of any numerical type.
/// Supports only few mathematical operations
/// as this is used mainly as data struct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Vec3<T>(pub T, pub T, pub T);

impl<T> Vec3<T> {
    /// The first component of this 3D vector.
    #[inline]
    pub fn x(self) -> T where T: Copy { self.0 }

    /// The second component of this 3D vector.
    #[inline]
    pub fn y(self) -> T where T: Copy { self.1 }

    /// The third component of this 3D vector.
    #[inline]
    pub fn z(self) -> T where T: Copy { self.2 }

    /// Returns the vector with the minimum of the respective coordinates.
    pub fn min(self, other: Self) -> Self where T: Ord {
        Vec3(
            std::cmp::min(self.0, other.0),
            std::cmp::min(self.1, other.1),
            std::cmp::min(self.2, other.2),
        )
    }

    /// Try to convert all components of this vector to a new type,
    /// yielding either a vector of that new type, or an error.
    pub fn try_from<S>(value: Vec3<S>) -> std::result::Result<Self, T::Error> where T: TryFrom<S> {
        let x = T::try_from(value.0)?;
        let y = T::try_from(value.1)?;
        let z = T::try_from(value.2)?;
        Ok(Vec3(x, y, z))
    }

    /// Seeing this vector as a dimension or size (width, height and depth),
    /// this returns the number of elements that these dimensions contain.
    #[inline]
    pub fn volume(self) -> T where T: Mul<T, Output = T> + Copy {
        self.0 * self.1 * self.2
    }
}

impl Vec3<usize> {
    /// Convert this three-dimensional coordinate to an index suited for
    /// one-dimensional flattened volume arrays, with the first coordinate
    /// varying fastest and the third varying slowest.
    /// In debug mode, panics for an index out of bounds.
    #[inline]
    pub fn flat_index_for_size(self, resolution: Vec3<usize>) -> usize {
        debug_assert!(
            self.x() < resolution.x() && self.y() < resolution.y() && self.z() < resolution.z(),
            "Vec3 index {:?} is invalid for resolution {:?}", self, resolution
        );

        let Vec3(x, y, z) = self;
        (z * resolution.y() + y) * resolution.x() + x
    }
}

impl<T: Add<T>> Add<Vec3<T>> for Vec3<T> {
    type Output = Vec3<T::Output>;
    fn add(self, other: Vec3<T>) -> Self::Output {
        Vec3(self.0 + other.0, self.1 + other.1, self.2 + other.2)
    }
}

impl<T> From<(T, T, T)> for Vec3<T> {
    fn from((x, y, z): (T, T, T)) -> Self { Vec3(x, y, z) }
}

impl<T> From<Vec3<T>> for (T, T, T) {
    fn from(vec: Vec3<T>) -> Self { (vec.0, vec.1, vec.2) }
}

/// Number of wavelet transform levels supported by a signal of this length.
/// Eight samples is the minimal length for one level of transform.
pub fn num_xforms(len: usize) -> usize {
    assert!(len > 0);
    let f = (len as f32 / 8.0).log2();
    if f < 0.0 { 0 } else { f as usize + 1 }
}

/// How many times a length can be halved (larger half kept)
/// until it reaches one.
pub fn num_partitions(mut len: usize) -> usize {
    let mut parts = 0;
    while len > 1 {
        parts += 1;
        len -= len / 2;
    }
    parts
}

/// The approximation (low-pass) length that remains
/// after `levels` halvings of a signal of length `len`.
pub fn approx_len(len: usize, levels: usize) -> usize {
    let (approx, _) = approx_detail_len(len, levels);
    approx
}

/// The approximation and detail lengths after `levels` halvings:
/// each halving keeps `ceil(n/2)` low-pass and `floor(n/2)` high-pass samples.
pub fn approx_detail_len(len: usize, levels: usize) -> (usize, usize) {
    let mut low = len;
    let mut high = 0;
    for _ in 0 .. levels {
        let new_low = (low + 1) / 2;
        high = low - new_low;
        low = new_low;
    }
    (low, high)
}

/// Compensated (Kahan) summation over a slice.
/// The correction term keeps cancellation from discarding low-order bits.
pub fn kahan_sum(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut correction = 0.0;

    for &value in values {
        let y = value - correction;
        let t = sum + y;
        correction = (t - sum) - y;
        sum = t;
    }

    sum
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flat_index() {
        let size = Vec3(4, 3, 2);
        assert_eq!(Vec3(0, 0, 0).flat_index_for_size(size), 0);
        assert_eq!(Vec3(3, 0, 0).flat_index_for_size(size), 3);
        assert_eq!(Vec3(0, 1, 0).flat_index_for_size(size), 4);
        assert_eq!(Vec3(0, 0, 1).flat_index_for_size(size), 12);
        assert_eq!(Vec3(3, 2, 1).flat_index_for_size(size), 23);
    }

    #[test]
    fn transform_levels() {
        assert_eq!(num_xforms(1), 0);
        assert_eq!(num_xforms(7), 0);
        assert_eq!(num_xforms(8), 1);
        assert_eq!(num_xforms(9), 1);
        assert_eq!(num_xforms(16), 2);
        assert_eq!(num_xforms(17), 2);
        assert_eq!(num_xforms(64), 4);
        assert_eq!(num_xforms(128), 5);
    }

    #[test]
    fn partition_count() {
        assert_eq!(num_partitions(1), 0);
        assert_eq!(num_partitions(2), 1);
        assert_eq!(num_partitions(3), 2);
        assert_eq!(num_partitions(4), 2);
        assert_eq!(num_partitions(17), 5);
        assert_eq!(num_partitions(64), 6);
        assert_eq!(num_partitions(128), 7);
    }

    #[test]
    fn approx_lengths() {
        assert_eq!(approx_detail_len(17, 0), (17, 0));
        assert_eq!(approx_detail_len(17, 1), (9, 8));
        assert_eq!(approx_detail_len(17, 2), (5, 4));
        assert_eq!(approx_detail_len(8, 1), (4, 4));
        assert_eq!(approx_len(128, 5), 4);
    }

    #[test]
    fn kahan_alternating_magnitudes() {
        // pairs of (large, tiny) values whose naive sum drifts
        let mut values = Vec::with_capacity(10_000_000);
        for index in 0 .. 5_000_000_u64 {
            values.push(1.0e10);
            values.push(if index % 2 == 0 { 1.0e-10 } else { -1.0e-10 });
        }

        let sum = kahan_sum(&values);
        let exact: f64 = 5.0e16;
        let ulp = exact.to_bits();
        let got = sum.to_bits();
        let distance = if ulp > got { ulp - got } else { got - ulp };
        assert!(distance <= 2, "kahan sum was {} ulps away from the exact result", distance);
    }
}
