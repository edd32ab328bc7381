use bytemuck::{Pod, Zeroable};

use crate::dot::{Dot, DIM};

/// Axis-aligned bounding box of a dot set.
///
/// An empty set is represented by `min = +inf`, `max = -inf` on every axis, which is
/// the neutral element of [`BoundingBox::merge`].
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct BoundingBox {
    pub min: [f64; DIM],
    pub max: [f64; DIM],
}

impl BoundingBox {
    pub fn new(min: [f64; DIM], max: [f64; DIM]) -> Self {
        Self { min, max }
    }

    /// The neutral box, contributed by processes that own no dots.
    pub fn empty() -> Self {
        Self {
            min: [f64::INFINITY; DIM],
            max: [f64::NEG_INFINITY; DIM],
        }
    }

    /// Tight box around the given dots.
    pub fn from_dots(dots: &[Dot]) -> Self {
        let mut b = Self::empty();
        for dot in dots {
            b.include(&dot.coords);
        }
        b
    }

    pub fn include(&mut self, point: &[f64; DIM]) {
        for i in 0..DIM {
            if point[i] < self.min[i] { self.min[i] = point[i]; }
            if point[i] > self.max[i] { self.max[i] = point[i]; }
        }
    }

    /// Component-wise min of `min` and max of `max`.
    ///
    /// Associative and commutative, so it can be applied pairwise in any order as a
    /// reduction operator across a process group.
    pub fn merge(&self, other: &BoundingBox) -> BoundingBox {
        let mut out = *self;
        for i in 0..DIM {
            if other.min[i] < out.min[i] { out.min[i] = other.min[i]; }
            if other.max[i] > out.max[i] { out.max[i] = other.max[i]; }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        (0..DIM).any(|i| self.min[i] > self.max[i])
    }

    pub fn extent(&self, axis: usize) -> f64 {
        self.max[axis] - self.min[axis]
    }

    pub fn contains(&self, point: &[f64; DIM]) -> bool {
        (0..DIM).all(|i| point[i] >= self.min[i] && point[i] <= self.max[i])
    }

    /// Copy of this box with the `max` (low side) or `min` (high side) of `axis` moved to `cut`.
    pub fn shrunk(&self, axis: usize, cut: f64, high_side: bool) -> BoundingBox {
        let mut out = *self;
        if high_side {
            out.min[axis] = cut;
        } else {
            out.max[axis] = cut;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_is_commutative_and_neutral() {
        let a = BoundingBox::new([0.0, -1.0, 2.0], [1.0, 3.0, 4.0]);
        let b = BoundingBox::new([-2.0, 0.0, 3.0], [0.5, 5.0, 3.5]);
        assert_eq!(a.merge(&b), b.merge(&a));
        assert_eq!(a.merge(&BoundingBox::empty()), a);
        assert_eq!(BoundingBox::empty().merge(&a), a);

        let m = a.merge(&b);
        assert_eq!(m.min, [-2.0, -1.0, 2.0]);
        assert_eq!(m.max, [1.0, 5.0, 4.0]);
    }

    #[test]
    fn test_empty_box() {
        let e = BoundingBox::empty();
        assert!(e.is_empty());
        assert!(BoundingBox::from_dots(&[]).is_empty());
        let b = BoundingBox::new([0.0; 3], [0.0; 3]);
        assert!(!b.is_empty());
        assert!(b.contains(&[0.0, 0.0, 0.0]));
    }

    #[test]
    fn test_shrunk_children_share_only_the_cut_plane() {
        let b = BoundingBox::new([0.0; 3], [10.0, 4.0, 2.0]);
        let lo = b.shrunk(0, 3.0, false);
        let hi = b.shrunk(0, 3.0, true);
        assert_eq!(lo.max[0], 3.0);
        assert_eq!(hi.min[0], 3.0);
        assert_eq!(lo.min, b.min);
        assert_eq!(hi.max, b.max);
    }
}
