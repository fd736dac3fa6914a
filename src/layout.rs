use derive_more::{Deref, DerefMut, Display};
use serde::{Deserialize, Serialize};

/// Edge length of one tile along the height dimension.
pub const TILE_HEIGHT: usize = 32;
/// Edge length of one tile along the width dimension.
pub const TILE_WIDTH: usize = 32;

/// Rounds `value` up to the next multiple of 32.
#[inline]
pub const fn nearest_32(value: usize) -> usize {
    nearest_multiple(value, 32)
}

/// Rounds `value` up to the next multiple of `multiple`.
#[inline]
pub const fn nearest_multiple(value: usize, multiple: usize) -> usize {
    value.div_ceil(multiple) * multiple
}

/// Logical shape of a rank-4 tensor.
///
/// Dimensions are ordered `[batch, channels, height, width]` for
/// activations and `[out_channels, in_channels, kernel_h, kernel_w]` for
/// convolution weights.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Deref, DerefMut, Serialize, Deserialize,
)]
pub struct Shape(pub [usize; 4]);

impl Shape {
    /// Total number of elements.
    #[inline]
    pub fn size(&self) -> usize {
        self.0.iter().product()
    }

    #[inline]
    pub fn h(&self) -> usize {
        self.0[2]
    }

    #[inline]
    pub fn w(&self) -> usize {
        self.0[3]
    }

    /// Whether the last two dimensions are multiples of the tile edge.
    #[inline]
    pub fn is_tile_aligned(&self) -> bool {
        self.h() % TILE_HEIGHT == 0 && self.w() % TILE_WIDTH == 0
    }

    /// Row-major linear index of a logical position.
    #[inline]
    pub fn index(&self, [n, c, y, x]: [usize; 4]) -> usize {
        ((n * self.0[1] + c) * self.0[2] + y) * self.0[3] + x
    }

    /// Whether a region of this shape placed at `start` fits inside `outer`.
    #[inline]
    pub fn fits(&self, outer: &Shape, start: [usize; 4]) -> bool {
        self.0
            .iter()
            .zip(outer.0.iter())
            .zip(start.iter())
            .all(|((&dim, &outer), &start)| start + dim <= outer)
    }
}

impl From<[usize; 4]> for Shape {
    fn from(value: [usize; 4]) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [n, c, h, w] = self.0;
        write!(f, "[{n}, {c}, {h}, {w}]")
    }
}

/// Physical storage arrangement of tensor data.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize,
)]
pub enum Layout {
    /// Plain row-major storage over the logical shape.
    #[default]
    RowMajor,
    /// 32×32 tile-grid storage over the last two dimensions.
    Tile,
}

#[cfg(test)]
mod tests {
    use super::{Shape, nearest_32, nearest_multiple};

    #[test]
    fn test_nearest_32() {
        for k in 0..256 {
            assert_eq!(nearest_32(k), k.div_ceil(32) * 32);
        }
        // idempotent on multiples of 32
        assert_eq!(nearest_32(64), 64);
        assert_eq!(nearest_32(nearest_32(100)), nearest_32(100));
    }

    #[test]
    fn test_nearest_multiple() {
        assert_eq!(nearest_multiple(1, 128), 128);
        assert_eq!(nearest_multiple(129, 128), 256);
        // the 224×224 convolution head rounds to itself
        assert_eq!(nearest_multiple(224 * 224, 128), 50176);
        assert_eq!(nearest_multiple(64, 128), 128);
    }

    #[test]
    fn test_tile_aligned() {
        assert!(Shape([7, 14, 32, 160]).is_tile_aligned());
        assert!(!Shape([1, 3, 224, 30]).is_tile_aligned());
        assert!(!Shape([1, 3, 30, 224]).is_tile_aligned());
    }

    #[test]
    fn test_index() {
        let shape = Shape([2, 3, 4, 5]);
        assert_eq!(shape.index([0, 0, 0, 0]), 0);
        assert_eq!(shape.index([0, 0, 1, 0]), 5);
        assert_eq!(shape.index([0, 1, 0, 0]), 20);
        assert_eq!(shape.index([1, 2, 3, 4]), shape.size() - 1);
    }
}
