//! Pure layout rearrangements between row-major and tiled storage.
//!
//! The accelerator consumes tensors as fixed-size rectangular tiles. The
//! conversions here change where each value is stored, never the value
//! itself, and every conversion has an exact inverse.

use crate::{
    layout::{Layout, Shape, TILE_HEIGHT, TILE_WIDTH, nearest_multiple},
    num::Scalar,
    tensor::{Tensor, TensorError},
};

/// Converts a row-major tensor into 32×32 tile-grid order.
///
/// Tiles cover each `[h, w]` face in row-major grid order and are
/// themselves stored row-major. The last two dimensions must be
/// tile-aligned.
pub fn tilize<T: Scalar>(tensor: &Tensor<T>) -> Result<Tensor<T>, TensorError> {
    if tensor.layout() != Layout::RowMajor {
        return Err(TensorError::Layout(Layout::RowMajor, tensor.layout()));
    }
    let shape = tensor.shape();
    if !shape.is_tile_aligned() {
        return Err(TensorError::Alignment(shape));
    }
    let [n, c, h, w] = *shape;
    let data = tensor.data();
    let mut out = vec![T::zero(); data.len()];
    let mut dst = 0;
    for (b, ch, ty, tx, y, x) in itertools::iproduct!(
        0..n,
        0..c,
        0..h / TILE_HEIGHT,
        0..w / TILE_WIDTH,
        0..TILE_HEIGHT,
        0..TILE_WIDTH
    ) {
        let src = shape.index([b, ch, ty * TILE_HEIGHT + y, tx * TILE_WIDTH + x]);
        out[dst] = data[src];
        dst += 1;
    }
    Ok(Tensor::from_parts(out, shape, Layout::Tile))
}

/// Converts a tiled tensor back to row-major order, the inverse of
/// [`tilize`].
pub fn untilize<T: Scalar>(tensor: &Tensor<T>) -> Result<Tensor<T>, TensorError> {
    if tensor.layout() != Layout::Tile {
        return Err(TensorError::Layout(Layout::Tile, tensor.layout()));
    }
    let shape = tensor.shape();
    if !shape.is_tile_aligned() {
        return Err(TensorError::Alignment(shape));
    }
    let [n, c, h, w] = *shape;
    let data = tensor.data();
    let mut out = vec![T::zero(); data.len()];
    let mut src = 0;
    for (b, ch, ty, tx, y, x) in itertools::iproduct!(
        0..n,
        0..c,
        0..h / TILE_HEIGHT,
        0..w / TILE_WIDTH,
        0..TILE_HEIGHT,
        0..TILE_WIDTH
    ) {
        let dst = shape.index([b, ch, ty * TILE_HEIGHT + y, tx * TILE_WIDTH + x]);
        out[dst] = data[src];
        src += 1;
    }
    Ok(Tensor::from_parts(out, shape, Layout::RowMajor))
}

/// Rearranges a channel-padded `[K, C, R, S]` convolution weight into the
/// tiled matrix the fused convolution primitive consumes.
///
/// The weight becomes a `[C·R·S, K]` matrix (row `c·R·S + r·S + s`,
/// column `k`), zero-padded to multiples of `32·block_h` rows and
/// `32·block_w` columns, then stored in tile-grid order.
pub fn conv_weight_to_tiled<T: Scalar>(
    tensor: &Tensor<T>,
    block_h: usize,
    block_w: usize,
) -> Result<Tensor<T>, TensorError> {
    if tensor.layout() != Layout::RowMajor {
        return Err(TensorError::Layout(Layout::RowMajor, tensor.layout()));
    }
    let [k, c, r, s] = *tensor.shape();
    let rows = nearest_multiple(c * r * s, TILE_HEIGHT * block_h);
    let cols = nearest_multiple(k, TILE_WIDTH * block_w);
    let shape = Shape([1, 1, rows, cols]);
    let mut matrix = vec![T::zero(); shape.size()];
    for (kk, cc, rr, ss) in itertools::iproduct!(0..k, 0..c, 0..r, 0..s) {
        let row = (cc * r + rr) * s + ss;
        let src = tensor.shape().index([kk, cc, rr, ss]);
        matrix[shape.index([0, 0, row, kk])] = tensor.data()[src];
    }
    tilize(&Tensor::from_parts(matrix, shape, Layout::RowMajor))
}

#[cfg(test)]
mod tests {
    use half::bf16;
    use itertools::Itertools;

    use super::{conv_weight_to_tiled, tilize, untilize};
    use crate::{
        layout::{Layout, Shape},
        tensor::{Tensor, TensorError},
    };

    #[test]
    fn test_tilize_round_trip() -> Result<(), TensorError> {
        fastrand::seed(42);

        let shape = Shape([1, 2, 64, 96]);
        let data = (0..shape.size())
            .map(|_| bf16::from_f32(fastrand::f32() * 200.0 - 100.0))
            .collect_vec();
        let tensor = Tensor::new(data.clone(), shape, Layout::RowMajor)?;

        let tiled = tilize(&tensor)?;
        assert_eq!(tiled.layout(), Layout::Tile);
        assert_eq!(tiled.shape(), shape);

        let recovered = untilize(&tiled)?;
        assert_eq!(recovered.layout(), Layout::RowMajor);
        assert_eq!(recovered.data(), &data[..]);
        Ok(())
    }

    #[test]
    fn test_tilize_order() -> Result<(), TensorError> {
        // [1, 1, 32, 64] has two tiles; the first element of the second
        // tile is logical column 32 of row 0
        let shape = Shape([1, 1, 32, 64]);
        let data = (0..shape.size()).map(|x| x as f32).collect_vec();
        let tensor = Tensor::new(data, shape, Layout::RowMajor)?;

        let tiled = tilize(&tensor)?;
        assert_eq!(tiled.data()[0], 0.0);
        assert_eq!(tiled.data()[1], 1.0);
        // row 1 of tile 0 starts after one tile row
        assert_eq!(tiled.data()[32], 64.0);
        // tile 1 starts after a full 32×32 tile
        assert_eq!(tiled.data()[32 * 32], 32.0);
        Ok(())
    }

    #[test]
    fn test_tilize_unaligned() {
        let tensor = Tensor::<bf16>::zeros([1, 3, 224, 30]);
        assert!(matches!(
            tilize(&tensor),
            Err(TensorError::Alignment(_))
        ));
    }

    #[test]
    fn test_conv_weight_matrix() -> Result<(), TensorError> {
        fastrand::seed(42);

        // a channel-padded weight, as the lowering helper produces
        let shape = Shape([32, 32, 2, 2]);
        let data = (0..shape.size())
            .map(|_| bf16::from_f32(fastrand::f32() - 0.5))
            .collect_vec();
        let weight = Tensor::new(data.clone(), shape, Layout::RowMajor)?;

        let tiled = conv_weight_to_tiled(&weight, 4, 4)?;
        assert_eq!(tiled.layout(), Layout::Tile);
        assert_eq!(tiled.shape(), Shape([1, 1, 128, 128]));

        let matrix = untilize(&tiled)?;
        for (k, c, r, s) in itertools::iproduct!(0..32, 0..32, 0..2, 0..2) {
            let row = (c * 2 + r) * 2 + s;
            let value = matrix.data()[matrix.shape().index([0, 0, row, k])];
            assert_eq!(value, data[shape.index([k, c, r, s])]);
        }
        // columns beyond the padded output channels are zero-fill
        for (row, k) in itertools::iproduct!(0..128usize, 32..128usize) {
            let value = matrix.data()[matrix.shape().index([0, 0, row, k])];
            assert_eq!(value, bf16::ZERO);
        }
        Ok(())
    }
}
