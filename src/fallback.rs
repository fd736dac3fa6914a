//! Host-side ops for layers executed off the accelerator.

use crate::{
    layout::{Layout, Shape},
    num::Float,
    tensor::{Tensor, TensorError},
};

/// Max pooling over a `[N, C, H, W]` row-major tensor.
///
/// `OH = (H - kernel_h) / stride_h + 1` with integer floor division, and
/// likewise for the width.
pub fn max_pool2d<T: Float>(
    tensor: &Tensor<T>,
    kernel: [usize; 2],
    stride: [usize; 2],
) -> Result<Tensor<T>, TensorError> {
    if tensor.layout() != Layout::RowMajor {
        return Err(TensorError::Layout(Layout::RowMajor, tensor.layout()));
    }
    let shape = tensor.shape();
    let [n, c, h, w] = *shape;
    let [kh, kw] = kernel;
    let [sh, sw] = stride;
    if kh == 0 || kw == 0 || sh == 0 || sw == 0 || kh > h || kw > w {
        return Err(TensorError::Pool(shape, kernel, stride));
    }

    let (oh, ow) = ((h - kh) / sh + 1, (w - kw) / sw + 1);
    let out_shape = Shape([n, c, oh, ow]);
    let data = tensor.data();
    let mut out = vec![T::zero(); out_shape.size()];
    for (b, ch, oy, ox) in itertools::iproduct!(0..n, 0..c, 0..oh, 0..ow) {
        let mut best = f32::NEG_INFINITY;
        for (y, x) in itertools::iproduct!(0..kh, 0..kw) {
            let value = data[shape.index([b, ch, oy * sh + y, ox * sw + x])].to_f32();
            best = best.max(value);
        }
        out[out_shape.index([b, ch, oy, ox])] = T::from_f32(best);
    }
    Ok(Tensor::from_parts(out, out_shape, Layout::RowMajor))
}
