use super::Cpu;
use crate::{
    convert,
    device::{BlockConfig, ConvGeometry, Device, DeviceError, DeviceTensor},
    layout::{Layout, Shape, TILE_HEIGHT, nearest_multiple},
    num::Float,
    tensor::Tensor,
};

/// Reference execution of the fused convolution primitive.
///
/// Materializes the im2col activation matrix and multiplies it against
/// the un-tiled weight matrix, accumulating in `f32`. The block sizes
/// determine the zero-padded output extent; the sweep order the hardware
/// would use to cover those blocks does not affect values and is not
/// modeled.
pub(super) fn conv<T: Float>(
    device: &Cpu,
    activation: &DeviceTensor<Cpu>,
    weight: &DeviceTensor<Cpu>,
    geometry: ConvGeometry,
    blocks: BlockConfig,
) -> Result<DeviceTensor<Cpu>, DeviceError> {
    if activation.layout() != Layout::RowMajor {
        return Err(DeviceError::Layout(Layout::RowMajor, "conv"));
    }
    if weight.layout() != Layout::Tile {
        return Err(DeviceError::Layout(Layout::Tile, "conv"));
    }
    let [n, c, h, w] = *activation.shape();
    if n != 1 {
        return Err(DeviceError::Batch(n));
    }
    if !geometry.fits(h, w) {
        return Err(DeviceError::Shape(activation.shape(), weight.shape()));
    }

    let [r, s] = geometry.kernel;
    let [u, v] = geometry.stride;
    let [p_h, p_w] = geometry.padding;
    let (oh, ow) = geometry.output_dims(h, w);

    // the tiled weight is a pure rearrangement; undo it to index the matrix
    let weight_matrix = convert::untilize(&device.download::<T>(weight)?)?;
    let [_, _, rows, cols] = *weight_matrix.shape();
    let taps = c * r * s;
    if taps > rows {
        return Err(DeviceError::Shape(activation.shape(), weight.shape()));
    }

    let out_rows = nearest_multiple(oh * ow, TILE_HEIGHT * blocks.act_block_h);
    let out_shape = Shape([1, 1, out_rows, cols]);

    let act = activation.read_vec::<T>();
    let act_shape = activation.shape();

    // im2col: one row per output position, one column per (c, r, s) tap
    let mut im2col = vec![0.0f32; oh * ow * taps];
    for (oy, ox) in itertools::iproduct!(0..oh, 0..ow) {
        let row = oy * ow + ox;
        for (cc, rr, ss) in itertools::iproduct!(0..c, 0..r, 0..s) {
            let iy = (oy * u + rr) as isize - p_h as isize;
            let ix = (ox * v + ss) as isize - p_w as isize;
            if iy < 0 || ix < 0 || iy >= h as isize || ix >= w as isize {
                continue;
            }
            let src = act_shape.index([0, cc, iy as usize, ix as usize]);
            im2col[row * taps + (cc * r + rr) * s + ss] = act[src].to_f32();
        }
    }

    let wm = weight_matrix.data();
    let wm_shape = weight_matrix.shape();

    #[cfg(not(feature = "rayon"))]
    let out: Vec<T> = {
        let mut out = vec![T::zero(); out_shape.size()];
        for (row, k) in itertools::iproduct!(0..oh * ow, 0..cols) {
            let mut sum = 0.0f32;
            for t in 0..taps {
                let value = wm[wm_shape.index([0, 0, t, k])].to_f32();
                sum += im2col[row * taps + t] * value;
            }
            out[out_shape.index([0, 0, row, k])] = T::from_f32(sum);
        }
        out
    };
    #[cfg(feature = "rayon")]
    let out: Vec<T> = {
        use rayon::prelude::*;

        let im2col = im2col.as_slice();
        (0..out_rows)
            .into_par_iter()
            .flat_map_iter(|row| {
                (0..cols).map(move |k| {
                    if row >= oh * ow {
                        return T::zero();
                    }
                    let mut sum = 0.0f32;
                    for t in 0..taps {
                        let value = wm[wm_shape.index([0, 0, t, k])].to_f32();
                        sum += im2col[row * taps + t] * value;
                    }
                    T::from_f32(sum)
                })
            })
            .collect()
    };

    let bytes = bytemuck::cast_slice(&out).to_vec();
    DeviceTensor::from_bytes(
        device,
        bytes,
        out_shape,
        Layout::RowMajor,
        activation.data_type(),
        activation.memory(),
    )
}

#[cfg(test)]
mod tests {
    use half::bf16;
    use itertools::Itertools;

    use crate::{
        convert,
        device::{BlockConfig, ConvGeometry, Cpu, Device, DeviceError, MemoryConfig},
        layout::{Layout, Shape},
        tensor::Tensor,
    };

    /// A 1×1 identity kernel reproduces the activation, row by row.
    #[test]
    fn test_conv_identity() -> Result<(), DeviceError> {
        fastrand::seed(42);

        let cpu = Cpu::new();
        let act_shape = Shape([1, 1, 32, 32]);
        let act_data = (0..act_shape.size())
            .map(|_| bf16::from_f32(fastrand::f32() - 0.5))
            .collect_vec();
        let act = Tensor::new(act_data.clone(), act_shape, Layout::RowMajor)?;
        let act = cpu.upload(&act, MemoryConfig::default())?;

        // channel-padded [32, 32, 1, 1] weight with a single 1 at [0, 0, 0, 0]
        let mut weight_data = vec![bf16::ZERO; 32 * 32];
        weight_data[0] = bf16::ONE;
        let weight = Tensor::new(weight_data, [32, 32, 1, 1], Layout::RowMajor)?;
        let weight = convert::conv_weight_to_tiled(&weight, 4, 4)?;
        let weight = cpu.upload(&weight, MemoryConfig::default())?;

        let geometry = ConvGeometry {
            kernel: [1, 1],
            stride: [1, 1],
            padding: [0, 0],
        };
        let output = cpu.conv(&act, &weight, geometry, BlockConfig::default())?;
        assert_eq!(output.shape(), Shape([1, 1, 1024, 128]));

        let output: Tensor<bf16> = output.to_host()?;
        for (y, x) in itertools::iproduct!(0..32, 0..32) {
            let row = y * 32 + x;
            assert_eq!(
                output.data()[output.shape().index([0, 0, row, 0])],
                act_data[act_shape.index([0, 0, y, x])]
            );
            // columns beyond the single output channel are zero
            assert_eq!(
                output.data()[output.shape().index([0, 0, row, 1])],
                bf16::ZERO
            );
        }
        Ok(())
    }

    #[test]
    fn test_conv_rejects_batch() -> Result<(), DeviceError> {
        let cpu = Cpu::new();
        let act = Tensor::<bf16>::zeros([2, 1, 8, 8]);
        let act = cpu.upload(&act, MemoryConfig::default())?;

        let weight = Tensor::<bf16>::zeros([32, 32, 1, 1]);
        let weight = convert::conv_weight_to_tiled(&weight, 4, 4)?;
        let weight = cpu.upload(&weight, MemoryConfig::default())?;

        let geometry = ConvGeometry {
            kernel: [1, 1],
            stride: [1, 1],
            padding: [0, 0],
        };
        let output = cpu.conv(&act, &weight, geometry, BlockConfig::default());
        assert!(matches!(output, Err(DeviceError::Batch(2))));
        Ok(())
    }
}
