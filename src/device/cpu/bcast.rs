use super::Cpu;
use crate::{
    device::{BcastDim, BcastOp, DeviceError, DeviceTensor},
    layout::Layout,
    num::Float,
};

pub(super) fn bcast<T: Float>(
    device: &Cpu,
    lhs: &DeviceTensor<Cpu>,
    rhs: &DeviceTensor<Cpu>,
    op: BcastOp,
    dim: BcastDim,
) -> Result<DeviceTensor<Cpu>, DeviceError> {
    if lhs.layout() != Layout::RowMajor || rhs.layout() != Layout::RowMajor {
        return Err(DeviceError::Layout(Layout::RowMajor, "bcast"));
    }
    if lhs.data_type() != rhs.data_type() {
        return Err(DeviceError::Type(rhs.data_type(), "bcast"));
    }

    let shape = lhs.shape();
    let [n, c, h, w] = *shape;
    let [rn, rc, rh, rw] = *rhs.shape();
    let compatible = match dim {
        // the broadcast row may be narrower than the output; missing
        // columns behave as zero-padding
        BcastDim::H => rn == n && rc == c && rh == 1 && rw <= w,
        BcastDim::W => rn == n && rc == c && rw == 1 && rh == h,
    };
    if !compatible {
        return Err(DeviceError::Shape(shape, rhs.shape()));
    }

    let a = lhs.read_vec::<T>();
    let b = rhs.read_vec::<T>();
    let rhs_shape = rhs.shape();

    let mut out = vec![T::zero(); shape.size()];
    for (bb, ch, y, x) in itertools::iproduct!(0..n, 0..c, 0..h, 0..w) {
        let lhs_value = a[shape.index([bb, ch, y, x])].to_f32();
        let rhs_value = match dim {
            BcastDim::H if x < rw => b[rhs_shape.index([bb, ch, 0, x])].to_f32(),
            BcastDim::H => 0.0,
            BcastDim::W => b[rhs_shape.index([bb, ch, y, 0])].to_f32(),
        };
        let value = match op {
            BcastOp::Add => lhs_value + rhs_value,
            BcastOp::Sub => lhs_value - rhs_value,
            BcastOp::Mul => lhs_value * rhs_value,
        };
        out[shape.index([bb, ch, y, x])] = T::from_f32(value);
    }

    let bytes = bytemuck::cast_slice(&out).to_vec();
    DeviceTensor::from_bytes(
        device,
        bytes,
        shape,
        Layout::RowMajor,
        lhs.data_type(),
        lhs.memory(),
    )
}

#[cfg(test)]
mod tests {
    use half::bf16;
    use itertools::Itertools;

    use crate::{
        device::{BcastDim, BcastOp, Cpu, Device, DeviceError, MemoryConfig},
        layout::{Layout, Shape},
        tensor::Tensor,
    };

    /// A bias row shorter than the output width is zero-extended: every
    /// output row gains `bias[j]` for `j` within the bias and nothing
    /// beyond it.
    #[test]
    fn test_bcast_add_rows() -> Result<(), DeviceError> {
        fastrand::seed(42);

        let cpu = Cpu::new();
        let shape = Shape([1, 1, 64, 128]);
        let data = (0..shape.size())
            .map(|_| bf16::from_f32(fastrand::f32() - 0.5))
            .collect_vec();
        let lhs = Tensor::new(data.clone(), shape, Layout::RowMajor)?;
        let lhs = cpu.upload(&lhs, MemoryConfig::default())?;

        let bias = (0..64)
            .map(|_| bf16::from_f32(fastrand::f32() - 0.5))
            .collect_vec();
        let rhs = Tensor::new(bias.clone(), [1, 1, 1, 64], Layout::RowMajor)?;
        let rhs = cpu.upload(&rhs, MemoryConfig::default())?;

        let sum = cpu.bcast(&lhs, &rhs, BcastOp::Add, BcastDim::H)?;
        let sum: Tensor<bf16> = sum.to_host()?;
        for (i, j) in itertools::iproduct!(0..64, 0..128) {
            let expected = match j < 64 {
                true => data[shape.index([0, 0, i, j])] + bias[j],
                false => data[shape.index([0, 0, i, j])],
            };
            assert_eq!(sum.data()[shape.index([0, 0, i, j])], expected);
        }
        Ok(())
    }

    #[test]
    fn test_bcast_mul_cols() -> Result<(), DeviceError> {
        let cpu = Cpu::new();
        let data = (0..12).map(|x| bf16::from_f32(x as f32)).collect_vec();
        let lhs = Tensor::new(data.clone(), [1, 1, 3, 4], Layout::RowMajor)?;
        let lhs = cpu.upload(&lhs, MemoryConfig::default())?;

        let scale = vec![
            bf16::from_f32(1.0),
            bf16::from_f32(2.0),
            bf16::from_f32(-1.0),
        ];
        let rhs = Tensor::new(scale.clone(), [1, 1, 3, 1], Layout::RowMajor)?;
        let rhs = cpu.upload(&rhs, MemoryConfig::default())?;

        let product = cpu.bcast(&lhs, &rhs, BcastOp::Mul, BcastDim::W)?;
        let product: Tensor<bf16> = product.to_host()?;
        for (y, x) in itertools::iproduct!(0..3usize, 0..4usize) {
            assert_eq!(
                product.data()[y * 4 + x],
                data[y * 4 + x] * scale[y]
            );
        }
        Ok(())
    }

    #[test]
    fn test_bcast_shape_mismatch() -> Result<(), DeviceError> {
        let cpu = Cpu::new();
        let lhs = cpu.upload(&Tensor::<bf16>::zeros([1, 1, 4, 8]), MemoryConfig::default())?;
        let rhs = cpu.upload(&Tensor::<bf16>::zeros([1, 1, 2, 8]), MemoryConfig::default())?;
        let result = cpu.bcast(&lhs, &rhs, BcastOp::Add, BcastDim::H);
        assert!(matches!(result, Err(DeviceError::Shape(..))));
        Ok(())
    }
}
