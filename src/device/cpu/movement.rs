use super::Cpu;
use crate::{
    convert,
    device::{Device, DeviceError, DeviceTensor},
    layout::{Layout, Shape},
    num::Float,
    tensor::Tensor,
};

pub(super) fn tilize<T: Float>(
    device: &Cpu,
    tensor: &DeviceTensor<Cpu>,
) -> Result<DeviceTensor<Cpu>, DeviceError> {
    let host: Tensor<T> = device.download(tensor)?;
    let tiled = convert::tilize(&host)?;
    device.upload(&tiled, tensor.memory())
}

pub(super) fn untilize<T: Float>(
    device: &Cpu,
    tensor: &DeviceTensor<Cpu>,
) -> Result<DeviceTensor<Cpu>, DeviceError> {
    let host: Tensor<T> = device.download(tensor)?;
    let untiled = convert::untilize(&host)?;
    device.upload(&untiled, tensor.memory())
}

pub(super) fn transpose<T: Float>(
    device: &Cpu,
    tensor: &DeviceTensor<Cpu>,
    dim0: usize,
    dim1: usize,
) -> Result<DeviceTensor<Cpu>, DeviceError> {
    if tensor.layout() != Layout::RowMajor {
        return Err(DeviceError::Layout(Layout::RowMajor, "transpose"));
    }
    if dim0 >= 4 {
        return Err(DeviceError::Dim(dim0));
    }
    if dim1 >= 4 {
        return Err(DeviceError::Dim(dim1));
    }

    let shape = tensor.shape();
    let mut out_dims = *shape;
    out_dims.swap(dim0, dim1);
    let out_shape = Shape(out_dims);

    let data = tensor.read_vec::<T>();
    let mut out = vec![T::zero(); data.len()];
    let [n, c, h, w] = *shape;
    for (b, ch, y, x) in itertools::iproduct!(0..n, 0..c, 0..h, 0..w) {
        let mut dst = [b, ch, y, x];
        dst.swap(dim0, dim1);
        out[out_shape.index(dst)] = data[shape.index([b, ch, y, x])];
    }

    let bytes = bytemuck::cast_slice(&out).to_vec();
    DeviceTensor::from_bytes(
        device,
        bytes,
        out_shape,
        Layout::RowMajor,
        tensor.data_type(),
        tensor.memory(),
    )
}
