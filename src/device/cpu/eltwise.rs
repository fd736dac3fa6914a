use super::Cpu;
use crate::{
    device::{DeviceError, DeviceTensor},
    num::Float,
};

pub(super) fn relu<T: Float>(
    device: &Cpu,
    tensor: &DeviceTensor<Cpu>,
) -> Result<DeviceTensor<Cpu>, DeviceError> {
    let data = tensor.read_vec::<T>();
    let out: Vec<T> = data
        .into_iter()
        .map(|x| T::from_f32(x.to_f32().max(0.0)))
        .collect();
    let bytes = bytemuck::cast_slice(&out).to_vec();
    DeviceTensor::from_bytes(
        device,
        bytes,
        tensor.shape(),
        tensor.layout(),
        tensor.data_type(),
        tensor.memory(),
    )
}
