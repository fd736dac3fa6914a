use super::Cpu;
use crate::{
    device::{DeviceError, DeviceTensor},
    layout::Layout,
    num::Float,
};

fn check_vector<T: Float>(
    tensor: &DeviceTensor<Cpu>,
    vector: &DeviceTensor<Cpu>,
) -> Result<Vec<T>, DeviceError> {
    if vector.layout() != Layout::RowMajor {
        return Err(DeviceError::Layout(Layout::RowMajor, "layer_norm"));
    }
    if vector.data_type() != tensor.data_type() {
        return Err(DeviceError::Type(vector.data_type(), "layer_norm"));
    }
    let [n, c, h, w] = *vector.shape();
    if [n, c, h] != [1, 1, 1] || w != tensor.shape().w() {
        return Err(DeviceError::Shape(tensor.shape(), vector.shape()));
    }
    Ok(vector.read_vec::<T>())
}

pub(super) fn layer_norm<T: Float>(
    device: &Cpu,
    tensor: &DeviceTensor<Cpu>,
    weight: Option<&DeviceTensor<Cpu>>,
    bias: Option<&DeviceTensor<Cpu>>,
    eps: f32,
) -> Result<DeviceTensor<Cpu>, DeviceError> {
    if tensor.layout() != Layout::RowMajor {
        return Err(DeviceError::Layout(Layout::RowMajor, "layer_norm"));
    }
    let shape = tensor.shape();
    let w = shape.w();

    let weight = weight.map(|x| check_vector::<T>(tensor, x)).transpose()?;
    let bias = bias.map(|x| check_vector::<T>(tensor, x)).transpose()?;

    let data = tensor.read_vec::<T>();
    let out: Vec<T> = data
        .chunks_exact(w)
        .flat_map(|row| {
            let (mean, m2, count) =
                row.iter()
                    .fold((0.0f32, 0.0f32, 0u32), |(mean, m2, count), &x| {
                        let x = x.to_f32();
                        let count = count + 1;
                        let delta = x - mean;
                        let mean = mean + delta / count as f32;
                        let m2 = m2 + delta * (x - mean);
                        (mean, m2, count)
                    });
            let variance = m2 / count as f32 + eps;
            let deviation = 1.0 / variance.sqrt();
            let weight = weight.as_deref();
            let bias = bias.as_deref();
            row.iter().enumerate().map(move |(i, &x)| {
                let value = (x.to_f32() - mean) * deviation;
                let value = match weight {
                    Some(weight) => value * weight[i].to_f32(),
                    None => value,
                };
                let value = match bias {
                    Some(bias) => value + bias[i].to_f32(),
                    None => value,
                };
                T::from_f32(value)
            })
        })
        .collect();

    let bytes = bytemuck::cast_slice(&out).to_vec();
    DeviceTensor::from_bytes(
        device,
        bytes,
        shape,
        Layout::RowMajor,
        tensor.data_type(),
        tensor.memory(),
    )
}
