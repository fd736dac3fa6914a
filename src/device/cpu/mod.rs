//! The CPU reference device.
//!
//! Executes every contract primitive with plain host loops, widening
//! 16-bit floats to `f32` for accumulation. This is the golden
//! implementation the lowering arithmetic is validated against; it honors
//! the contract's shapes, layouts and values without modeling the
//! accelerator's on-chip scheduling.

use std::sync::Arc;

use half::bf16;

use crate::{
    device::{
        BcastDim, BcastOp, BlockConfig, ConvGeometry, Device, DeviceError, DeviceTensor,
        MemoryConfig,
    },
    num::DataType,
};

mod bcast;
mod conv;
mod eltwise;
mod movement;
mod norm;

/// The CPU reference device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Cpu;

impl Cpu {
    pub fn new() -> Self {
        Self
    }
}

/// Dispatches a kernel generic over the floating element type.
macro_rules! dispatch_float {
    ($type:expr, $name:literal, $m:ident::$f:ident, ($($arg:expr),*)) => {
        match $type {
            DataType::Bf16 => $m::$f::<bf16>($($arg),*),
            DataType::F32 => $m::$f::<f32>($($arg),*),
            r#type => Err(DeviceError::Type(r#type, $name)),
        }
    };
}

impl Device for Cpu {
    type Buffer = Arc<[u8]>;

    fn alloc(&self, contents: Vec<u8>, _memory: MemoryConfig) -> Result<Self::Buffer, DeviceError> {
        Ok(contents.into())
    }

    fn tilize(&self, tensor: &DeviceTensor<Self>) -> Result<DeviceTensor<Self>, DeviceError> {
        dispatch_float!(tensor.data_type(), "tilize", movement::tilize, (self, tensor))
    }

    fn untilize(&self, tensor: &DeviceTensor<Self>) -> Result<DeviceTensor<Self>, DeviceError> {
        dispatch_float!(
            tensor.data_type(),
            "untilize",
            movement::untilize,
            (self, tensor)
        )
    }

    fn conv(
        &self,
        activation: &DeviceTensor<Self>,
        weight: &DeviceTensor<Self>,
        geometry: ConvGeometry,
        blocks: BlockConfig,
    ) -> Result<DeviceTensor<Self>, DeviceError> {
        dispatch_float!(
            activation.data_type(),
            "conv",
            conv::conv,
            (self, activation, weight, geometry, blocks)
        )
    }

    fn bcast(
        &self,
        lhs: &DeviceTensor<Self>,
        rhs: &DeviceTensor<Self>,
        op: BcastOp,
        dim: BcastDim,
    ) -> Result<DeviceTensor<Self>, DeviceError> {
        dispatch_float!(lhs.data_type(), "bcast", bcast::bcast, (self, lhs, rhs, op, dim))
    }

    fn transpose(
        &self,
        tensor: &DeviceTensor<Self>,
        dim0: usize,
        dim1: usize,
    ) -> Result<DeviceTensor<Self>, DeviceError> {
        dispatch_float!(
            tensor.data_type(),
            "transpose",
            movement::transpose,
            (self, tensor, dim0, dim1)
        )
    }

    fn layer_norm(
        &self,
        tensor: &DeviceTensor<Self>,
        weight: Option<&DeviceTensor<Self>>,
        bias: Option<&DeviceTensor<Self>>,
        eps: f32,
    ) -> Result<DeviceTensor<Self>, DeviceError> {
        dispatch_float!(
            tensor.data_type(),
            "layer_norm",
            norm::layer_norm,
            (self, tensor, weight, bias, eps)
        )
    }

    fn relu(&self, tensor: &DeviceTensor<Self>) -> Result<DeviceTensor<Self>, DeviceError> {
        dispatch_float!(tensor.data_type(), "relu", eltwise::relu, (self, tensor))
    }
}
