//! Convolution lowering.
//!
//! Turns a raw weight/bias pair into a device-resident operator for the
//! accelerator's fused convolution-as-matrix-multiply primitive: weight
//! channels are zero-padded to multiples of 32, the weight is rearranged
//! into the tiled matrix layout, and both tensors move to device memory
//! once, at construction. Each invocation precomputes the output shape
//! the lowering arithmetic implies and checks the primitive against it.

use std::sync::Arc;

use half::bf16;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    convert,
    device::{
        BcastDim, BcastOp, BlockConfig, ConvGeometry, Device, DeviceError, DeviceTensor,
        MemoryConfig,
    },
    layout::{Layout, Shape, TILE_HEIGHT, TILE_WIDTH, nearest_32, nearest_multiple},
    tensor::{Tensor, TensorError},
};

#[derive(Debug, Error)]
pub enum ConvError {
    #[error("unsupported convolution: dilation {dilation}, groups {groups}")]
    Unsupported { dilation: usize, groups: usize },
    #[error("convolution stride error: stride {0:?} must be nonzero")]
    Stride([usize; 2]),
    #[error("convolution parameter error: expected 10 values, found {0}")]
    Params(usize),
    #[error("convolution weight error: expected {0} values, found {1}")]
    Weight(usize, usize),
    #[error("convolution bias error: expected {0} values, found {1}")]
    Bias(usize, usize),
    #[error("convolution activation error: shape {0} smaller than the kernel")]
    Activation(Shape),
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Convolution hyperparameters: output channels `K`, input channels `C`,
/// kernel `[R, S]`, stride `[U, V]`, padding `[P_H, P_W]`, dilation and
/// groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvParams {
    pub out_channels: usize,
    pub in_channels: usize,
    pub kernel: [usize; 2],
    pub stride: [usize; 2],
    pub padding: [usize; 2],
    pub dilation: usize,
    pub groups: usize,
}

impl ConvParams {
    /// Builds parameters from the flat 10-value form
    /// `[K, C, R, S, U, V, P_H, P_W, dilation, groups]`.
    pub fn from_slice(values: &[usize]) -> Result<Self, ConvError> {
        let &[k, c, r, s, u, v, p_h, p_w, dilation, groups] = values else {
            return Err(ConvError::Params(values.len()));
        };
        Ok(Self {
            out_channels: k,
            in_channels: c,
            kernel: [r, s],
            stride: [u, v],
            padding: [p_h, p_w],
            dilation,
            groups,
        })
    }

    /// Whether the fused primitive supports this configuration.
    #[inline]
    pub fn is_supported(&self) -> bool {
        self.dilation == 1 && self.groups == 1
    }

    /// The geometry subset handed to the fused primitive.
    #[inline]
    pub fn geometry(&self) -> ConvGeometry {
        ConvGeometry {
            kernel: self.kernel,
            stride: self.stride,
            padding: self.padding,
        }
    }

    /// Number of weight values, `K·C·R·S`.
    #[inline]
    pub fn weight_len(&self) -> usize {
        let [r, s] = self.kernel;
        self.out_channels * self.in_channels * r * s
    }
}

impl TryFrom<&[usize]> for ConvParams {
    type Error = ConvError;

    fn try_from(values: &[usize]) -> Result<Self, Self::Error> {
        Self::from_slice(values)
    }
}

/// A convolution operator bound to device-resident weight and bias.
///
/// The operator exclusively owns its device tensors; their memory is
/// released when the operator is dropped. Invocations only read them, so
/// one operator serves repeated activations without synchronization.
#[derive(Debug)]
pub struct Conv2d<D: Device> {
    weight: DeviceTensor<D>,
    bias: Option<DeviceTensor<D>>,
    params: ConvParams,
    blocks: BlockConfig,
}

impl<D: Device> Conv2d<D> {
    /// Builds the operator from flat weight values of length `K·C·R·S`
    /// and optional bias values of length `K`.
    ///
    /// Weight channels are zero-padded up to multiples of 32, the weight
    /// is converted to the tiled matrix layout and both tensors are
    /// transferred to `device` under `memory`.
    pub fn new(
        device: &D,
        weight: impl Into<Arc<[bf16]>>,
        params: ConvParams,
        bias: Option<Vec<bf16>>,
        memory: MemoryConfig,
    ) -> Result<Self, ConvError> {
        if !params.is_supported() {
            return Err(ConvError::Unsupported {
                dilation: params.dilation,
                groups: params.groups,
            });
        }
        let [u, v] = params.stride;
        if u == 0 || v == 0 {
            return Err(ConvError::Stride(params.stride));
        }
        let weight: Arc<[bf16]> = weight.into();
        if weight.len() != params.weight_len() {
            return Err(ConvError::Weight(params.weight_len(), weight.len()));
        }

        let blocks = BlockConfig::default();
        let [r, s] = params.kernel;
        let shape = Shape([params.out_channels, params.in_channels, r, s]);
        let padded = Shape([
            nearest_32(params.out_channels),
            nearest_32(params.in_channels),
            r,
            s,
        ]);
        let weight = Tensor::new(weight, shape, Layout::RowMajor)?
            .pad(padded, [0, 0, 0, 0], bf16::ZERO)?;
        let weight = convert::conv_weight_to_tiled(&weight, blocks.weight_block_h(), blocks.weight_block_w)?;
        log::debug!("conv weight {shape} padded to {padded}, tiled to {}", weight.shape());
        let weight = device.upload(&weight, memory)?;

        let bias = match bias {
            None => None,
            Some(bias) => {
                if bias.len() != params.out_channels {
                    return Err(ConvError::Bias(params.out_channels, bias.len()));
                }
                let shape = Shape([1, 1, 1, params.out_channels]);
                let padded = Shape([1, 1, 1, nearest_32(params.out_channels)]);
                let bias = Tensor::new(bias, shape, Layout::RowMajor)?
                    .pad(padded, [0, 0, 0, 0], bf16::ZERO)?;
                Some(device.upload(&bias, memory)?)
            }
        };

        Ok(Self {
            weight,
            bias,
            params,
            blocks,
        })
    }

    #[inline]
    pub fn params(&self) -> ConvParams {
        self.params
    }

    #[inline]
    pub fn blocks(&self) -> BlockConfig {
        self.blocks
    }

    #[inline]
    pub fn weight(&self) -> &DeviceTensor<D> {
        &self.weight
    }

    #[inline]
    pub fn bias(&self) -> Option<&DeviceTensor<D>> {
        self.bias.as_ref()
    }

    /// The convolution-as-matrix-multiply output shape for an `[h, w]`
    /// activation: `OH·OW` rows and `K` columns, each rounded up to the
    /// block-scaled tile edge.
    pub fn output_shape(&self, h: usize, w: usize) -> Shape {
        let (oh, ow) = self.params.geometry().output_dims(h, w);
        Shape([
            1,
            1,
            nearest_multiple(oh * ow, TILE_HEIGHT * self.blocks.act_block_h),
            nearest_multiple(self.params.out_channels, TILE_WIDTH * self.blocks.weight_block_w),
        ])
    }

    /// Runs the fused convolution on an activation of shape `[1, C, H, W]`.
    ///
    /// The primitive's output shape is asserted against the precomputed
    /// one. A mismatch means the lowering arithmetic and the device's
    /// tiling behavior have diverged and aborts the operation.
    pub fn forward(&self, activation: &DeviceTensor<D>) -> Result<DeviceTensor<D>, ConvError> {
        let [_, _, h, w] = *activation.shape();
        if !self.params.geometry().fits(h, w) {
            return Err(ConvError::Activation(activation.shape()));
        }
        let expected = self.output_shape(h, w);

        let device = activation.device();
        let output = device.conv(activation, &self.weight, self.params.geometry(), self.blocks)?;
        assert_eq!(
            output.shape(),
            expected,
            "fused convolution output shape diverged"
        );

        match &self.bias {
            Some(bias) => {
                log::trace!("bias add: output {}, bias {}", output.shape(), bias.shape());
                Ok(output.bcast(bias, BcastOp::Add, BcastDim::H)?)
            }
            None => Ok(output),
        }
    }
}
