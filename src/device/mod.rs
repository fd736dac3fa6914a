//! The accelerator tensor runtime contract and device-resident tensors.
//!
//! [`Device`] fixes the set of primitives the lowering helpers rely on:
//! tensor transfer, layout conversion, the fused convolution, and
//! broadcast arithmetic. Implementations choose the physical execution
//! strategy; the contract fixes shapes, layouts and values. [`Cpu`] is
//! the reference implementation.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    layout::{Layout, Shape},
    num::{DataType, Scalar},
    tensor::{Tensor, TensorError},
};

pub use cpu::Cpu;

pub mod cpu;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device allocation error: {0}")]
    Alloc(String),
    #[error("device type error: no {1} kernel for data type {0}")]
    Type(DataType, &'static str),
    #[error("device layout error: {1} requires {0} input")]
    Layout(Layout, &'static str),
    #[error("device alignment error: shape {0} not tile-aligned")]
    Alignment(Shape),
    #[error("device shape error: {0} not compatible with {1}")]
    Shape(Shape, Shape),
    #[error("device dim error: invalid dimension {0}")]
    Dim(usize),
    #[error("device batch error: expected batch 1, found {0}")]
    Batch(usize),
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// Buffer placement on the device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum BufferType {
    #[default]
    Dram,
    L1,
}

/// Memory arrangement across device banks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum MemoryLayout {
    #[default]
    Interleaved,
    SingleBank,
}

/// Placement configuration for a device-resident tensor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub layout: MemoryLayout,
    pub buffer: BufferType,
}

impl MemoryConfig {
    #[inline]
    pub fn new(layout: MemoryLayout, buffer: BufferType) -> Self {
        Self { layout, buffer }
    }
}

/// Kernel geometry of the fused convolution primitive: kernel extent
/// `[R, S]`, stride `[U, V]` and padding `[P_H, P_W]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvGeometry {
    pub kernel: [usize; 2],
    pub stride: [usize; 2],
    pub padding: [usize; 2],
}

impl ConvGeometry {
    /// Output spatial extent for an `[h, w]` input, by the standard
    /// convolution formula with integer floor division.
    #[inline]
    pub fn output_dims(&self, h: usize, w: usize) -> (usize, usize) {
        let [r, s] = self.kernel;
        let [u, v] = self.stride;
        let [p_h, p_w] = self.padding;
        let oh = (h + 2 * p_h - r) / u + 1;
        let ow = (w + 2 * p_w - s) / v + 1;
        (oh, ow)
    }

    /// Whether the (padded) input extent covers the kernel.
    #[inline]
    pub fn fits(&self, h: usize, w: usize) -> bool {
        let [r, s] = self.kernel;
        let [p_h, p_w] = self.padding;
        r <= h + 2 * p_h && s <= w + 2 * p_w
    }
}

/// Block-size parameters of the fused convolution primitive, in tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockConfig {
    pub act_block_h: usize,
    pub act_block_w: usize,
    pub weight_block_w: usize,
    pub out_subblock_h: usize,
    pub out_subblock_w: usize,
}

impl BlockConfig {
    /// The weight block height is tied to the activation block width.
    #[inline]
    pub const fn weight_block_h(&self) -> usize {
        self.act_block_w
    }
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            act_block_h: 4,
            act_block_w: 4,
            weight_block_w: 4,
            out_subblock_h: 4,
            out_subblock_w: 2,
        }
    }
}

/// Arithmetic applied by [`Device::bcast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum BcastOp {
    Add,
    Sub,
    Mul,
}

/// Dimension replicated by [`Device::bcast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum BcastDim {
    H,
    W,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId;

/// The accelerator tensor runtime.
pub trait Device: Sized + Clone {
    /// Device-resident storage for one tensor.
    type Buffer: Clone + std::ops::Deref<Target = [u8]> + Send + Sync;

    /// Allocates a device buffer holding `contents`.
    fn alloc(&self, contents: Vec<u8>, memory: MemoryConfig) -> Result<Self::Buffer, DeviceError>;

    /// Transfers a host tensor into device-resident memory.
    fn upload<T: Scalar>(
        &self,
        tensor: &Tensor<T>,
        memory: MemoryConfig,
    ) -> Result<DeviceTensor<Self>, DeviceError> {
        let contents = bytemuck::cast_slice(tensor.data()).to_vec();
        DeviceTensor::from_bytes(
            self,
            contents,
            tensor.shape(),
            tensor.layout(),
            T::DATA_TYPE,
            memory,
        )
    }

    /// Reads a tensor back to the host. The requested element type must
    /// match the stored data type.
    fn download<T: Scalar>(&self, tensor: &DeviceTensor<Self>) -> Result<Tensor<T>, DeviceError> {
        if tensor.r#type != T::DATA_TYPE {
            return Err(TensorError::Type(tensor.r#type, T::DATA_TYPE).into());
        }
        let data: Vec<T> = bytemuck::pod_collect_to_vec(&tensor.buffer);
        Ok(Tensor::new(data, tensor.shape, tensor.layout)?)
    }

    /// Converts a row-major tensor to tiled layout.
    fn tilize(&self, tensor: &DeviceTensor<Self>) -> Result<DeviceTensor<Self>, DeviceError>;

    /// Converts a tiled tensor back to row-major layout.
    fn untilize(&self, tensor: &DeviceTensor<Self>) -> Result<DeviceTensor<Self>, DeviceError>;

    /// The fused convolution primitive.
    ///
    /// Takes a `[1, C, H, W]` row-major activation and a tiled weight
    /// matrix, and returns the convolution-as-matrix-multiply result of
    /// shape `[1, 1, nearest_multiple(OH·OW, 32·act_block_h), cols]`,
    /// where `cols` is the weight matrix width. Rows beyond `OH·OW` are
    /// zero.
    fn conv(
        &self,
        activation: &DeviceTensor<Self>,
        weight: &DeviceTensor<Self>,
        geometry: ConvGeometry,
        blocks: BlockConfig,
    ) -> Result<DeviceTensor<Self>, DeviceError>;

    /// Broadcast arithmetic over one dimension.
    ///
    /// `rhs` must have extent 1 along `dim` and is replicated across
    /// `lhs` there. Along the row axis a shorter `rhs` behaves as
    /// zero-padded out to the `lhs` width.
    fn bcast(
        &self,
        lhs: &DeviceTensor<Self>,
        rhs: &DeviceTensor<Self>,
        op: BcastOp,
        dim: BcastDim,
    ) -> Result<DeviceTensor<Self>, DeviceError>;

    /// Exchanges two logical dimensions of a row-major tensor.
    fn transpose(
        &self,
        tensor: &DeviceTensor<Self>,
        dim0: usize,
        dim1: usize,
    ) -> Result<DeviceTensor<Self>, DeviceError>;

    /// Layer normalization over the last dimension, with optional weight
    /// and bias vectors of shape `[1, 1, 1, W]`.
    fn layer_norm(
        &self,
        tensor: &DeviceTensor<Self>,
        weight: Option<&DeviceTensor<Self>>,
        bias: Option<&DeviceTensor<Self>>,
        eps: f32,
    ) -> Result<DeviceTensor<Self>, DeviceError>;

    /// Elementwise `max(0, x)`.
    fn relu(&self, tensor: &DeviceTensor<Self>) -> Result<DeviceTensor<Self>, DeviceError>;
}

/// A handle to a device-resident tensor.
///
/// The handle owns its device buffer; the memory is released when the
/// last clone of the handle is dropped.
#[derive(Clone)]
pub struct DeviceTensor<D: Device> {
    device: D,
    buffer: D::Buffer,
    shape: Shape,
    layout: Layout,
    r#type: DataType,
    memory: MemoryConfig,
    id: uid::Id<TensorId>,
}

impl<D: Device> DeviceTensor<D> {
    pub(crate) fn from_bytes(
        device: &D,
        contents: Vec<u8>,
        shape: Shape,
        layout: Layout,
        r#type: DataType,
        memory: MemoryConfig,
    ) -> Result<Self, DeviceError> {
        let buffer = device.alloc(contents, memory)?;
        Ok(Self {
            device: device.clone(),
            buffer,
            shape,
            layout,
            r#type,
            memory,
            id: uid::Id::new(),
        })
    }

    /// Copies the buffer out as typed elements.
    pub(crate) fn read_vec<T: Scalar>(&self) -> Vec<T> {
        bytemuck::pod_collect_to_vec(&self.buffer)
    }

    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.r#type
    }

    #[inline]
    pub fn memory(&self) -> MemoryConfig {
        self.memory
    }

    #[inline]
    pub fn id(&self) -> uid::Id<TensorId> {
        self.id
    }

    #[inline]
    pub fn data_size(&self) -> usize {
        self.shape.size() * self.r#type.size()
    }

    /// Reads the tensor back to the host.
    #[inline]
    pub fn to_host<T: Scalar>(&self) -> Result<Tensor<T>, DeviceError> {
        self.device.download(self)
    }

    #[inline]
    pub fn tilize(&self) -> Result<Self, DeviceError> {
        self.device.tilize(self)
    }

    #[inline]
    pub fn untilize(&self) -> Result<Self, DeviceError> {
        self.device.untilize(self)
    }

    #[inline]
    pub fn bcast(&self, rhs: &Self, op: BcastOp, dim: BcastDim) -> Result<Self, DeviceError> {
        self.device.bcast(self, rhs, op, dim)
    }

    #[inline]
    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Self, DeviceError> {
        self.device.transpose(self, dim0, dim1)
    }

    #[inline]
    pub fn layer_norm(
        &self,
        weight: Option<&Self>,
        bias: Option<&Self>,
        eps: f32,
    ) -> Result<Self, DeviceError> {
        self.device.layer_norm(self, weight, bias, eps)
    }

    #[inline]
    pub fn relu(&self) -> Result<Self, DeviceError> {
        self.device.relu(self)
    }
}

impl<D: Device> std::fmt::Debug for DeviceTensor<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceTensor")
            .field("shape", &self.shape)
            .field("layout", &self.layout)
            .field("type", &self.r#type)
            .field("memory", &self.memory)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
