//! Tiled tensor layouts and convolution lowering for block-matmul
//! accelerators.
//!
//! The crate turns host-side weight and bias arrays into device-resident,
//! hardware-aligned tensors and produces convolution operators that drive
//! an accelerator's fused convolution-as-matrix-multiply primitive.
//!
//! ## Key Components
//! 1. **Host tensors** ([`Tensor`]): flat data with a logical rank-4
//!    [`Shape`] and a [`Layout`] tag, with zero-padding up to
//!    hardware-aligned shapes and the exact inverse.
//! 2. **Layout conversion** ([`convert`]): pure rearrangements between
//!    row-major and 32×32 tiled storage, including the conv-weight
//!    matrix transform with explicit block dimensions.
//! 3. **Device contract** ([`Device`]): the fixed set of accelerator
//!    primitives (transfer, layout conversion, fused convolution,
//!    broadcast arithmetic), with [`Cpu`] as the reference
//!    implementation every lowering is validated against.
//! 4. **Fused operators** ([`fused`]): [`Conv2d`] binds device-resident
//!    weights to the lowering arithmetic and checks each invocation's
//!    output shape against the precomputed one.
//!
//! Data flows one way: hyperparameters and raw values are padded and
//! rearranged on the host, transferred to the device once, and reused
//! read-only across invocations.

pub mod convert;
pub mod device;
pub mod fallback;
pub mod fused;
pub mod layout;
pub mod num;
pub mod tensor;

pub use device::{
    BcastDim, BcastOp, BlockConfig, BufferType, ConvGeometry, Cpu, Device, DeviceError,
    DeviceTensor, MemoryConfig, MemoryLayout,
};
pub use fused::conv::{Conv2d, ConvError, ConvParams};
pub use layout::{Layout, Shape, TILE_HEIGHT, TILE_WIDTH, nearest_32, nearest_multiple};
pub use num::{DataType, Float, Scalar};
pub use tensor::{Tensor, TensorError};
