use bytemuck::{Pod, Zeroable};
use derive_more::Display;
use half::bf16;
use serde::{Deserialize, Serialize};

/// Element type of a tensor's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum DataType {
    F32,
    Bf16,
    U32,
}

impl DataType {
    /// Returns the size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            DataType::F32 => 4,
            DataType::Bf16 => 2,
            DataType::U32 => 4,
        }
    }
}

pub trait Zero {
    fn zero() -> Self;
}

impl Zero for f32 {
    fn zero() -> Self {
        0.0
    }
}

impl Zero for bf16 {
    fn zero() -> Self {
        Self::ZERO
    }
}

impl Zero for u32 {
    fn zero() -> Self {
        0
    }
}

pub trait One {
    fn one() -> Self;
}

impl One for f32 {
    fn one() -> Self {
        1.0
    }
}

impl One for bf16 {
    fn one() -> Self {
        Self::ONE
    }
}

impl One for u32 {
    fn one() -> Self {
        1
    }
}

pub trait Scalar: Sized + Zeroable + Pod + Zero + One + Send + Sync {
    const DATA_TYPE: DataType;
}

impl Scalar for f32 {
    const DATA_TYPE: DataType = DataType::F32;
}

impl Scalar for bf16 {
    const DATA_TYPE: DataType = DataType::Bf16;
}

impl Scalar for u32 {
    const DATA_TYPE: DataType = DataType::U32;
}

/// Floating-point scalars. Kernels widen to `f32` for accumulation.
pub trait Float: Scalar {
    fn to_f32(self) -> f32;
    fn from_f32(value: f32) -> Self;
}

impl Float for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        value
    }
}

impl Float for bf16 {
    #[inline]
    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        bf16::from_f32(value)
    }
}
