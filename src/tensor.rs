use std::sync::Arc;

use thiserror::Error;

use crate::{
    layout::{Layout, Shape},
    num::{DataType, Scalar},
};

#[derive(Debug, Error)]
pub enum TensorError {
    #[error("tensor creation error: shape {0}'s size not match data len {1}")]
    Create(Shape, usize),
    #[error("tensor pad error: region {1} at {2:?} not contained in {0}")]
    Pad(Shape, Shape, [usize; 4]),
    #[error("tensor unpad error: region {1} at {2:?} not contained in {0}")]
    Unpad(Shape, Shape, [usize; 4]),
    #[error("tensor reshape error: shape {0}'s size not match shape {1}'s")]
    Reshape(Shape, Shape),
    #[error("tensor layout error: expected {0}, found {1}")]
    Layout(Layout, Layout),
    #[error("tensor alignment error: shape {0} not tile-aligned")]
    Alignment(Shape),
    #[error("tensor type error: data type {0} mismatches {1}")]
    Type(DataType, DataType),
    #[error("tensor pool error: window {1:?} stride {2:?} invalid for {0}")]
    Pool(Shape, [usize; 2], [usize; 2]),
}

/// A host-resident tensor: flat data plus a logical shape and layout tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T: Scalar> {
    data: Arc<[T]>,
    shape: Shape,
    layout: Layout,
}

impl<T: Scalar> Tensor<T> {
    /// Creates a tensor from flat data. The data length must match the
    /// shape's size.
    pub fn new(
        data: impl Into<Arc<[T]>>,
        shape: impl Into<Shape>,
        layout: Layout,
    ) -> Result<Self, TensorError> {
        let data = data.into();
        let shape = shape.into();
        if shape.size() != data.len() {
            return Err(TensorError::Create(shape, data.len()));
        }
        Ok(Self {
            data,
            shape,
            layout,
        })
    }

    /// Creates a row-major tensor of zeros.
    pub fn zeros(shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        let data = vec![T::zero(); shape.size()].into();
        let layout = Layout::RowMajor;
        Self {
            data,
            shape,
            layout,
        }
    }

    pub(crate) fn from_parts(data: Vec<T>, shape: Shape, layout: Layout) -> Self {
        debug_assert_eq!(data.len(), shape.size());
        let data = data.into();
        Self {
            data,
            shape,
            layout,
        }
    }

    #[inline]
    pub fn data(&self) -> &[T] {
        &self.data
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
        T::DATA_TYPE
    }

    /// Grows the tensor out to `target`, placing the original values at
    /// `start` and filling everything else with `value`.
    pub fn pad(
        &self,
        target: impl Into<Shape>,
        start: [usize; 4],
        value: T,
    ) -> Result<Self, TensorError> {
        if self.layout != Layout::RowMajor {
            return Err(TensorError::Layout(Layout::RowMajor, self.layout));
        }
        let target = target.into();
        if !self.shape.fits(&target, start) {
            return Err(TensorError::Pad(target, self.shape, start));
        }
        let [n, c, h, w] = *self.shape;
        let mut data = vec![value; target.size()];
        for (b, ch, y, x) in itertools::iproduct!(0..n, 0..c, 0..h, 0..w) {
            let dst = [b + start[0], ch + start[1], y + start[2], x + start[3]];
            data[target.index(dst)] = self.data[self.shape.index([b, ch, y, x])];
        }
        Ok(Self::from_parts(data, target, Layout::RowMajor))
    }

    /// Extracts the `target`-shaped region at `start`, the inverse of
    /// [`pad`](Self::pad).
    pub fn unpad(
        &self,
        target: impl Into<Shape>,
        start: [usize; 4],
    ) -> Result<Self, TensorError> {
        if self.layout != Layout::RowMajor {
            return Err(TensorError::Layout(Layout::RowMajor, self.layout));
        }
        let target = target.into();
        if !target.fits(&self.shape, start) {
            return Err(TensorError::Unpad(self.shape, target, start));
        }
        let [n, c, h, w] = *target;
        let mut data = vec![T::zero(); target.size()];
        for (b, ch, y, x) in itertools::iproduct!(0..n, 0..c, 0..h, 0..w) {
            let src = [b + start[0], ch + start[1], y + start[2], x + start[3]];
            data[target.index([b, ch, y, x])] = self.data[self.shape.index(src)];
        }
        Ok(Self::from_parts(data, target, Layout::RowMajor))
    }

    /// Reshapes the tensor, leaving the underlying data untouched.
    pub fn reshape(mut self, shape: impl Into<Shape>) -> Result<Self, TensorError> {
        let shape = shape.into();
        if self.shape.size() != shape.size() {
            return Err(TensorError::Reshape(self.shape, shape));
        }
        self.shape = shape;
        Ok(self)
    }
}
