//! Tensor API.
//!
//! Tensors are the inputs and outputs of inference sessions. Gesture classifiers in the wild
//! disagree on what they output: some emit class scores, some a class index, some the label text
//! itself. [`Tensor`] therefore carries one of several element types, see [`TensorData`].

use std::fmt;

use anyhow::bail;
use tinyvec::TinyVec;
use tract_onnx::prelude::{tract_ndarray, DatumType};

use crate::landmark::FeatureVector;

type Shape = TinyVec<[usize; 4]>;

/// The homogeneous element data of a [`Tensor`].
#[derive(Clone, PartialEq)]
pub enum TensorData {
    Float(Box<[f32]>),
    Int(Box<[i64]>),
    Text(Box<[String]>),
}

impl TensorData {
    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        match self {
            TensorData::Float(data) => data.len(),
            TensorData::Int(data) => data.len(),
            TensorData::Text(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn type_name(&self) -> &'static str {
        match self {
            TensorData::Float(_) => "f32",
            TensorData::Int(_) => "i64",
            TensorData::Text(_) => "string",
        }
    }
}

/// A dynamically shaped N-dimensional array of numbers or strings.
///
/// The element count of a tensor always matches the product of its shape.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    data: TensorData,
}

impl Tensor {
    /// Creates a float tensor of the given shape by pulling elements from an iterator.
    ///
    /// # Panics
    ///
    /// `iter` must yield exactly as many elements as specified by `shape` (by multiplying all of
    /// its entries), otherwise this method will panic.
    pub fn from_iter<I: IntoIterator<Item = f32>>(shape: &[usize], iter: I) -> Self {
        Self::new(shape, TensorData::Float(iter.into_iter().collect()))
    }

    /// Creates an integer tensor.
    ///
    /// # Panics
    ///
    /// Panics if the number of elements does not match `shape`.
    pub fn from_ints<I: IntoIterator<Item = i64>>(shape: &[usize], iter: I) -> Self {
        Self::new(shape, TensorData::Int(iter.into_iter().collect()))
    }

    /// Creates a string tensor.
    ///
    /// # Panics
    ///
    /// Panics if the number of elements does not match `shape`.
    pub fn from_text<S: Into<String>, I: IntoIterator<Item = S>>(shape: &[usize], iter: I) -> Self {
        Self::new(
            shape,
            TensorData::Text(iter.into_iter().map(Into::into).collect()),
        )
    }

    #[track_caller]
    fn new(shape: &[usize], data: TensorData) -> Self {
        let elements = shape.iter().product::<usize>();
        assert_eq!(
            data.len(),
            elements,
            "tensor of shape {:?} must have {} elements",
            shape,
            elements
        );
        Self {
            shape: shape.iter().copied().collect(),
            data,
        }
    }

    /// Wraps a feature vector in a single-batch tensor of shape `[1, 63]`.
    pub fn from_features(features: &FeatureVector) -> Self {
        let values = features.as_slice();
        Self::from_iter(&[1, values.len()], values.iter().copied())
    }

    pub(crate) fn from_tract(tract: &tract_onnx::prelude::Tensor) -> anyhow::Result<Self> {
        let data = match tract.datum_type() {
            DatumType::F32 => TensorData::Float(tract.as_slice::<f32>()?.into()),
            DatumType::F64 => {
                TensorData::Float(tract.as_slice::<f64>()?.iter().map(|&f| f as f32).collect())
            }
            DatumType::I64 => TensorData::Int(tract.as_slice::<i64>()?.into()),
            DatumType::I32 => {
                TensorData::Int(tract.as_slice::<i32>()?.iter().map(|&i| i.into()).collect())
            }
            DatumType::String => TensorData::Text(tract.as_slice::<String>()?.into()),
            other => bail!("unsupported tensor element type {other:?}"),
        };
        Ok(Self::new(tract.shape(), data))
    }

    pub(crate) fn to_tract(&self) -> anyhow::Result<tract_onnx::prelude::Tensor> {
        let shape = tract_ndarray::IxDyn(self.shape());
        let tensor: tract_onnx::prelude::Tensor = match &self.data {
            TensorData::Float(data) => {
                tract_ndarray::ArrayD::from_shape_vec(shape, data.to_vec())?.into()
            }
            TensorData::Int(data) => {
                tract_ndarray::ArrayD::from_shape_vec(shape, data.to_vec())?.into()
            }
            TensorData::Text(data) => {
                tract_ndarray::ArrayD::from_shape_vec(shape, data.to_vec())?.into()
            }
        };
        Ok(tensor)
    }

    /// Returns the shape of this tensor.
    ///
    /// A tensor's shape is the number of entries in each dimension.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions of this tensor.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Returns the total number of elements in this tensor.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Returns the elements of a float tensor, or [`None`] if it holds another element type.
    pub fn as_floats(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::Float(data) => Some(data),
            _ => None,
        }
    }
}

impl From<f32> for Tensor {
    fn from(value: f32) -> Self {
        Tensor::from_iter(&[], [value])
    }
}

impl<'a> From<&'a [f32]> for Tensor {
    fn from(slice: &'a [f32]) -> Self {
        Tensor::from_iter(&[slice.len()], slice.iter().copied())
    }
}

impl<const N: usize> From<[f32; N]> for Tensor {
    fn from(arr: [f32; N]) -> Self {
        Tensor::from_iter(&[N], arr)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor<{}>{:?}", self.data.type_name(), self.shape())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_has_one_element() {
        let t = Tensor::from(1.5);
        assert_eq!(t.rank(), 0);
        assert_eq!(t.len(), 1);
        assert_eq!(t.as_floats(), Some(&[1.5][..]));
    }

    #[test]
    #[should_panic]
    fn shape_mismatch() {
        Tensor::from_ints(&[2, 2], [1, 2, 3]);
    }

    #[test]
    fn features_shape() {
        let features = FeatureVector::try_from(vec![0.25; 63]).unwrap();
        let t = Tensor::from_features(&features);
        assert_eq!(t.shape(), &[1, 63]);
        assert_eq!(t.as_floats().unwrap(), features.as_slice());
        assert_eq!(format!("{t:?}"), "Tensor<f32>[1, 63]");
    }

    #[test]
    fn tract_conversion() {
        let tensors = [
            Tensor::from_iter(&[2, 2], [1.0, 2.0, 3.0, 4.0]),
            Tensor::from_ints(&[3], [7, -1, 0]),
            Tensor::from_text(&[1], ["Pataka(1)"]),
        ];
        for t in tensors {
            let tract = t.to_tract().unwrap();
            assert_eq!(tract.shape(), t.shape());
            assert_eq!(Tensor::from_tract(&tract).unwrap(), t);
        }
    }

    #[test]
    fn empty_tensor() {
        let t = Tensor::from_iter(&[1, 0], []);
        assert!(t.is_empty());
        assert!(Tensor::from_text(&[0], Vec::<String>::new()).data().is_empty());
    }
}
