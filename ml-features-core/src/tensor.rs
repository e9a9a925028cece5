//! Tensor implementations for batch-major feature data

use std::fmt;

use crate::error::{Error, Result};
use crate::schema::DataType;

/// Typed element storage shared by dense and sparse tensors
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    /// Boolean values
    Boolean(Vec<bool>),
    /// 32-bit integers
    Int32(Vec<i32>),
    /// 64-bit integers
    Int64(Vec<i64>),
    /// 32-bit floats
    Float32(Vec<f32>),
    /// 64-bit floats
    Float64(Vec<f64>),
    /// UTF-8 strings
    String(Vec<String>),
}

impl TensorData {
    /// Get the element type of this storage
    pub fn dtype(&self) -> DataType {
        match self {
            TensorData::Boolean(_) => DataType::Boolean,
            TensorData::Int32(_) => DataType::Int32,
            TensorData::Int64(_) => DataType::Int64,
            TensorData::Float32(_) => DataType::Float32,
            TensorData::Float64(_) => DataType::Float64,
            TensorData::String(_) => DataType::String,
        }
    }

    /// Get the number of elements
    pub fn len(&self) -> usize {
        match self {
            TensorData::Boolean(v) => v.len(),
            TensorData::Int32(v) => v.len(),
            TensorData::Int64(v) => v.len(),
            TensorData::Float32(v) => v.len(),
            TensorData::Float64(v) => v.len(),
            TensorData::String(v) => v.len(),
        }
    }

    /// Check if there are no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create zero-valued storage of the given type and length
    pub fn zeros(dtype: DataType, len: usize) -> Self {
        match dtype {
            DataType::Boolean => TensorData::Boolean(vec![false; len]),
            DataType::Int32 => TensorData::Int32(vec![0; len]),
            DataType::Int64 => TensorData::Int64(vec![0; len]),
            DataType::Float32 => TensorData::Float32(vec![0.0; len]),
            DataType::Float64 => TensorData::Float64(vec![0.0; len]),
            DataType::String => TensorData::String(vec![String::new(); len]),
        }
    }

    /// Borrow the values as `f32` if that is the stored type
    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            TensorData::Float32(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow the values as `i64` if that is the stored type
    pub fn as_i64(&self) -> Option<&[i64]> {
        match self {
            TensorData::Int64(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow the values as strings if that is the stored type
    pub fn as_strings(&self) -> Option<&[String]> {
        match self {
            TensorData::String(v) => Some(v),
            _ => None,
        }
    }

    /// Cast numeric values to `f32`
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn to_f32(&self) -> Result<Vec<f32>> {
        match self {
            TensorData::Int32(v) => Ok(v.iter().map(|&x| x as f32).collect()),
            TensorData::Int64(v) => Ok(v.iter().map(|&x| x as f32).collect()),
            TensorData::Float32(v) => Ok(v.clone()),
            TensorData::Float64(v) => Ok(v.iter().map(|&x| x as f32).collect()),
            other => Err(Error::TypeMismatch {
                expected: DataType::Float32,
                actual: other.dtype(),
            }),
        }
    }

    /// Widen integer values to `i64`
    pub fn to_i64(&self) -> Result<Vec<i64>> {
        match self {
            TensorData::Int32(v) => Ok(v.iter().map(|&x| i64::from(x)).collect()),
            TensorData::Int64(v) => Ok(v.clone()),
            other => Err(Error::TypeMismatch {
                expected: DataType::Int64,
                actual: other.dtype(),
            }),
        }
    }

    /// Render the element at `index` as a string
    pub fn value_to_string(&self, index: usize) -> Result<String> {
        let bound = self.len();
        if index >= bound {
            return Err(Error::IndexOutOfBounds { index, bound });
        }
        Ok(match self {
            TensorData::Boolean(v) => v[index].to_string(),
            TensorData::Int32(v) => v[index].to_string(),
            TensorData::Int64(v) => v[index].to_string(),
            TensorData::Float32(v) => v[index].to_string(),
            TensorData::Float64(v) => v[index].to_string(),
            TensorData::String(v) => v[index].clone(),
        })
    }

    /// Concatenate storages of the same type
    pub fn concat(dtype: DataType, parts: Vec<TensorData>) -> Result<Self> {
        let mut acc = TensorData::zeros(dtype, 0);
        for part in parts {
            match (&mut acc, part) {
                (TensorData::Boolean(a), TensorData::Boolean(b)) => a.extend(b),
                (TensorData::Int32(a), TensorData::Int32(b)) => a.extend(b),
                (TensorData::Int64(a), TensorData::Int64(b)) => a.extend(b),
                (TensorData::Float32(a), TensorData::Float32(b)) => a.extend(b),
                (TensorData::Float64(a), TensorData::Float64(b)) => a.extend(b),
                (TensorData::String(a), TensorData::String(b)) => a.extend(b),
                (_, other) => {
                    return Err(Error::TypeMismatch {
                        expected: dtype,
                        actual: other.dtype(),
                    })
                }
            }
        }
        Ok(acc)
    }

    /// Gather the elements at the given positions
    pub fn select(&self, positions: &[usize]) -> Result<Self> {
        let bound = self.len();
        if let Some(&index) = positions.iter().find(|&&p| p >= bound) {
            return Err(Error::IndexOutOfBounds { index, bound });
        }
        fn pick<T: Clone>(values: &[T], positions: &[usize]) -> Vec<T> {
            positions.iter().map(|&p| values[p].clone()).collect()
        }
        Ok(match self {
            TensorData::Boolean(v) => TensorData::Boolean(pick(v, positions)),
            TensorData::Int32(v) => TensorData::Int32(pick(v, positions)),
            TensorData::Int64(v) => TensorData::Int64(pick(v, positions)),
            TensorData::Float32(v) => TensorData::Float32(pick(v, positions)),
            TensorData::Float64(v) => TensorData::Float64(pick(v, positions)),
            TensorData::String(v) => TensorData::String(pick(v, positions)),
        })
    }
}

macro_rules! impl_from_vec {
    ($ty:ty, $variant:ident) => {
        impl From<Vec<$ty>> for TensorData {
            fn from(values: Vec<$ty>) -> Self {
                TensorData::$variant(values)
            }
        }
    };
}

impl_from_vec!(bool, Boolean);
impl_from_vec!(i32, Int32);
impl_from_vec!(i64, Int64);
impl_from_vec!(f32, Float32);
impl_from_vec!(f64, Float64);
impl_from_vec!(String, String);

impl From<Vec<&str>> for TensorData {
    fn from(values: Vec<&str>) -> Self {
        TensorData::String(values.into_iter().map(str::to_string).collect())
    }
}

/// A dense multidimensional tensor, stored row-major
#[derive(Clone, PartialEq)]
pub struct DenseTensor {
    /// Element storage
    data: TensorData,

    /// Shape of the tensor (dimensions)
    shape: Vec<usize>,
}

impl DenseTensor {
    /// Create a tensor from typed values and a shape
    pub fn new(data: TensorData, shape: Vec<usize>) -> Result<Self> {
        let expected_size: usize = shape.iter().product();
        if data.len() != expected_size {
            return Err(Error::InvalidArgument(format!(
                "Data length {} does not match shape product {}",
                data.len(),
                expected_size
            )));
        }

        Ok(Self { data, shape })
    }

    /// Create a tensor from a vector
    pub fn from_vec<D: Into<TensorData>>(data: D, shape: Vec<usize>) -> Result<Self> {
        Self::new(data.into(), shape)
    }

    /// Create an `f32` tensor of zeros
    pub fn zeros(shape: Vec<usize>) -> Self {
        let size = shape.iter().product();
        Self {
            data: TensorData::Float32(vec![0.0; size]),
            shape,
        }
    }

    /// Get the shape of this tensor
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the total number of elements in this tensor
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if this tensor is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of dimensions in this tensor
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Get the element type
    pub fn dtype(&self) -> DataType {
        self.data.dtype()
    }

    /// Get the element storage
    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Consume the tensor, returning its storage
    pub fn into_data(self) -> TensorData {
        self.data
    }

    /// Size of the leading (batch) dimension; scalars count as a batch of one
    pub fn batch_size(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    /// Number of elements per batch row
    pub fn row_width(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    /// Reshape this tensor to a new shape
    pub fn reshape(&self, new_shape: Vec<usize>) -> Result<Self> {
        let new_size: usize = new_shape.iter().product();
        if new_size != self.len() {
            return Err(Error::ShapeMismatch(format!(
                "Cannot reshape tensor of size {} to {:?}",
                self.len(),
                new_shape
            )));
        }

        Ok(Self {
            data: self.data.clone(),
            shape: new_shape,
        })
    }

    /// Flatten to `[batch, row_width]`
    pub fn flatten_rows(&self) -> Result<Self> {
        self.reshape(vec![self.batch_size(), self.row_width()])
    }

    /// Cast to an `f32` tensor of the same shape
    pub fn to_f32(&self) -> Result<Self> {
        Ok(Self {
            data: TensorData::Float32(self.data.to_f32()?),
            shape: self.shape.clone(),
        })
    }

    /// Borrow the values as `f32`
    pub fn as_f32_slice(&self) -> Result<&[f32]> {
        self.data.as_f32().ok_or(Error::TypeMismatch {
            expected: DataType::Float32,
            actual: self.dtype(),
        })
    }

    /// Borrow the values as `i64`
    pub fn as_i64_slice(&self) -> Result<&[i64]> {
        self.data.as_i64().ok_or(Error::TypeMismatch {
            expected: DataType::Int64,
            actual: self.dtype(),
        })
    }

    /// Compute the flat offset of the given indices
    fn offset(&self, indices: &[usize]) -> Result<usize> {
        if indices.len() != self.shape.len() {
            return Err(Error::InvalidArgument(
                "Number of indices must match number of dimensions".into(),
            ));
        }

        let mut offset = 0;
        for (&idx, &dim) in indices.iter().zip(&self.shape) {
            if idx >= dim {
                return Err(Error::IndexOutOfBounds { index: idx, bound: dim });
            }
            offset = offset * dim + idx;
        }

        Ok(offset)
    }

    /// Get an `f32` value at the specified indices
    pub fn get_f32(&self, indices: &[usize]) -> Result<f32> {
        let offset = self.offset(indices)?;
        Ok(self.as_f32_slice()?[offset])
    }
}

impl fmt::Debug for DenseTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DenseTensor<{}>{{ shape: {:?}, size: {} }}",
            self.dtype(),
            self.shape,
            self.len()
        )
    }
}

/// A sparse tensor in coordinate (COO) format
#[derive(Clone, PartialEq)]
pub struct SparseTensor {
    /// Flattened coordinates, `ndim` entries per value
    indices: Vec<usize>,

    /// Values of the non-zero entries
    values: TensorData,

    /// Dense shape
    shape: Vec<usize>,
}

impl SparseTensor {
    /// Create a COO sparse tensor from values and indices
    pub fn from_coo<D: Into<TensorData>>(
        values: D,
        indices: Vec<usize>,
        shape: Vec<usize>,
    ) -> Result<Self> {
        let values = values.into();
        let ndim = shape.len();
        if ndim == 0 {
            return Err(Error::InvalidArgument(
                "Sparse tensors need at least a batch dimension".into(),
            ));
        }
        if indices.len() != values.len() * ndim {
            return Err(Error::InvalidArgument(
                "Indices length must be values length times dimensions".into(),
            ));
        }

        // Check indices are within bounds
        for coords in indices.chunks(ndim) {
            for (&idx, &dim) in coords.iter().zip(&shape) {
                if idx >= dim {
                    return Err(Error::IndexOutOfBounds { index: idx, bound: dim });
                }
            }
        }

        Ok(Self {
            indices,
            values,
            shape,
        })
    }

    /// Create a 2-D `[batch, max_row_len]` sparse tensor from ragged rows
    pub fn from_rows<T>(rows: Vec<Vec<T>>) -> Result<Self>
    where
        Vec<T>: Into<TensorData>,
    {
        let batch = rows.len();
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        let mut indices = Vec::new();
        let mut values = Vec::new();
        for (row, items) in rows.into_iter().enumerate() {
            for (col, item) in items.into_iter().enumerate() {
                indices.push(row);
                indices.push(col);
                values.push(item);
            }
        }

        Self::from_coo(values, indices, vec![batch, width])
    }

    /// Get the number of non-zero elements
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Get the dense shape of this tensor
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the number of dimensions
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Get the element type
    pub fn dtype(&self) -> DataType {
        self.values.dtype()
    }

    /// Get the values of the non-zero entries
    pub fn values(&self) -> &TensorData {
        &self.values
    }

    /// Get the flattened coordinates
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Get the coordinates of the `i`-th entry
    pub fn index(&self, i: usize) -> &[usize] {
        let ndim = self.ndim();
        &self.indices[i * ndim..(i + 1) * ndim]
    }

    /// Size of the leading (batch) dimension
    pub fn batch_size(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Entry positions grouped by batch row, in storage order
    pub fn row_entries(&self) -> Vec<Vec<usize>> {
        let mut rows = vec![Vec::new(); self.batch_size()];
        for i in 0..self.nnz() {
            rows[self.index(i)[0]].push(i);
        }
        rows
    }

    /// Replace the values, keeping coordinates and shape
    pub fn with_values<D: Into<TensorData>>(&self, values: D) -> Result<Self> {
        let values = values.into();
        if values.len() != self.nnz() {
            return Err(Error::InvalidArgument(format!(
                "Expected {} values, got {}",
                self.nnz(),
                values.len()
            )));
        }

        Ok(Self {
            indices: self.indices.clone(),
            values,
            shape: self.shape.clone(),
        })
    }

    /// Keep only the entries whose positions are listed
    pub fn retain(&self, positions: &[usize]) -> Result<Self> {
        let ndim = self.ndim();
        let mut indices = Vec::with_capacity(positions.len() * ndim);
        for &p in positions {
            if p >= self.nnz() {
                return Err(Error::IndexOutOfBounds { index: p, bound: self.nnz() });
            }
            indices.extend_from_slice(self.index(p));
        }

        Ok(Self {
            indices,
            values: self.values.select(positions)?,
            shape: self.shape.clone(),
        })
    }

    /// Convert this sparse tensor to a dense tensor, filling gaps with zero values
    pub fn to_dense(&self) -> Result<DenseTensor> {
        let size: usize = self.shape.iter().product();
        let mut positions = vec![None; size];
        for i in 0..self.nnz() {
            let mut offset = 0;
            for (&idx, &dim) in self.index(i).iter().zip(&self.shape) {
                offset = offset * dim + idx;
            }
            positions[offset] = Some(i);
        }

        fn fill<T: Clone>(values: &[T], positions: &[Option<usize>], zero: &T) -> Vec<T> {
            positions
                .iter()
                .map(|p| p.map_or_else(|| zero.clone(), |i| values[i].clone()))
                .collect()
        }

        let data = match &self.values {
            TensorData::Boolean(v) => TensorData::Boolean(fill(v, &positions, &false)),
            TensorData::Int32(v) => TensorData::Int32(fill(v, &positions, &0)),
            TensorData::Int64(v) => TensorData::Int64(fill(v, &positions, &0)),
            TensorData::Float32(v) => TensorData::Float32(fill(v, &positions, &0.0)),
            TensorData::Float64(v) => TensorData::Float64(fill(v, &positions, &0.0)),
            TensorData::String(v) => TensorData::String(fill(v, &positions, &String::new())),
        };

        DenseTensor::new(data, self.shape.clone())
    }
}

impl fmt::Debug for SparseTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SparseTensor<{}>{{ shape: {:?}, nnz: {} }}",
            self.dtype(),
            self.shape,
            self.nnz()
        )
    }
}

/// A dense or sparse tensor
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    /// Dense tensor
    Dense(DenseTensor),
    /// Sparse tensor
    Sparse(SparseTensor),
}

impl Tensor {
    /// Get the element type
    pub fn dtype(&self) -> DataType {
        match self {
            Tensor::Dense(t) => t.dtype(),
            Tensor::Sparse(t) => t.dtype(),
        }
    }

    /// Get the (dense) shape
    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::Dense(t) => t.shape(),
            Tensor::Sparse(t) => t.shape(),
        }
    }

    /// Size of the leading (batch) dimension
    pub fn batch_size(&self) -> usize {
        match self {
            Tensor::Dense(t) => t.batch_size(),
            Tensor::Sparse(t) => t.batch_size(),
        }
    }

    /// Check if this is a sparse tensor
    pub fn is_sparse(&self) -> bool {
        matches!(self, Tensor::Sparse(_))
    }

    /// Borrow as a dense tensor
    pub fn as_dense(&self) -> Result<&DenseTensor> {
        match self {
            Tensor::Dense(t) => Ok(t),
            Tensor::Sparse(t) => Err(Error::LayoutMismatch(format!(
                "expected a dense tensor, got {t:?}"
            ))),
        }
    }

    /// Borrow as a sparse tensor
    pub fn as_sparse(&self) -> Result<&SparseTensor> {
        match self {
            Tensor::Sparse(t) => Ok(t),
            Tensor::Dense(t) => Err(Error::LayoutMismatch(format!(
                "expected a sparse tensor, got {t:?}"
            ))),
        }
    }
}

impl From<DenseTensor> for Tensor {
    fn from(tensor: DenseTensor) -> Self {
        Tensor::Dense(tensor)
    }
}

impl From<SparseTensor> for Tensor {
    fn from(tensor: SparseTensor) -> Self {
        Tensor::Sparse(tensor)
    }
}
