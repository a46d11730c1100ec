//! Tensor descriptors and shared tensor handles
//!
//! A [`TensorInfo`] describes an N-dimensional strided view: shape, element
//! strides, offset of the first element, data type and (for fixed-point
//! types) the fixed-point position. Dimension 0 is the width, 1 the height,
//! 2 the feature maps; anything beyond is a batch dimension.
//!
//! A [`Tensor`] pairs a descriptor with caller-owned storage. Cloning a
//! tensor clones the handle, not the elements.

use crate::{DataType, ElementKind, Result, TensorError};
use half::f16;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

// ---------------------------------------------------------------------------
// Named dimensions
// ---------------------------------------------------------------------------

/// Named dimensions of an image-like tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Width,
    Height,
    FeatureMaps,
    /// First batch dimension. Further batch dimensions follow it.
    Batch,
}

impl Axis {
    pub const fn index(self) -> usize {
        match self {
            Self::Width => 0,
            Self::Height => 1,
            Self::FeatureMaps => 2,
            Self::Batch => 3,
        }
    }
}

// ---------------------------------------------------------------------------
// TensorInfo
// ---------------------------------------------------------------------------

/// Shape, stride and data type metadata for a tensor view.
///
/// Construction validates that no dimension is zero and that the strides
/// describe a non-overlapping view, so distinct coordinates always map to
/// distinct elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    shape: Vec<usize>,
    strides: Vec<usize>,
    offset: usize,
    data_type: DataType,
    fixed_point_position: u8,
}

impl TensorInfo {
    /// Dense descriptor for a non-fixed-point data type.
    pub fn dense(shape: &[usize], data_type: DataType) -> Result<Self> {
        Self::dense_fixed_point(shape, data_type, 0)
    }

    /// Dense descriptor with an explicit fixed-point position.
    ///
    /// The position must be within [`DataType::fixed_point_range`] for
    /// fixed-point types and zero for every other type.
    pub fn dense_fixed_point(
        shape: &[usize],
        data_type: DataType,
        fixed_point_position: u8,
    ) -> Result<Self> {
        Self::with_strides(
            shape,
            &Self::dense_strides(shape),
            0,
            data_type,
            fixed_point_position,
        )
    }

    /// Descriptor with explicit element strides and first-element offset.
    pub fn with_strides(
        shape: &[usize],
        strides: &[usize],
        offset: usize,
        data_type: DataType,
        fixed_point_position: u8,
    ) -> Result<Self> {
        let info = Self {
            shape: shape.to_vec(),
            strides: strides.to_vec(),
            offset,
            data_type,
            fixed_point_position,
        };
        info.validate()?;
        Ok(info)
    }

    /// Contiguous strides with dimension 0 innermost.
    pub fn dense_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = Vec::with_capacity(shape.len());
        let mut acc = 1usize;
        for &dim in shape {
            strides.push(acc);
            acc = acc.saturating_mul(dim);
        }
        strides
    }

    fn validate(&self) -> Result<()> {
        if self.shape.is_empty() {
            return Err(TensorError::EmptyShape.into());
        }
        if let Some(dim) = self.shape.iter().position(|&d| d == 0) {
            return Err(TensorError::ZeroDimension { dim }.into());
        }
        if self.strides.len() != self.shape.len() {
            return Err(TensorError::StrideRankMismatch {
                rank: self.shape.len(),
                strides: self.strides.len(),
            }
            .into());
        }

        match self.data_type.fixed_point_range() {
            Some(range) if !range.contains(&self.fixed_point_position) => {
                return Err(TensorError::InvalidFixedPointPosition {
                    dtype: self.data_type,
                    position: self.fixed_point_position,
                }
                .into());
            }
            None if self.fixed_point_position != 0 => {
                return Err(TensorError::InvalidFixedPointPosition {
                    dtype: self.data_type,
                    position: self.fixed_point_position,
                }
                .into());
            }
            _ => {}
        }

        // Sorted by stride, every dimension must start past the furthest
        // element reachable through the smaller-strided dimensions.
        let mut extents: Vec<(usize, usize)> = self
            .strides
            .iter()
            .copied()
            .zip(self.shape.iter().copied())
            .filter(|&(_, extent)| extent > 1)
            .collect();
        extents.sort_unstable();
        let mut span = 0usize;
        for (stride, extent) in extents {
            if stride <= span {
                return Err(TensorError::OverlappingStrides {
                    shape: self.shape.clone(),
                    strides: self.strides.clone(),
                }
                .into());
            }
            span = span.saturating_add(stride.saturating_mul(extent - 1));
        }
        Ok(())
    }

    pub fn num_dimensions(&self) -> usize {
        self.shape.len()
    }

    /// Size along `index`; dimensions past the rank have size 1.
    pub fn dimension(&self, index: usize) -> usize {
        self.shape.get(index).copied().unwrap_or(1)
    }

    pub fn dim(&self, axis: Axis) -> usize {
        self.dimension(axis.index())
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Element stride along `index`; zero for dimensions past the rank.
    pub fn stride(&self, index: usize) -> usize {
        self.strides.get(index).copied().unwrap_or(0)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn fixed_point_position(&self) -> u8 {
        self.fixed_point_position
    }

    /// Number of logical elements in the view.
    pub fn total_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Minimum storage length, in elements, needed to back this view.
    pub fn required_storage_len(&self) -> usize {
        let last: usize = self
            .shape
            .iter()
            .zip(&self.strides)
            .map(|(&dim, &stride)| (dim - 1).saturating_mul(stride))
            .fold(0usize, usize::saturating_add);
        self.offset.saturating_add(last).saturating_add(1)
    }

    /// Storage offset of the element at `coords`. Missing trailing
    /// coordinates are treated as zero.
    pub fn element_offset(&self, coords: &[usize]) -> usize {
        debug_assert!(coords.len() <= self.shape.len());
        debug_assert!(coords.iter().zip(&self.shape).all(|(c, d)| c < d));
        coords.iter().zip(&self.strides).fold(self.offset, |acc, (&c, &s)| acc + c * s)
    }

    /// Whether `self` along `axis` has the same size as `other` along `other_axis`.
    pub fn matches_dimension(&self, axis: usize, other: &TensorInfo, other_axis: usize) -> bool {
        self.dimension(axis) == other.dimension(other_axis)
    }

    /// Same data type and fixed-point position.
    pub fn same_format(&self, other: &TensorInfo) -> bool {
        self.data_type == other.data_type
            && self.fixed_point_position == other.fixed_point_position
    }

    pub fn is_dense(&self) -> bool {
        self.offset == 0 && self.strides == Self::dense_strides(&self.shape)
    }

    /// Human-readable format, e.g. `QS8(fp=5)` or `F32`.
    pub fn format_name(&self) -> String {
        if self.data_type.is_fixed_point() {
            format!("{}(fp={})", self.data_type, self.fixed_point_position)
        } else {
            self.data_type.to_string()
        }
    }
}

impl fmt::Display for TensorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.format_name(), self.shape)
    }
}

// ---------------------------------------------------------------------------
// Shared storage
// ---------------------------------------------------------------------------

/// Fixed-length, shared, lock-protected element buffer.
///
/// The guards only expose slices, so the length observed at construction
/// holds for the buffer's whole lifetime.
pub struct SharedBuffer<T> {
    inner: Arc<RwLock<Box<[T]>>>,
    len: usize,
}

impl<T> SharedBuffer<T> {
    pub fn new(data: Vec<T>) -> Self {
        let len = data.len();
        Self { inner: Arc::new(RwLock::new(data.into_boxed_slice())), len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Acquire shared access. A poisoned lock is recovered: element data has
    /// no invariants a panicking writer could break.
    pub fn read(&self) -> BufferReadGuard<'_, T> {
        let guard = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        BufferReadGuard(guard)
    }

    /// Acquire exclusive access, recovering from poisoning like [`Self::read`].
    pub fn write(&self) -> BufferWriteGuard<'_, T> {
        let guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        BufferWriteGuard(guard)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Address of the shared allocation, used to order lock acquisition.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

impl<T> Clone for SharedBuffer<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), len: self.len }
    }
}

impl<T> fmt::Debug for SharedBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer").field("len", &self.len).finish_non_exhaustive()
    }
}

pub struct BufferReadGuard<'a, T>(RwLockReadGuard<'a, Box<[T]>>);

impl<T> Deref for BufferReadGuard<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

pub struct BufferWriteGuard<'a, T>(RwLockWriteGuard<'a, Box<[T]>>);

impl<T> Deref for BufferWriteGuard<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T> DerefMut for BufferWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.0
    }
}

/// Type-erased storage of a tensor.
#[derive(Debug, Clone)]
pub enum TensorStorage {
    U8(SharedBuffer<u8>),
    I8(SharedBuffer<i8>),
    I16(SharedBuffer<i16>),
    I32(SharedBuffer<i32>),
    F16(SharedBuffer<f16>),
    F32(SharedBuffer<f32>),
    F64(SharedBuffer<f64>),
}

impl TensorStorage {
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::U8(_) => ElementKind::U8,
            Self::I8(_) => ElementKind::I8,
            Self::I16(_) => ElementKind::I16,
            Self::I32(_) => ElementKind::I32,
            Self::F16(_) => ElementKind::F16,
            Self::F32(_) => ElementKind::F32,
            Self::F64(_) => ElementKind::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::U8(b) => b.len(),
            Self::I8(b) => b.len(),
            Self::I16(b) => b.len(),
            Self::I32(b) => b.len(),
            Self::F16(b) => b.len(),
            Self::F32(b) => b.len(),
            Self::F64(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn addr(&self) -> usize {
        match self {
            Self::U8(b) => b.addr(),
            Self::I8(b) => b.addr(),
            Self::I16(b) => b.addr(),
            Self::I32(b) => b.addr(),
            Self::F16(b) => b.addr(),
            Self::F32(b) => b.addr(),
            Self::F64(b) => b.addr(),
        }
    }
}

/// Rust element types that can back a tensor.
pub trait Element: Copy + Send + Sync + fmt::Debug + 'static {
    const KIND: ElementKind;
    const ZERO: Self;

    fn into_storage(data: Vec<Self>) -> TensorStorage;

    fn buffer(storage: &TensorStorage) -> Option<&SharedBuffer<Self>>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident, $zero:expr) => {
        impl Element for $ty {
            const KIND: ElementKind = ElementKind::$variant;
            const ZERO: Self = $zero;

            fn into_storage(data: Vec<Self>) -> TensorStorage {
                TensorStorage::$variant(SharedBuffer::new(data))
            }

            fn buffer(storage: &TensorStorage) -> Option<&SharedBuffer<Self>> {
                match storage {
                    TensorStorage::$variant(b) => Some(b),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(u8, U8, 0);
impl_element!(i8, I8, 0);
impl_element!(i16, I16, 0);
impl_element!(i32, I32, 0);
impl_element!(f16, F16, f16::ZERO);
impl_element!(f32, F32, 0.0);
impl_element!(f64, F64, 0.0);

// ---------------------------------------------------------------------------
// Tensor
// ---------------------------------------------------------------------------

/// Handle to a strided view over shared, caller-owned storage.
#[derive(Debug, Clone)]
pub struct Tensor {
    info: TensorInfo,
    storage: TensorStorage,
}

impl Tensor {
    /// Bind `storage` to `info`, checking element kind and bounds.
    pub fn new(info: TensorInfo, storage: TensorStorage) -> Result<Self> {
        let expected = info.data_type().element_kind();
        if storage.kind() != expected {
            return Err(TensorError::StorageMismatch {
                dtype: info.data_type(),
                expected: expected.name(),
                actual: storage.kind().name(),
            }
            .into());
        }
        let required = info.required_storage_len();
        if storage.len() < required {
            return Err(TensorError::BufferTooSmall { required, actual: storage.len() }.into());
        }
        Ok(Self { info, storage })
    }

    pub fn from_vec<T: Element>(info: TensorInfo, data: Vec<T>) -> Result<Self> {
        Self::new(info, T::into_storage(data))
    }

    /// Dense `F32` tensor.
    pub fn from_f32(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        Self::from_vec(TensorInfo::dense(shape, DataType::F32)?, data)
    }

    /// Zero-filled storage sized for `info`.
    pub fn zeros(info: TensorInfo) -> Result<Self> {
        let len = info.required_storage_len();
        let storage = match info.data_type().element_kind() {
            ElementKind::U8 => u8::into_storage(vec![0; len]),
            ElementKind::I8 => i8::into_storage(vec![0; len]),
            ElementKind::I16 => i16::into_storage(vec![0; len]),
            ElementKind::I32 => i32::into_storage(vec![0; len]),
            ElementKind::F16 => f16::into_storage(vec![f16::ZERO; len]),
            ElementKind::F32 => f32::into_storage(vec![0.0; len]),
            ElementKind::F64 => f64::into_storage(vec![0.0; len]),
        };
        Self::new(info, storage)
    }

    pub fn info(&self) -> &TensorInfo {
        &self.info
    }

    pub fn storage(&self) -> &TensorStorage {
        &self.storage
    }

    pub fn data_type(&self) -> DataType {
        self.info.data_type()
    }

    pub fn shape(&self) -> &[usize] {
        self.info.shape()
    }

    /// Typed buffer handle, `None` if `T` is not this tensor's element type.
    pub fn buffer<T: Element>(&self) -> Option<&SharedBuffer<T>> {
        T::buffer(&self.storage)
    }

    pub fn shares_storage_with(&self, other: &Tensor) -> bool {
        self.storage.addr() == other.storage.addr()
    }

    /// Copy of the raw storage, including elements outside the view.
    pub fn to_vec<T: Element>(&self) -> Option<Vec<T>> {
        self.buffer::<T>().map(|b| b.read().to_vec())
    }

    /// Logical elements of the view in dense order (dimension 0 fastest).
    pub fn gather<T: Element>(&self) -> Option<Vec<T>> {
        let buffer = self.buffer::<T>()?;
        let data = buffer.read();
        let mut out = Vec::with_capacity(self.info.total_elements());
        let mut coords = vec![0usize; self.info.num_dimensions()];
        for _ in 0..self.info.total_elements() {
            out.push(data[self.info.element_offset(&coords)]);
            advance(&mut coords, self.info.shape());
        }
        Some(out)
    }

    /// Overwrite the logical elements of the view from `values` in dense
    /// order. Returns `None` on element type or length mismatch.
    pub fn scatter<T: Element>(&self, values: &[T]) -> Option<()> {
        if values.len() != self.info.total_elements() {
            return None;
        }
        let buffer = self.buffer::<T>()?;
        let mut data = buffer.write();
        let mut coords = vec![0usize; self.info.num_dimensions()];
        for &value in values {
            data[self.info.element_offset(&coords)] = value;
            advance(&mut coords, self.info.shape());
        }
        Some(())
    }
}

/// Increment `coords` in dense order, wrapping to all-zero past the end.
fn advance(coords: &mut [usize], shape: &[usize]) {
    for (c, &d) in coords.iter_mut().zip(shape) {
        *c += 1;
        if *c < d {
            return;
        }
        *c = 0;
    }
}
