use crate::error::{Error, Result};
use std::sync::Arc;

/// Element type reported by arrays flowing through the store.
///
/// GRIB fields decode to 32-bit floats; coordinate axes derived from header
/// metadata are kept as 64-bit floats. Values are carried as `f64` either
/// way, the dtype records what the source provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    F32,
    F64,
}

impl DType {
    pub fn name(&self) -> &'static str {
        match self {
            DType::F32 => "float32",
            DType::F64 => "float64",
        }
    }
}

/// A plain in-memory array: a row-major value buffer plus its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayData {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub values: Vec<f64>,
}

impl ArrayData {
    pub fn new(shape: Vec<usize>, dtype: DType, values: Vec<f64>) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), values.len());
        Self {
            shape,
            dtype,
            values,
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Applies an outer-indexing expression and returns the selected values
    /// as a new in-memory array.
    pub fn index(&self, key: &[Indexer]) -> Result<ArrayData> {
        let resolved = ResolvedIndex::normalize(key, &self.shape)?;
        Ok(self.select(&resolved))
    }

    pub(crate) fn select(&self, key: &ResolvedIndex) -> ArrayData {
        let (shape, values) = outer_select(&self.shape, &self.values, key);
        ArrayData::new(shape, self.dtype, values)
    }
}

/// One indexer per dimension: an integer (drops the axis), a slice with a
/// positive step, or an explicit index array (orthogonal fancy indexing).
///
/// Vectorized fancy indexing, where index arrays broadcast against each
/// other, is intentionally unsupported.
#[derive(Debug, Clone, PartialEq)]
pub enum Indexer {
    Index(usize),
    Slice {
        start: usize,
        stop: Option<usize>,
        step: usize,
    },
    Indices(Vec<usize>),
}

impl Indexer {
    /// The full-extent slice, `[:]`.
    pub fn all() -> Self {
        Indexer::Slice {
            start: 0,
            stop: None,
            step: 1,
        }
    }

    pub fn slice(start: usize, stop: usize) -> Self {
        Indexer::Slice {
            start,
            stop: Some(stop),
            step: 1,
        }
    }
}

/// The concrete selection for one axis after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum DimSelection {
    /// Integer indexing; the axis is dropped from the result.
    Scalar(usize),
    /// Slice or index-array indexing; the axis survives.
    Many(Vec<usize>),
}

/// An outer-indexing expression validated and resolved against a shape.
///
/// Every position is in bounds, so downstream consumers can gather without
/// re-checking.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedIndex {
    pub dims: Vec<DimSelection>,
}

impl ResolvedIndex {
    /// Validates `key` against `shape`, turning each indexer into explicit
    /// positions. Out-of-bounds positions and rank mismatches are fatal
    /// here, before any external read happens.
    pub fn normalize(key: &[Indexer], shape: &[usize]) -> Result<Self> {
        if key.len() != shape.len() {
            return Err(Error::IndexerMismatch {
                got: key.len(),
                expected: shape.len(),
            });
        }

        let mut dims = Vec::with_capacity(key.len());
        for (axis, (indexer, &size)) in key.iter().zip(shape).enumerate() {
            let selection = match indexer {
                Indexer::Index(i) => {
                    check_bounds(*i, axis, size)?;
                    DimSelection::Scalar(*i)
                }
                Indexer::Slice { start, stop, step } => {
                    if *step == 0 {
                        return Err(Error::ZeroSliceStep { axis });
                    }
                    let stop = stop.unwrap_or(size).min(size);
                    let positions: Vec<usize> = (*start..stop).step_by(*step).collect();
                    DimSelection::Many(positions)
                }
                Indexer::Indices(list) => {
                    for &i in list {
                        check_bounds(i, axis, size)?;
                    }
                    DimSelection::Many(list.clone())
                }
            };
            dims.push(selection);
        }
        Ok(Self { dims })
    }

    /// The identity selection over `shape`.
    pub fn full(shape: &[usize]) -> Self {
        let dims = shape
            .iter()
            .map(|&size| DimSelection::Many((0..size).collect()))
            .collect();
        Self { dims }
    }

    /// Shape of the array produced by applying this selection.
    pub fn result_shape(&self) -> Vec<usize> {
        self.dims
            .iter()
            .filter_map(|d| match d {
                DimSelection::Scalar(_) => None,
                DimSelection::Many(list) => Some(list.len()),
            })
            .collect()
    }

    /// Composes a selection made against this selection's *result* into a
    /// single selection against the original array.
    pub fn compose(&self, inner: &ResolvedIndex) -> Result<ResolvedIndex> {
        let outer_rank = self.result_shape().len();
        if inner.dims.len() != outer_rank {
            return Err(Error::IndexerMismatch {
                got: inner.dims.len(),
                expected: outer_rank,
            });
        }

        let mut inner_iter = inner.dims.iter();
        let mut dims = Vec::with_capacity(self.dims.len());
        for dim in &self.dims {
            match dim {
                DimSelection::Scalar(i) => dims.push(DimSelection::Scalar(*i)),
                DimSelection::Many(list) => {
                    // normalize() bounds-checked the inner positions against
                    // result_shape(), so the lookups cannot fail.
                    let composed = match inner_iter.next() {
                        Some(DimSelection::Scalar(j)) => DimSelection::Scalar(list[*j]),
                        Some(DimSelection::Many(js)) => {
                            DimSelection::Many(js.iter().map(|&j| list[j]).collect())
                        }
                        None => unreachable!("rank checked above"),
                    };
                    dims.push(composed);
                }
            }
        }
        Ok(ResolvedIndex { dims })
    }
}

fn check_bounds(index: usize, axis: usize, size: usize) -> Result<()> {
    if index >= size {
        return Err(Error::IndexOutOfBounds { index, axis, size });
    }
    Ok(())
}

/// Gathers `key` out of a row-major buffer of the given shape.
pub(crate) fn outer_select(
    shape: &[usize],
    values: &[f64],
    key: &ResolvedIndex,
) -> (Vec<usize>, Vec<f64>) {
    debug_assert_eq!(shape.len(), key.dims.len());

    let mut strides = vec![1usize; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }

    let lists: Vec<&[usize]> = key
        .dims
        .iter()
        .map(|d| match d {
            DimSelection::Scalar(i) => std::slice::from_ref(i),
            DimSelection::Many(list) => list.as_slice(),
        })
        .collect();

    let out_shape = key.result_shape();
    let total: usize = lists.iter().map(|l| l.len()).product();
    let mut out = Vec::with_capacity(total);

    // Odometer over the per-axis position lists, innermost axis fastest.
    let mut cursor = vec![0usize; lists.len()];
    for _ in 0..total {
        let offset: usize = cursor
            .iter()
            .zip(&lists)
            .zip(&strides)
            .map(|((&c, list), stride)| list[c] * stride)
            .sum();
        out.push(values[offset]);

        for axis in (0..cursor.len()).rev() {
            cursor[axis] += 1;
            if cursor[axis] < lists[axis].len() {
                break;
            }
            cursor[axis] = 0;
        }
    }

    (out_shape, out)
}

/// The array-like contract a backend must provide: a shape, a dtype, and an
/// indexed read. Reads receive a fully validated selection.
pub trait BackendArray: Send + Sync {
    fn shape(&self) -> &[usize];
    fn dtype(&self) -> DType;
    fn read(&self, key: &ResolvedIndex) -> Result<ArrayData>;
}

/// Defers outer indexing on a backend array until values are actually
/// needed.
///
/// Successive selections compose into a single resolved index, so a chain
/// of `select` calls still costs one backend read at materialization time.
/// Nothing is cached; every `read`/`get` goes back to the backend.
#[derive(Clone)]
pub struct LazilyIndexedArray {
    array: Arc<dyn BackendArray>,
    key: ResolvedIndex,
}

impl LazilyIndexedArray {
    pub fn new(array: Arc<dyn BackendArray>) -> Self {
        let key = ResolvedIndex::full(array.shape());
        Self { array, key }
    }

    pub fn shape(&self) -> Vec<usize> {
        self.key.result_shape()
    }

    pub fn dtype(&self) -> DType {
        self.array.dtype()
    }

    /// Narrows the view without reading.
    pub fn select(&self, key: &[Indexer]) -> Result<Self> {
        let inner = ResolvedIndex::normalize(key, &self.shape())?;
        Ok(Self {
            array: Arc::clone(&self.array),
            key: self.key.compose(&inner)?,
        })
    }

    /// Reads the selected values through the backend.
    pub fn get(&self, key: &[Indexer]) -> Result<ArrayData> {
        let inner = ResolvedIndex::normalize(key, &self.shape())?;
        self.array.read(&self.key.compose(&inner)?)
    }

    /// Materializes the whole current view.
    pub fn read(&self) -> Result<ArrayData> {
        self.array.read(&self.key)
    }
}

impl std::fmt::Debug for LazilyIndexedArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazilyIndexedArray")
            .field("shape", &self.shape())
            .field("dtype", &self.dtype())
            .finish()
    }
}
