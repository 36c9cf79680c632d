//! Lazily evaluated arrays partitioned into a regular grid of blocks.
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, Mutex};

use ndarray::{ArrayD, IxDyn, Slice};
use rayon::prelude::*;

use crate::dtype::{DType, Scalar};
use crate::node::ArrayHandle;

/// Something blocks can be read from.
pub trait BlockSource<T>: Send + Sync {
    fn shape(&self) -> Vec<u64>;

    /// Materialize `region`, which lies within [`BlockSource::shape`].
    fn read(&self, region: &[Range<u64>]) -> crate::Result<ArrayD<T>>;
}

fn slice_of(region: &[Range<u64>]) -> impl Fn(ndarray::AxisDescription) -> Slice + '_ {
    |ax| {
        let r = &region[ax.axis.index()];
        Slice::from(r.start as usize..r.end as usize)
    }
}

impl<T: Scalar> BlockSource<T> for ArrayD<T> {
    fn shape(&self) -> Vec<u64> {
        self.shape().iter().map(|&n| n as u64).collect()
    }

    fn read(&self, region: &[Range<u64>]) -> crate::Result<ArrayD<T>> {
        crate::backend::check_region(&<Self as BlockSource<T>>::shape(self), region)?;
        Ok(self.slice_each_axis(slice_of(region)).to_owned())
    }
}

impl<T: Scalar> BlockSource<T> for ArrayHandle {
    fn shape(&self) -> Vec<u64> {
        ArrayHandle::shape(self)
    }

    fn read(&self, region: &[Range<u64>]) -> crate::Result<ArrayD<T>> {
        self.read_region(region)
    }
}

/// The regions of a regular grid over `shape`, in C order. Edge blocks are truncated.
pub fn grid_regions(shape: &[u64], chunks: &[u64]) -> Vec<Vec<Range<u64>>> {
    let axes: Vec<Vec<Range<u64>>> = shape
        .iter()
        .zip(chunks)
        .map(|(&n, &c)| {
            let c = c.max(1);
            (0..n.div_ceil(c))
                .map(|i| i * c..((i + 1) * c).min(n))
                .collect()
        })
        .collect();
    axes.iter().fold(vec![Vec::new()], |acc, ranges| {
        acc.into_iter()
            .flat_map(|prefix| {
                ranges.iter().map(move |r| {
                    let mut region = prefix.clone();
                    region.push(r.clone());
                    region
                })
            })
            .collect()
    })
}

/// Resolve a chunk request against `shape`: `-1` spans the axis, positive values are taken as is.
pub(crate) fn resolve_chunks(path: &str, shape: &[u64], chunks: &[i64]) -> crate::Result<Vec<u64>> {
    let incompatible = || crate::Error::IncompatibleChunking {
        path: path.to_string(),
        chunks: chunks.to_vec(),
        shape: shape.to_vec(),
    };
    if chunks.len() != shape.len() {
        return Err(incompatible());
    }
    chunks
        .iter()
        .zip(shape)
        .map(|(&c, &n)| match c {
            -1 => Ok(n.max(1)),
            c if c > 0 => Ok(c as u64),
            _ => Err(incompatible()),
        })
        .collect()
}

/// A lazy array of known shape, read block by block from a [`BlockSource`].
pub struct ChunkedArray<T> {
    source: Arc<dyn BlockSource<T>>,
    shape: Vec<u64>,
    chunks: Vec<u64>,
}

impl<T> Clone for ChunkedArray<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            shape: self.shape.clone(),
            chunks: self.chunks.clone(),
        }
    }
}

impl<T> fmt::Debug for ChunkedArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedArray")
            .field("shape", &self.shape)
            .field("chunks", &self.chunks)
            .finish_non_exhaustive()
    }
}

impl<T: Scalar> ChunkedArray<T> {
    pub fn from_source(source: Arc<dyn BlockSource<T>>, chunks: &[u64]) -> crate::Result<Self> {
        let shape = source.shape();
        Self::check_chunks(&shape, chunks)?;
        Ok(Self {
            source,
            shape,
            chunks: chunks.to_vec(),
        })
    }

    pub fn from_array(data: ArrayD<T>, chunks: &[u64]) -> crate::Result<Self> {
        Self::from_source(Arc::new(data), chunks)
    }

    /// Blocks follow the array's native chunks.
    pub fn from_handle(handle: ArrayHandle) -> crate::Result<Self> {
        crate::dtype::check_dtype::<T>(handle.dtype())?;
        let chunks = handle.chunks();
        Self::from_source(Arc::new(handle), &chunks)
    }

    fn check_chunks(shape: &[u64], chunks: &[u64]) -> crate::Result<()> {
        if chunks.len() != shape.len() || chunks.contains(&0) {
            return Err(crate::Error::IncompatibleChunking {
                path: String::new(),
                chunks: chunks.iter().map(|&c| c as i64).collect(),
                shape: shape.to_vec(),
            });
        }
        Ok(())
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// Edge length of a full block along each axis.
    pub fn chunks(&self) -> &[u64] {
        &self.chunks
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    pub fn len(&self) -> u64 {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The same data with different block boundaries.
    pub fn rechunk(&self, chunks: &[u64]) -> crate::Result<Self> {
        Self::from_source(self.source.clone(), chunks)
    }

    /// Number of blocks along each axis.
    pub fn grid_shape(&self) -> Vec<u64> {
        self.shape
            .iter()
            .zip(&self.chunks)
            .map(|(n, c)| n.div_ceil(*c))
            .collect()
    }

    pub fn num_blocks(&self) -> usize {
        self.grid_shape().iter().product::<u64>() as usize
    }

    pub fn block_regions(&self) -> Vec<Vec<Range<u64>>> {
        grid_regions(&self.shape, &self.chunks)
    }

    /// The block at grid position `index`.
    pub fn block(&self, index: &[u64]) -> crate::Result<ArrayD<T>> {
        let grid = self.grid_shape();
        if index.len() != grid.len() || index.iter().zip(&grid).any(|(i, n)| i >= n) {
            return Err(crate::Error::ShapeMismatch {
                expected: grid,
                found: index.to_vec(),
            });
        }
        let region: Vec<Range<u64>> = index
            .iter()
            .zip(&self.chunks)
            .zip(&self.shape)
            .map(|((i, c), n)| i * c..((i + 1) * c).min(*n))
            .collect();
        self.read_region(&region)
    }

    pub fn read_region(&self, region: &[Range<u64>]) -> crate::Result<ArrayD<T>> {
        crate::backend::check_region(&self.shape, region)?;
        log::trace!("reading block {region:?}");
        self.source.read(region)
    }

    /// Read every block in parallel, copying each into the result as soon as it is read.
    pub fn compute(&self) -> crate::Result<ArrayD<T>> {
        let dims: Vec<usize> = self.shape.iter().map(|&n| n as usize).collect();
        let out = Mutex::new(ArrayD::<T>::default(IxDyn(&dims)));
        self.block_regions()
            .into_par_iter()
            .try_for_each(|region| -> crate::Result<()> {
                let block = self.read_region(&region)?;
                let mut out = out
                    .lock()
                    .map_err(|_| crate::Error::general("a block copy panicked"))?;
                out.slice_each_axis_mut(slice_of(&region)).assign(&block);
                Ok(())
            })?;
        out.into_inner()
            .map_err(|_| crate::Error::general("a block copy panicked"))
    }
}

/// Anything with a shape and an element type, for sizing new arrays.
pub trait ArrayLike {
    fn shape(&self) -> Vec<u64>;

    fn dtype(&self) -> DType;

    /// Preferred chunk shape, if the value has one.
    fn chunks(&self) -> Option<Vec<u64>> {
        None
    }
}

impl<T: Scalar> ArrayLike for ChunkedArray<T> {
    fn shape(&self) -> Vec<u64> {
        self.shape.clone()
    }

    fn dtype(&self) -> DType {
        T::DTYPE
    }

    fn chunks(&self) -> Option<Vec<u64>> {
        Some(self.chunks.clone())
    }
}

impl<T: Scalar> ArrayLike for ArrayD<T> {
    fn shape(&self) -> Vec<u64> {
        <Self as BlockSource<T>>::shape(self)
    }

    fn dtype(&self) -> DType {
        T::DTYPE
    }
}

impl ArrayLike for ArrayHandle {
    fn shape(&self) -> Vec<u64> {
        ArrayHandle::shape(self)
    }

    fn dtype(&self) -> DType {
        ArrayHandle::dtype(self)
    }

    fn chunks(&self) -> Option<Vec<u64>> {
        Some(ArrayHandle::chunks(self))
    }
}
