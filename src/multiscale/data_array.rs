use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;

use ndarray::{ArrayD, IxDyn, Slice};
use serde::{Deserialize, Serialize};

use super::dialect::Transform;
use crate::chunked::{BlockSource, ChunkedArray};
use crate::dtype::Scalar;

/// Physical positions of the samples along one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub dim: String,
    pub values: Vec<f64>,
    pub units: String,
    /// Axis type, such as `space` or `time`.
    #[serde(rename = "type")]
    pub kind: String,
}

impl Coordinate {
    pub fn new(dim: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            dim: dim.into(),
            values,
            units: String::new(),
            kind: "space".to_string(),
        }
    }

    /// `len` evenly spaced values from `start`.
    pub fn arange(dim: impl Into<String>, len: usize, start: f64, step: f64) -> Self {
        Self::new(dim, (0..len).map(|i| start + step * i as f64).collect())
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn coarsen(&self, factor: usize) -> Self {
        Self {
            values: self
                .values
                .chunks_exact(factor)
                .map(|w| w.iter().sum::<f64>() / factor as f64)
                .collect(),
            ..self.clone()
        }
    }
}

/// A chunked array with a coordinate for every axis: one level of a pyramid.
#[derive(Debug, Clone)]
pub struct DataArray<T> {
    pub data: ChunkedArray<T>,
    pub coords: Vec<Coordinate>,
    pub name: Option<String>,
}

impl<T: Scalar> DataArray<T> {
    /// Fails unless there is one coordinate per axis, of matching length, with distinct names.
    pub fn new(data: ChunkedArray<T>, coords: Vec<Coordinate>) -> crate::Result<Self> {
        let lengths: Vec<usize> = coords.iter().map(Coordinate::len).collect();
        let shape: Vec<usize> = data.shape().iter().map(|&n| n as usize).collect();
        if lengths != shape {
            return Err(crate::Error::cardinality(
                "coordinates and array axes",
                lengths,
            ));
        }
        let mut seen = HashSet::new();
        if let Some(c) = coords.iter().find(|c| !seen.insert(c.dim.as_str())) {
            return Err(crate::Error::DuplicateName { name: c.dim.clone() });
        }
        Ok(Self {
            data,
            coords,
            name: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn dims(&self) -> Vec<&str> {
        self.coords.iter().map(|c| c.dim.as_str()).collect()
    }

    pub fn shape(&self) -> &[u64] {
        self.data.shape()
    }

    pub fn transform(&self) -> Transform {
        Transform::from_coords(&self.coords)
    }

    /// The same level with different chunks.
    pub fn chunk(&self, chunks: &[u64]) -> crate::Result<Self> {
        Ok(Self {
            data: self.data.rechunk(chunks)?,
            ..self.clone()
        })
    }

    /// Downsample by windowed mean; every factor must divide its axis exactly.
    ///
    /// Coordinates are averaged over the same windows. Integer results are rounded.
    pub fn coarsen(&self, factors: &[u64]) -> crate::Result<Self> {
        let shape = self.data.shape();
        let divides = factors.len() == shape.len()
            && factors.iter().zip(shape).all(|(&f, &n)| f > 0 && n % f == 0);
        if !divides {
            return Err(crate::Error::IncompatibleChunking {
                path: self.name.clone().unwrap_or_default(),
                chunks: factors.iter().map(|&f| f as i64).collect(),
                shape: shape.to_vec(),
            });
        }
        let chunks: Vec<u64> = self
            .data
            .chunks()
            .iter()
            .zip(factors)
            .map(|(c, f)| (c / f).max(1))
            .collect();
        let source = Coarsened {
            parent: self.data.clone(),
            factors: factors.to_vec(),
        };
        let coords = self
            .coords
            .iter()
            .zip(factors)
            .map(|(c, &f)| c.coarsen(f as usize))
            .collect();
        Ok(Self {
            data: ChunkedArray::from_source(Arc::new(source), &chunks)?,
            coords,
            name: self.name.clone(),
        })
    }
}

/// `count` levels starting from `level0`, each coarsened from the previous by `factors`.
pub fn pyramid<T: Scalar>(
    level0: DataArray<T>,
    factors: &[u64],
    count: usize,
) -> crate::Result<Vec<DataArray<T>>> {
    let mut levels = vec![level0];
    while levels.len() < count {
        let next = levels[levels.len() - 1].coarsen(factors)?;
        levels.push(next);
    }
    Ok(levels)
}

struct Coarsened<T> {
    parent: ChunkedArray<T>,
    factors: Vec<u64>,
}

impl<T: Scalar> BlockSource<T> for Coarsened<T> {
    fn shape(&self) -> Vec<u64> {
        self.parent
            .shape()
            .iter()
            .zip(&self.factors)
            .map(|(n, f)| n / f)
            .collect()
    }

    fn read(&self, region: &[Range<u64>]) -> crate::Result<ArrayD<T>> {
        let parent_region: Vec<Range<u64>> = region
            .iter()
            .zip(&self.factors)
            .map(|(r, f)| r.start * f..r.end * f)
            .collect();
        let fine = self.parent.read_region(&parent_region)?;
        let factors: Vec<usize> = self.factors.iter().map(|&f| f as usize).collect();
        let window: f64 = factors.iter().product::<usize>() as f64;
        let shape: Vec<usize> = region.iter().map(|r| (r.end - r.start) as usize).collect();
        Ok(ArrayD::from_shape_fn(IxDyn(&shape), |idx| {
            let sum: f64 = fine
                .slice_each_axis(|ax| {
                    let i = ax.axis.index();
                    let start = idx[i] * factors[i];
                    Slice::from(start..start + factors[i])
                })
                .iter()
                .map(|v| v.to_f64())
                .sum();
            T::from_f64(sum / window)
        }))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array;

    use super::*;

    fn level(shape: &[usize]) -> DataArray<u8> {
        let n: usize = shape.iter().product();
        let data = Array::from_iter((0..n).map(|i| (i % 251) as u8))
            .into_shape_with_order(IxDyn(shape))
            .unwrap();
        let chunks: Vec<u64> = shape.iter().map(|&n| n as u64).collect();
        let coords = ["z", "y", "x"][3 - shape.len()..]
            .iter()
            .map(|d| Coordinate::arange(*d, shape[0], 0.0, 1.0).with_units("nm"))
            .collect();
        DataArray::new(ChunkedArray::from_array(data, &chunks).unwrap(), coords).unwrap()
    }

    #[test]
    fn coordinates_must_match_axes() {
        let data = ChunkedArray::from_array(ArrayD::<u8>::zeros(IxDyn(&[2, 3])), &[2, 3]).unwrap();
        let short = vec![Coordinate::arange("y", 2, 0.0, 1.0)];
        assert!(DataArray::new(data.clone(), short).unwrap_err().is_cardinality_mismatch());
        let dup = vec![
            Coordinate::arange("y", 2, 0.0, 1.0),
            Coordinate::arange("y", 3, 0.0, 1.0),
        ];
        assert!(DataArray::new(data, dup).unwrap_err().is_cardinality_mismatch());
    }

    #[test]
    fn coarsen_means_windows() {
        let data = Array::from_iter([0u8, 2, 4, 6, 8, 10, 12, 14])
            .into_shape_with_order(IxDyn(&[2, 4]))
            .unwrap();
        let coords = vec![
            Coordinate::arange("y", 2, 10.0, 1.0),
            Coordinate::arange("x", 4, -30.0, 1.0),
        ];
        let level = DataArray::new(ChunkedArray::from_array(data, &[2, 4]).unwrap(), coords).unwrap();
        let coarse = level.coarsen(&[2, 2]).unwrap();
        assert_eq!(coarse.shape(), &[1, 2]);
        let values = coarse.data.compute().unwrap();
        assert_eq!(values.iter().copied().collect::<Vec<_>>(), vec![5, 9]);
        assert_eq!(coarse.coords[0].values, vec![10.5]);
        assert_eq!(coarse.coords[1].values, vec![-29.5, -27.5]);
        assert_eq!(coarse.transform().scale, vec![1.0, 2.0]);
    }

    #[test]
    fn coarsen_rounds_integer_means() {
        let data = Array::from_iter([1u8, 2, 3, 4, 254, 255])
            .into_shape_with_order(IxDyn(&[6]))
            .unwrap();
        let coords = vec![Coordinate::arange("x", 6, 0.0, 1.0)];
        let level = DataArray::new(ChunkedArray::from_array(data, &[6]).unwrap(), coords).unwrap();
        let values = level.coarsen(&[2]).unwrap().data.compute().unwrap();
        // halves round away from zero rather than truncating
        assert_eq!(values.iter().copied().collect::<Vec<_>>(), vec![2, 4, 255]);
    }

    #[test]
    fn coarsen_requires_divisibility() {
        let level = level(&[3, 3, 3]);
        let err = level.coarsen(&[2, 2, 2]).unwrap_err();
        assert!(err.is_incompatible_chunking());
        assert!(level.coarsen(&[1, 1]).is_err());
    }

    #[test]
    fn pyramid_halves_each_level() {
        let levels = pyramid(level(&[8, 8, 8]), &[2, 2, 2], 3).unwrap();
        let shapes: Vec<Vec<u64>> = levels.iter().map(|l| l.shape().to_vec()).collect();
        assert_eq!(shapes, vec![vec![8, 8, 8], vec![4, 4, 4], vec![2, 2, 2]]);
        assert_eq!(levels[2].transform().scale, vec![4.0, 4.0, 4.0]);
    }
}
