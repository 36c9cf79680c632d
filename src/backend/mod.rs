//! Storage technologies behind the uniform handles, and the suffix registry that selects them.
use std::fmt;
use std::ops::Range;

use ndarray::{ArrayD, ArrayViewD};

use crate::Attributes;
use crate::dtype::{DType, Scalar};
use crate::path::{StorePath, split_by_suffix};

#[cfg(feature = "hdf5")]
pub(crate) mod hdf5;
pub(crate) mod mrc;
pub(crate) mod zarr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Zarr hierarchy on the filesystem.
    Zarr,
    /// N5 container, served through the zarr engine.
    N5,
    /// MRC binary volume file.
    Mrc,
    /// HDF5 file.
    Hdf5,
}

impl BackendKind {
    /// Whether the backend stores a hierarchy of keys that can be listed and deleted.
    pub fn is_chunk_store(&self) -> bool {
        matches!(self, BackendKind::Zarr | BackendKind::N5)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendKind::Zarr => "zarr",
            BackendKind::N5 => "n5",
            BackendKind::Mrc => "mrc",
            BackendKind::Hdf5 => "hdf5",
        };
        f.write_str(s)
    }
}

/// Ordered mapping from path suffix to backend.
///
/// Earlier entries take precedence when several suffixes match the same segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRegistry {
    entries: Vec<(String, BackendKind)>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::empty()
            .with(".zarr", BackendKind::Zarr)
            .with(".n5", BackendKind::N5)
            .with(".mrc", BackendKind::Mrc)
            .with(".rec", BackendKind::Mrc)
            .with(".h5", BackendKind::Hdf5)
            .with(".hdf5", BackendKind::Hdf5)
    }
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register `suffix`, replacing any existing entry for it.
    pub fn with(mut self, suffix: impl Into<String>, kind: BackendKind) -> Self {
        self.register(suffix, kind);
        self
    }

    pub fn register(&mut self, suffix: impl Into<String>, kind: BackendKind) {
        let suffix = suffix.into();
        match self.entries.iter_mut().find(|(s, _)| *s == suffix) {
            Some(entry) => entry.1 = kind,
            None => self.entries.push((suffix, kind)),
        }
    }

    pub fn suffixes(&self) -> Vec<&str> {
        self.entries.iter().map(|(s, _)| s.as_str()).collect()
    }

    pub fn kind_of(&self, suffix: &str) -> Option<BackendKind> {
        self.entries
            .iter()
            .find(|(s, _)| s == suffix)
            .map(|(_, k)| *k)
    }

    /// Split `path` and pick the backend for its suffix.
    pub fn classify(&self, path: &str) -> crate::Result<(StorePath, BackendKind)> {
        let split = split_by_suffix(path, &self.suffixes())?;
        let kind = self
            .kind_of(&split.suffix)
            .ok_or_else(|| crate::Error::MalformedPath {
                path: path.to_string(),
            })?;
        Ok((split, kind))
    }
}

/// Operations every array backend provides.
pub(crate) trait ArrayBackend: Send + Sync {
    fn shape(&self) -> Vec<u64>;

    fn chunks(&self) -> Vec<u64>;

    fn dtype(&self) -> DType;

    /// Read from storage; never cached.
    fn attributes(&self) -> crate::Result<Attributes>;

    fn set_attributes(&self, attributes: Attributes) -> crate::Result<()>;

    fn read_region<T: Scalar>(&self, region: &[Range<u64>]) -> crate::Result<ArrayD<T>>;

    fn write_region<T: Scalar>(&self, offset: &[u64], data: ArrayViewD<'_, T>) -> crate::Result<()>;
}

/// Operations every group backend provides.
pub(crate) trait GroupBackend: Send + Sync {
    /// Read from storage; never cached.
    fn attributes(&self) -> crate::Result<Attributes>;

    fn set_attributes(&self, attributes: Attributes) -> crate::Result<()>;

    /// Names of the direct children that are arrays or groups.
    fn member_names(&self) -> crate::Result<Vec<String>>;
}

/// Fail unless `region` lies within `shape`.
pub(crate) fn check_region(shape: &[u64], region: &[Range<u64>]) -> crate::Result<()> {
    let fits = region.len() == shape.len()
        && region
            .iter()
            .zip(shape)
            .all(|(r, &n)| r.start <= r.end && r.end <= n);
    if fits {
        Ok(())
    } else {
        Err(crate::Error::ShapeMismatch {
            expected: shape.to_vec(),
            found: region.iter().map(|r| r.end).collect(),
        })
    }
}

/// The region covered by `shape` elements starting at `offset`.
pub(crate) fn region_at(offset: &[u64], shape: &[usize]) -> Vec<Range<u64>> {
    offset
        .iter()
        .zip(shape)
        .map(|(&o, &n)| o..o + n as u64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_dispatch() {
        let registry = BackendRegistry::default();
        let (split, kind) = registry.classify("/tmp/a.n5/s0").unwrap();
        assert_eq!(kind, BackendKind::N5);
        assert_eq!(split.store_key(), "s0");
        assert_eq!(registry.classify("/tmp/a.mrc").unwrap().1, BackendKind::Mrc);
        assert!(registry.classify("/tmp/a.tif").unwrap_err().is_malformed_path());
    }

    #[test]
    fn registration_is_injectable() {
        let registry = BackendRegistry::empty().with(".zr", BackendKind::Zarr);
        assert_eq!(registry.classify("x.zr/a").unwrap().1, BackendKind::Zarr);
        assert!(registry.classify("x.zarr/a").is_err());

        let registry = BackendRegistry::default().with(".n5", BackendKind::Zarr);
        assert_eq!(registry.kind_of(".n5"), Some(BackendKind::Zarr));
    }

    #[test]
    fn regions() {
        assert!(check_region(&[4, 4], &[0..2, 2..4]).is_ok());
        assert!(check_region(&[4, 4], &[0..2, 2..5]).is_err());
        assert_eq!(region_at(&[2, 0], &[2, 3]), vec![2..4, 0..3]);
    }
}
