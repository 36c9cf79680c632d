//! Uniform handles over arrays and groups in any backend.
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use ndarray::{ArrayD, ArrayViewD, IxDyn};
use zarrs::storage::ReadableWritableListableStorage;

use crate::Attributes;
use crate::backend::mrc::MrcArray;
use crate::backend::zarr::{self, ZarrArray, ZarrGroup};
use crate::backend::{ArrayBackend, BackendKind, GroupBackend};
use crate::chunked::{ChunkedArray, grid_regions};
use crate::compression::Compressor;
use crate::dtype::{DType, Scalar};

#[cfg(feature = "hdf5")]
use crate::backend::hdf5::{H5Array, H5Group};

/// How a node is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessMode {
    /// `r`: the node must exist; no writes.
    #[default]
    Read,
    /// `r+`: the node must exist.
    ReadWrite,
    /// `a`: open the node if it exists, create it otherwise.
    Append,
    /// `w`: create, removing anything already at the path.
    Write,
    /// `w-`: create; fail if the node exists.
    WriteNew,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "r",
            AccessMode::ReadWrite => "r+",
            AccessMode::Append => "a",
            AccessMode::Write => "w",
            AccessMode::WriteNew => "w-",
        }
    }

    pub fn is_writable(&self) -> bool {
        !matches!(self, AccessMode::Read)
    }

    pub fn must_exist(&self) -> bool {
        matches!(self, AccessMode::Read | AccessMode::ReadWrite)
    }

    /// The mode used for children reached through a parent handle: never destructive.
    pub(crate) fn for_child(&self) -> Self {
        if self.is_writable() {
            AccessMode::ReadWrite
        } else {
            AccessMode::Read
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" => Ok(AccessMode::Read),
            "r+" => Ok(AccessMode::ReadWrite),
            "a" => Ok(AccessMode::Append),
            "w" => Ok(AccessMode::Write),
            "w-" | "x" => Ok(AccessMode::WriteNew),
            other => Err(crate::Error::Unsupported(format!("access mode {other:?}"))),
        }
    }
}

/// Shape, type and storage layout of an array to create.
#[derive(Debug, Clone, PartialEq)]
pub struct ArraySpec {
    pub shape: Vec<u64>,
    pub dtype: DType,
    /// `None` stores the whole array as one chunk.
    pub chunks: Option<Vec<u64>>,
    pub compressor: Compressor,
    pub fill_value: f64,
}

impl ArraySpec {
    pub fn new(shape: impl Into<Vec<u64>>, dtype: DType) -> Self {
        Self {
            shape: shape.into(),
            dtype,
            chunks: None,
            compressor: Compressor::default(),
            fill_value: 0.0,
        }
    }

    pub fn with_chunks(mut self, chunks: impl Into<Vec<u64>>) -> Self {
        self.chunks = Some(chunks.into());
        self
    }

    pub fn with_compressor(mut self, compressor: Compressor) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn with_fill_value(mut self, fill_value: f64) -> Self {
        self.fill_value = fill_value;
        self
    }

    /// Chunk shape to store with; zero-sized edges become 1.
    pub(crate) fn resolved_chunks(&self) -> Vec<u64> {
        self.chunks
            .as_ref()
            .unwrap_or(&self.shape)
            .iter()
            .map(|&c| c.max(1))
            .collect()
    }

    /// Fail unless the existing `array` has this spec's shape and data type.
    pub(crate) fn check_matches(&self, array: &ArrayHandle) -> crate::Result<()> {
        let shape = array.shape();
        if shape != self.shape {
            return Err(crate::Error::ShapeMismatch {
                expected: self.shape.clone(),
                found: shape,
            });
        }
        if array.dtype() != self.dtype {
            return Err(crate::Error::DtypeMismatch {
                expected: self.dtype.to_string(),
                found: array.dtype().to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn validate(&self, path: &str) -> crate::Result<()> {
        if let Some(chunks) = &self.chunks {
            if chunks.len() != self.shape.len() || chunks.contains(&0) {
                return Err(crate::Error::IncompatibleChunking {
                    path: path.to_string(),
                    chunks: chunks.iter().map(|&c| c as i64).collect(),
                    shape: self.shape.clone(),
                });
            }
        }
        Ok(())
    }
}

/// What to create when a mode allows creation.
///
/// With an [`ArraySpec`] an array is created; without one, a group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateOptions {
    pub array: Option<ArraySpec>,
    pub attributes: Attributes,
}

impl CreateOptions {
    pub fn group(attributes: Attributes) -> Self {
        Self {
            array: None,
            attributes,
        }
    }

    pub fn array(spec: ArraySpec) -> Self {
        Self {
            array: Some(spec),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Where a node lives; two handles are equal when their locations are.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub kind: BackendKind,
    pub container: PathBuf,
    /// `/`-separated, no leading or trailing separator. Empty at the root.
    pub key: String,
}

impl Location {
    pub(crate) fn new(kind: BackendKind, container: &Path, key: &str) -> Self {
        let container = std::fs::canonicalize(container)
            .or_else(|_| std::path::absolute(container))
            .unwrap_or_else(|_| container.to_path_buf());
        Self {
            kind,
            container,
            key: key.trim_matches('/').to_string(),
        }
    }

    pub(crate) fn child(&self, name: &str) -> Self {
        let name = name.trim_matches('/');
        let key = if self.key.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", self.key)
        };
        Self {
            key,
            ..self.clone()
        }
    }

    /// `/`-rooted node name.
    pub fn name(&self) -> String {
        format!("/{}", self.key)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.key.is_empty() {
            write!(f, "{}", self.container.display())
        } else {
            write!(f, "{}/{}", self.container.display(), self.key)
        }
    }
}

pub(crate) enum ArrayInner {
    Zarr(ZarrArray),
    Mrc(MrcArray),
    #[cfg(feature = "hdf5")]
    Hdf5(H5Array),
}

macro_rules! dispatch_array {
    ($inner:expr, $backend:ident => $body:expr) => {
        match $inner {
            ArrayInner::Zarr($backend) => $body,
            ArrayInner::Mrc($backend) => $body,
            #[cfg(feature = "hdf5")]
            ArrayInner::Hdf5($backend) => $body,
        }
    };
}

/// An opened array.
///
/// Cloning is cheap; clones share the backend state. Attributes are always read from storage.
#[derive(Clone)]
pub struct ArrayHandle {
    location: Location,
    mode: AccessMode,
    inner: Arc<ArrayInner>,
}

impl ArrayHandle {
    pub(crate) fn new(location: Location, mode: AccessMode, inner: ArrayInner) -> Self {
        Self {
            location,
            mode,
            inner: Arc::new(inner),
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn kind(&self) -> BackendKind {
        self.location.kind
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn name(&self) -> String {
        self.location.name()
    }

    pub fn shape(&self) -> Vec<u64> {
        dispatch_array!(self.inner.as_ref(), a => a.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn dtype(&self) -> DType {
        dispatch_array!(self.inner.as_ref(), a => a.dtype())
    }

    /// The native chunk shape.
    pub fn chunks(&self) -> Vec<u64> {
        dispatch_array!(self.inner.as_ref(), a => a.chunks())
    }

    pub fn attrs(&self) -> crate::Result<Attributes> {
        dispatch_array!(self.inner.as_ref(), a => a.attributes())
    }

    /// Replace all attributes.
    pub fn set_attrs(&self, attributes: Attributes) -> crate::Result<()> {
        self.check_writable("set attributes")?;
        dispatch_array!(self.inner.as_ref(), a => a.set_attributes(attributes))
    }

    /// Merge `attributes` into the stored ones, overwriting existing keys.
    pub fn update_attrs(&self, attributes: Attributes) -> crate::Result<()> {
        let mut current = self.attrs()?;
        current.extend(attributes);
        self.set_attrs(current)
    }

    pub fn read_all<T: Scalar>(&self) -> crate::Result<ArrayD<T>> {
        let region: Vec<Range<u64>> = self.shape().into_iter().map(|n| 0..n).collect();
        self.read_region(&region)
    }

    pub fn read_region<T: Scalar>(&self, region: &[Range<u64>]) -> crate::Result<ArrayD<T>> {
        dispatch_array!(self.inner.as_ref(), a => a.read_region(region))
    }

    pub fn write_region<T: Scalar>(
        &self,
        offset: &[u64],
        data: ArrayViewD<'_, T>,
    ) -> crate::Result<()> {
        self.check_writable("write data")?;
        dispatch_array!(self.inner.as_ref(), a => a.write_region(offset, data))
    }

    /// Write `value` to every element, one native chunk at a time.
    pub fn fill<T: Scalar>(&self, value: T) -> crate::Result<()> {
        self.check_writable("write data")?;
        for region in grid_regions(&self.shape(), &self.chunks()) {
            let offset: Vec<u64> = region.iter().map(|r| r.start).collect();
            let shape: Vec<usize> = region.iter().map(|r| (r.end - r.start) as usize).collect();
            let block = ArrayD::from_elem(IxDyn(&shape), value);
            self.write_region(&offset, block.view())?;
        }
        Ok(())
    }

    /// A lazy view over this array, partitioned by its native chunks.
    pub fn to_chunked<T: Scalar>(&self) -> crate::Result<ChunkedArray<T>> {
        ChunkedArray::from_handle(self.clone())
    }

    /// Every physical key stored under this array.
    pub fn store_keys(&self) -> crate::Result<Vec<String>> {
        let (storage, key) = self.chunk_storage()?;
        zarr::keys_under(storage, key)
    }

    pub(crate) fn chunk_storage(&self) -> crate::Result<(&ReadableWritableListableStorage, &str)> {
        match self.inner.as_ref() {
            ArrayInner::Zarr(a) => Ok((a.storage(), &self.location.key)),
            _ => Err(crate::Error::Unsupported(format!(
                "{} arrays are not key-value stores",
                self.kind()
            ))),
        }
    }

    pub(crate) fn check_writable(&self, action: &str) -> crate::Result<()> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(crate::Error::backend_state(
                self.location.to_string(),
                self.mode,
                format!("cannot {action} through a read-only handle"),
            ))
        }
    }
}

impl PartialEq for ArrayHandle {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location
    }
}

impl Eq for ArrayHandle {}

impl fmt::Debug for ArrayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayHandle")
            .field("location", &self.location)
            .field("mode", &self.mode)
            .field("shape", &self.shape())
            .field("dtype", &self.dtype())
            .finish()
    }
}

pub(crate) enum GroupInner {
    Zarr(ZarrGroup),
    #[cfg(feature = "hdf5")]
    Hdf5(H5Group),
}

macro_rules! dispatch_group {
    ($inner:expr, $backend:ident => $body:expr) => {
        match $inner {
            GroupInner::Zarr($backend) => $body,
            #[cfg(feature = "hdf5")]
            GroupInner::Hdf5($backend) => $body,
        }
    };
}

/// An opened group.
#[derive(Clone)]
pub struct GroupHandle {
    location: Location,
    mode: AccessMode,
    inner: Arc<GroupInner>,
}

impl GroupHandle {
    pub(crate) fn new(location: Location, mode: AccessMode, inner: GroupInner) -> Self {
        Self {
            location,
            mode,
            inner: Arc::new(inner),
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn kind(&self) -> BackendKind {
        self.location.kind
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn name(&self) -> String {
        self.location.name()
    }

    pub fn attrs(&self) -> crate::Result<Attributes> {
        dispatch_group!(self.inner.as_ref(), g => g.attributes())
    }

    pub fn set_attrs(&self, attributes: Attributes) -> crate::Result<()> {
        self.check_writable()?;
        dispatch_group!(self.inner.as_ref(), g => g.set_attributes(attributes))
    }

    pub fn update_attrs(&self, attributes: Attributes) -> crate::Result<()> {
        let mut current = self.attrs()?;
        current.extend(attributes);
        self.set_attrs(current)
    }

    /// Names of the direct children, sorted.
    pub fn member_names(&self) -> crate::Result<Vec<String>> {
        dispatch_group!(self.inner.as_ref(), g => g.member_names())
    }

    /// Open the child array `name`.
    pub fn array(&self, name: &str) -> crate::Result<ArrayHandle> {
        self.child(name)?.into_array()
    }

    /// Open the child group `name`.
    pub fn group(&self, name: &str) -> crate::Result<GroupHandle> {
        self.child(name)?.into_group()
    }

    /// Open the child `name`, whichever kind of node it is.
    pub fn child(&self, name: &str) -> crate::Result<Node> {
        let location = self.location.child(name);
        crate::access::open_node(
            &location,
            self.mode.for_child(),
            CreateOptions::default(),
        )
    }

    pub fn store_keys(&self) -> crate::Result<Vec<String>> {
        let (storage, key) = self.chunk_storage()?;
        zarr::keys_under(storage, key)
    }

    pub(crate) fn chunk_storage(&self) -> crate::Result<(&ReadableWritableListableStorage, &str)> {
        match self.inner.as_ref() {
            GroupInner::Zarr(g) => Ok((g.storage(), &self.location.key)),
            #[cfg(feature = "hdf5")]
            GroupInner::Hdf5(_) => Err(crate::Error::Unsupported(
                "hdf5 groups are not key-value stores".into(),
            )),
        }
    }

    pub(crate) fn check_writable(&self) -> crate::Result<()> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(crate::Error::backend_state(
                self.location.to_string(),
                self.mode,
                "cannot modify a group through a read-only handle",
            ))
        }
    }
}

impl PartialEq for GroupHandle {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location
    }
}

impl Eq for GroupHandle {}

impl fmt::Debug for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupHandle")
            .field("location", &self.location)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Either kind of node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Array(ArrayHandle),
    Group(GroupHandle),
}

impl Node {
    pub fn location(&self) -> &Location {
        match self {
            Node::Array(a) => a.location(),
            Node::Group(g) => g.location(),
        }
    }

    pub fn mode(&self) -> AccessMode {
        match self {
            Node::Array(a) => a.mode(),
            Node::Group(g) => g.mode(),
        }
    }

    pub fn attrs(&self) -> crate::Result<Attributes> {
        match self {
            Node::Array(a) => a.attrs(),
            Node::Group(g) => g.attrs(),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Node::Array(_))
    }

    pub fn into_array(self) -> crate::Result<ArrayHandle> {
        match self {
            Node::Array(a) => Ok(a),
            Node::Group(g) => Err(crate::Error::backend_state(
                g.location().to_string(),
                g.mode(),
                "expected an array, found a group",
            )),
        }
    }

    pub fn into_group(self) -> crate::Result<GroupHandle> {
        match self {
            Node::Group(g) => Ok(g),
            Node::Array(a) => Err(crate::Error::backend_state(
                a.location().to_string(),
                a.mode(),
                "expected a group, found an array",
            )),
        }
    }

    pub fn store_keys(&self) -> crate::Result<Vec<String>> {
        match self {
            Node::Array(a) => a.store_keys(),
            Node::Group(g) => g.store_keys(),
        }
    }
}
