//! Opening and creating nodes from path strings.
use std::path::Path;

use crate::backend::mrc::{MrcArray, validate_section_chunks};
use crate::backend::zarr::{self, NodeType, ZarrArray, ZarrGroup};
use crate::backend::{BackendKind, BackendRegistry};
use crate::chunked::{ChunkedArray, resolve_chunks};
use crate::dtype::Scalar;
use crate::node::{
    AccessMode, ArrayHandle, ArrayInner, CreateOptions, GroupHandle, GroupInner, Location, Node,
};

/// Opens paths with a particular [`BackendRegistry`].
#[derive(Debug, Clone, Default)]
pub struct Accessor {
    registry: BackendRegistry,
}

impl Accessor {
    pub fn new(registry: BackendRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Open or create the node at `path`.
    pub fn access(
        &self,
        path: &str,
        mode: AccessMode,
        options: CreateOptions,
    ) -> crate::Result<Node> {
        let (split, kind) = self.registry.classify(path)?;
        log::debug!("{path:?} dispatched to the {kind} backend in mode {mode}");
        if let Some(spec) = &options.array {
            spec.validate(path)?;
        }
        let container = split.local_container()?;
        let location = Location::new(kind, &container, &split.store_key());
        open_node(&location, mode, options)
    }

    /// Open the existing node at `path` read-only.
    pub fn read(&self, path: &str) -> crate::Result<Node> {
        self.access(path, AccessMode::Read, CreateOptions::default())
    }

    /// A lazy view over the array at `path`.
    ///
    /// Without `chunks` the native chunk shape is used; a `-1` entry spans the whole axis.
    pub fn read_dask<T: Scalar>(
        &self,
        path: &str,
        chunks: Option<&[i64]>,
    ) -> crate::Result<ChunkedArray<T>> {
        let array = self.read(path)?.into_array()?;
        let shape = array.shape();
        let chunks = match (array.kind(), chunks) {
            (_, None) => array.chunks(),
            (BackendKind::Mrc, Some(chunks)) => validate_section_chunks(path, &shape, chunks)?,
            (_, Some(chunks)) => resolve_chunks(path, &shape, chunks)?,
        };
        array.to_chunked()?.rechunk(&chunks)
    }
}

/// [`Accessor::access`] with the default registry.
pub fn access(path: &str, mode: AccessMode, options: CreateOptions) -> crate::Result<Node> {
    Accessor::default().access(path, mode, options)
}

/// [`Accessor::read`] with the default registry.
pub fn read(path: &str) -> crate::Result<Node> {
    Accessor::default().read(path)
}

/// [`Accessor::read_dask`] with the default registry.
pub fn read_dask<T: Scalar>(path: &str, chunks: Option<&[i64]>) -> crate::Result<ChunkedArray<T>> {
    Accessor::default().read_dask(path, chunks)
}

pub(crate) fn open_node(
    location: &Location,
    mode: AccessMode,
    options: CreateOptions,
) -> crate::Result<Node> {
    match location.kind {
        BackendKind::Zarr | BackendKind::N5 => open_chunk_store(location, mode, options),
        BackendKind::Mrc => open_mrc(location, mode, options),
        #[cfg(feature = "hdf5")]
        BackendKind::Hdf5 => crate::backend::hdf5::open(location, mode, options),
        #[cfg(not(feature = "hdf5"))]
        BackendKind::Hdf5 => Err(crate::Error::BackendUnavailable(BackendKind::Hdf5)),
    }
}

fn missing(location: &Location, mode: AccessMode) -> crate::Error {
    crate::Error::backend_state(location.to_string(), mode, "no array or group at this path")
}

fn open_chunk_store(
    location: &Location,
    mode: AccessMode,
    options: CreateOptions,
) -> crate::Result<Node> {
    let container = location.container.as_path();
    let key = location.key.as_str();
    if mode.must_exist() && !container.is_dir() {
        return Err(missing(location, mode));
    }
    let storage = zarr::open_storage(location.kind, container)?;
    let existing = zarr::node_type(&storage, key)?;

    let create = match (mode, existing) {
        (AccessMode::Read | AccessMode::ReadWrite, None) => return Err(missing(location, mode)),
        (AccessMode::WriteNew, Some(_)) => {
            return Err(crate::Error::backend_state(
                location.to_string(),
                mode,
                "a node already exists at this path",
            ));
        }
        (AccessMode::Append, Some(NodeType::Group)) if options.array.is_some() => {
            return Err(crate::Error::backend_state(
                location.to_string(),
                mode,
                "cannot open a group as an array",
            ));
        }
        (AccessMode::Write, Some(_)) => {
            zarr::erase_node(&storage, key)?;
            true
        }
        (_, None) => true,
        (_, Some(_)) => false,
    };

    if create {
        zarr::ensure_parents(&storage, key)?;
    }
    // the container only exists once something was written, so canonicalize late
    let relocate = || Location::new(location.kind, container, key);

    let node = match (create, options.array, existing) {
        (true, Some(spec), _) => {
            let array = ZarrArray::create(storage, location.kind, key, &spec, options.attributes)?;
            Node::Array(ArrayHandle::new(relocate(), mode, ArrayInner::Zarr(array)))
        }
        (true, None, _) => {
            let group = ZarrGroup::create(storage, key, options.attributes)?;
            Node::Group(GroupHandle::new(relocate(), mode, GroupInner::Zarr(group)))
        }
        (false, spec, Some(NodeType::Array)) => {
            let array = ZarrArray::open(storage, key)?;
            let handle = ArrayHandle::new(relocate(), mode, ArrayInner::Zarr(array));
            if let Some(spec) = spec {
                spec.check_matches(&handle)?;
            }
            if !options.attributes.is_empty() {
                handle.update_attrs(options.attributes)?;
            }
            Node::Array(handle)
        }
        (false, _, _) => {
            let group = ZarrGroup::open(storage, key)?;
            let handle = GroupHandle::new(relocate(), mode, GroupInner::Zarr(group));
            if !options.attributes.is_empty() {
                handle.update_attrs(options.attributes)?;
            }
            Node::Group(handle)
        }
    };
    Ok(node)
}

fn open_mrc(location: &Location, mode: AccessMode, options: CreateOptions) -> crate::Result<Node> {
    if !location.key.is_empty() {
        return Err(crate::Error::Unsupported(format!(
            "MRC files hold a single volume; cannot address {:?} within {}",
            location.key,
            location.container.display()
        )));
    }
    let path: &Path = &location.container;
    let exists = path.is_file();
    if !options.attributes.is_empty() {
        log::warn!("MRC attributes are derived from the header; ignoring supplied attributes");
    }
    let array = match (mode, exists) {
        (AccessMode::Read | AccessMode::ReadWrite, false) => return Err(missing(location, mode)),
        (AccessMode::WriteNew, true) => {
            return Err(crate::Error::backend_state(
                location.to_string(),
                mode,
                "file already exists",
            ));
        }
        (AccessMode::Read | AccessMode::ReadWrite | AccessMode::Append, true) => {
            MrcArray::open(path)?
        }
        (_, _) => {
            let spec = options.array.as_ref().ok_or_else(|| {
                crate::Error::Unsupported("MRC files cannot hold groups".into())
            })?;
            if spec.compressor != Default::default() {
                log::warn!("MRC files are not compressed; ignoring {:?}", spec.compressor);
            }
            MrcArray::create(path, &spec.shape, spec.dtype)?
        }
    };
    let location = Location::new(BackendKind::Mrc, path, "");
    let handle = ArrayHandle::new(location, mode, ArrayInner::Mrc(array));
    if exists && mode == AccessMode::Append {
        if let Some(spec) = &options.array {
            spec.check_matches(&handle)?;
        }
    }
    Ok(Node::Array(handle))
}
