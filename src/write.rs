//! Writing chunked arrays into storage, initializing groups, and deleting branches.
use std::collections::HashSet;
use std::fmt;

use rayon::prelude::*;

use crate::Attributes;
use crate::access::Accessor;
use crate::backend::BackendKind;
use crate::backend::zarr;
use crate::chunked::{ArrayLike, ChunkedArray};
use crate::compression::Compressor;
use crate::dtype::Scalar;
use crate::node::{AccessMode, ArrayHandle, ArraySpec, CreateOptions, GroupHandle, Node};

type WriteTask = Box<dyn Fn() -> crate::Result<()> + Send + Sync>;

/// Independent block writes, run by [`DeferredWrite::compute`].
#[derive(Default)]
pub struct DeferredWrite {
    tasks: Vec<WriteTask>,
}

impl DeferredWrite {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Append the tasks of `other`.
    pub fn merge(mut self, other: DeferredWrite) -> Self {
        self.tasks.extend(other.tasks);
        self
    }

    /// Run every task on the rayon pool and wait for all of them.
    ///
    /// Tasks are idempotent, so a failed run can simply be repeated.
    pub fn compute(&self) -> crate::Result<()> {
        log::debug!("running {} block writes", self.tasks.len());
        self.tasks.par_iter().try_for_each(|task| task())
    }
}

impl fmt::Debug for DeferredWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredWrite")
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

/// Whether blocks of edge `source` never share a destination chunk of edge `target`.
fn aligned(source: u64, target: u64, extent: u64) -> bool {
    source % target == 0 || source >= extent
}

fn validate<T: Scalar>(source: &ChunkedArray<T>, target: &ArrayHandle) -> crate::Result<()> {
    let shape = target.shape();
    if source.shape() != shape.as_slice() {
        return Err(crate::Error::ShapeMismatch {
            expected: shape,
            found: source.shape().to_vec(),
        });
    }
    if target.dtype() != T::DTYPE {
        return Err(crate::Error::DtypeMismatch {
            expected: target.dtype().to_string(),
            found: T::DTYPE.to_string(),
        });
    }
    target.check_writable("store blocks")?;
    let target_chunks = target.chunks();
    let ok = source
        .chunks()
        .iter()
        .zip(&target_chunks)
        .zip(&shape)
        .all(|((&s, &t), &n)| aligned(s, t, n));
    if !ok {
        return Err(crate::Error::IncompatibleChunking {
            path: target.location().to_string(),
            chunks: source.chunks().iter().map(|&c| c as i64).collect(),
            shape,
        });
    }
    Ok(())
}

/// Plan writing every block of `source` into `target`.
///
/// All checks happen now; nothing is written until [`DeferredWrite::compute`].
pub fn store_blocks<T: Scalar>(
    source: &ChunkedArray<T>,
    target: &ArrayHandle,
) -> crate::Result<DeferredWrite> {
    validate(source, target)?;
    let tasks = source
        .block_regions()
        .into_iter()
        .map(|region| {
            let source = source.clone();
            let target = target.clone();
            let task: WriteTask = Box::new(move || {
                let block = source.read_region(&region)?;
                let offset: Vec<u64> = region.iter().map(|r| r.start).collect();
                target.write_region(&offset, block.view())
            });
            task
        })
        .collect();
    Ok(DeferredWrite { tasks })
}

/// [`store_blocks`] over pairs of sources and targets.
pub fn store_blocks_many<T: Scalar>(
    sources: &[ChunkedArray<T>],
    targets: &[ArrayHandle],
) -> crate::Result<DeferredWrite> {
    if sources.len() != targets.len() {
        return Err(crate::Error::cardinality(
            "sources and targets",
            vec![sources.len(), targets.len()],
        ));
    }
    // validate everything before planning anything
    for (source, target) in sources.iter().zip(targets) {
        validate(source, target)?;
    }
    sources
        .iter()
        .zip(targets)
        .try_fold(DeferredWrite::default(), |acc, (source, target)| {
            Ok(acc.merge(store_blocks(source, target)?))
        })
}

/// Options for [`create_group`].
#[derive(Debug, Clone, PartialEq)]
pub struct GroupOptions {
    pub compressor: Compressor,
    pub group_mode: AccessMode,
    pub array_mode: AccessMode,
    pub fill_value: f64,
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self {
            compressor: Compressor::default(),
            group_mode: AccessMode::Append,
            array_mode: AccessMode::Append,
            fill_value: 0.0,
        }
    }
}

impl GroupOptions {
    pub fn with_compressor(mut self, compressor: Compressor) -> Self {
        self.compressor = compressor;
        self
    }
}

/// Create a group holding one empty array per entry of `arrays`.
///
/// Arrays take their shape and type from the corresponding entry, their chunks from `chunks`
/// (or the entry's own chunking), and their attributes from `array_attrs`. No data is written.
///
/// In append mode an existing group or array is reused: its attributes are overwritten, and an
/// existing array whose shape or data type differs from the entry is an error.
pub fn create_group(
    path: &str,
    arrays: &[&dyn ArrayLike],
    names: &[&str],
    chunks: Option<&[Vec<u64>]>,
    group_attrs: Attributes,
    array_attrs: Option<&[Attributes]>,
    options: &GroupOptions,
) -> crate::Result<GroupHandle> {
    create_group_with(
        &Accessor::default(),
        path,
        arrays,
        names,
        chunks,
        group_attrs,
        array_attrs,
        options,
    )
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn create_group_with(
    accessor: &Accessor,
    path: &str,
    arrays: &[&dyn ArrayLike],
    names: &[&str],
    chunks: Option<&[Vec<u64>]>,
    group_attrs: Attributes,
    array_attrs: Option<&[Attributes]>,
    options: &GroupOptions,
) -> crate::Result<GroupHandle> {
    let mut seen = HashSet::new();
    if let Some(name) = names.iter().find(|name| !seen.insert(**name)) {
        return Err(crate::Error::DuplicateName {
            name: name.to_string(),
        });
    }
    let mut lengths = vec![arrays.len(), names.len()];
    lengths.extend(chunks.map(<[_]>::len));
    lengths.extend(array_attrs.map(<[_]>::len));
    if lengths.iter().any(|&n| n != arrays.len()) {
        return Err(crate::Error::cardinality(
            "arrays, names, chunks and attributes",
            lengths,
        ));
    }

    let (split, kind) = accessor.registry().classify(path)?;
    if kind == BackendKind::Mrc {
        return Err(crate::Error::Unsupported(format!(
            "MRC files cannot hold groups: {path}"
        )));
    }

    let specs = arrays
        .iter()
        .enumerate()
        .map(|(idx, array)| {
            let shape = array.shape();
            let chunks = chunks
                .map(|c| c[idx].clone())
                .or_else(|| array.chunks())
                .unwrap_or_else(|| shape.clone());
            if chunks.len() != shape.len() {
                return Err(crate::Error::IncompatibleChunking {
                    path: split.join(names[idx]).full_path(),
                    chunks: chunks.iter().map(|&c| c as i64).collect(),
                    shape,
                });
            }
            Ok(ArraySpec::new(shape, array.dtype())
                .with_chunks(chunks)
                .with_compressor(options.compressor)
                .with_fill_value(options.fill_value))
        })
        .collect::<crate::Result<Vec<_>>>()?;

    // attributes are replaced, not merged
    let group = accessor
        .access(path, options.group_mode, CreateOptions::default())?
        .into_group()?;
    group.set_attrs(group_attrs)?;
    for (idx, spec) in specs.into_iter().enumerate() {
        let attributes = array_attrs
            .map(|a| a[idx].clone())
            .unwrap_or_default();
        let child = split.join(names[idx]).full_path();
        accessor
            .access(&child, options.array_mode, CreateOptions::array(spec))?
            .into_array()?
            .set_attrs(attributes)?;
    }
    Ok(group)
}

/// Remove `node` and everything under it from its store.
///
/// Deletion is by path segment: a sibling whose name merely starts with the same text is untouched.
pub fn delete_zbranch(node: &Node) -> crate::Result<()> {
    let (storage, key) = match node {
        Node::Array(a) => {
            a.check_writable("delete")?;
            a.chunk_storage()?
        }
        Node::Group(g) => {
            g.check_writable()?;
            g.chunk_storage()?
        }
    };
    zarr::erase_node(storage, key)
}
