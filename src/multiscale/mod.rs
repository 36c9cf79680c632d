//! Multiscale pyramids: levels with coordinates, and the metadata that describes them.
mod data_array;
mod dialect;

pub use data_array::{Coordinate, DataArray, pyramid};
pub use dialect::{MetadataDialect, NGFF_VERSION, Transform, normalize_unit};

use crate::Attributes;
use crate::chunked::ArrayLike;
use crate::compression::Compressor;
use crate::dtype::Scalar;
use crate::node::GroupHandle;
use crate::write::{GroupOptions, create_group};

/// Group and per-array metadata for `levels`, stored under `array_paths`.
///
/// Level 0 is the highest resolution. Documents from several dialects are merged; a key that two
/// dialects fill differently is a [`crate::Error::MetadataConflict`].
pub fn multiscale_metadata<T: Scalar>(
    levels: &[DataArray<T>],
    dialects: &[MetadataDialect],
    array_paths: &[&str],
) -> crate::Result<(Attributes, Vec<Attributes>)> {
    if levels.is_empty() || levels.len() != array_paths.len() {
        return Err(crate::Error::cardinality(
            "levels and array paths",
            vec![levels.len(), array_paths.len()],
        ));
    }
    let transforms: Vec<Transform> = levels.iter().map(DataArray::transform).collect();
    let name = levels[0].name.as_deref();

    let mut groups = Vec::with_capacity(dialects.len());
    let mut arrays: Vec<Vec<(MetadataDialect, Attributes)>> = vec![Vec::new(); levels.len()];
    for dialect in dialects {
        let (group, per_array) = dialect.documents(&transforms, array_paths, name);
        groups.push((*dialect, group));
        for (slot, doc) in arrays.iter_mut().zip(per_array) {
            slot.push((*dialect, doc));
        }
    }
    let group = dialect::merge_documents(groups)?;
    let arrays = arrays
        .into_iter()
        .map(dialect::merge_documents)
        .collect::<crate::Result<Vec<_>>>()?;
    Ok((group, arrays))
}

/// Create a group holding one empty array per level, annotated with [`multiscale_metadata`].
///
/// No data is written; use [`crate::write::store_blocks_many`] for that.
pub fn multiscale_group<T: Scalar>(
    path: &str,
    levels: &[DataArray<T>],
    array_paths: &[&str],
    dialects: &[MetadataDialect],
    chunks: Option<&[Vec<u64>]>,
    compressor: Compressor,
) -> crate::Result<GroupHandle> {
    let (group_attrs, array_attrs) = multiscale_metadata(levels, dialects, array_paths)?;
    let arrays: Vec<&dyn ArrayLike> = levels.iter().map(|l| &l.data as &dyn ArrayLike).collect();
    log::debug!(
        "creating {} level pyramid at {path:?} with {dialects:?} metadata",
        levels.len()
    );
    create_group(
        path,
        &arrays,
        array_paths,
        chunks,
        group_attrs,
        Some(&array_attrs),
        &GroupOptions::default().with_compressor(compressor),
    )
}
