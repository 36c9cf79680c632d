//! Zarr and N5 hierarchies, both driven by the `zarrs` engine.
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use ndarray::{ArrayD, ArrayViewD};
use zarrs::array::{Array, ArrayMetadata, ArrayMetadataOptions, ArrayMetadataV3};
use zarrs::array::ArraySubset;
use zarrs::filesystem::FilesystemStore;
use zarrs::group::{Group, GroupBuilder};
use zarrs::metadata::Configuration;
use zarrs::metadata::v3::MetadataV3;
use zarrs::storage::{
    ListableStorageTraits, ReadableStorageTraits, ReadableWritableListableStorage,
    ReadableWritableListableStorageTraits, StorageError, StoreKey, StorePrefix,
    WritableStorageTraits,
};

use super::{ArrayBackend, BackendKind, GroupBackend, check_region, region_at};
use crate::Attributes;
use crate::dtype::{DType, Scalar, check_dtype};
use crate::n5::metadata::N5ArrayMetadata;
use crate::n5::storage::N5Store;
use crate::node::ArraySpec;

/// Attribute the engine may add to metadata it writes; never exposed.
const ZARRS_ATTRIBUTE: &str = "_zarrs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeType {
    Array,
    Group,
}

pub(crate) fn open_storage(
    kind: BackendKind,
    container: &Path,
) -> crate::Result<ReadableWritableListableStorage> {
    let fs = FilesystemStore::new(container).map_err(crate::Error::wrap)?;
    let storage: ReadableWritableListableStorage = match kind {
        BackendKind::N5 => Arc::new(N5Store::new(fs)),
        _ => Arc::new(fs),
    };
    Ok(storage)
}

/// `/`-rooted node path for a store key.
fn node_path(key: &str) -> String {
    format!("/{key}")
}

fn child_key(key: &str, name: &str) -> String {
    if key.is_empty() {
        name.to_string()
    } else {
        format!("{key}/{name}")
    }
}

fn store_key(key: &str, name: &str) -> crate::Result<StoreKey> {
    Ok(StoreKey::new(child_key(key, name)).map_err(StorageError::from)?)
}

fn store_prefix(key: &str) -> crate::Result<StorePrefix> {
    if key.is_empty() {
        Ok(StorePrefix::root())
    } else {
        Ok(StorePrefix::new(format!("{key}/")).map_err(StorageError::from)?)
    }
}

fn metadata_options() -> ArrayMetadataOptions {
    ArrayMetadataOptions::default().with_include_zarrs_metadata(false)
}

fn clean(mut attributes: Attributes) -> Attributes {
    attributes.remove(ZARRS_ATTRIBUTE);
    attributes
}

/// What, if anything, is stored at `key`.
pub(crate) fn node_type(
    storage: &ReadableWritableListableStorage,
    key: &str,
) -> crate::Result<Option<NodeType>> {
    if let Some(bytes) = storage.get(&store_key(key, "zarr.json")?)? {
        let doc: serde_json::Value = serde_json::from_slice(&bytes)?;
        return match doc.get("node_type").and_then(|v| v.as_str()) {
            Some("array") => Ok(Some(NodeType::Array)),
            Some("group") => Ok(Some(NodeType::Group)),
            other => Err(crate::Error::general(format!(
                "unknown node type {other:?} at {key:?}"
            ))),
        };
    }
    if storage.get(&store_key(key, ".zarray")?)?.is_some() {
        return Ok(Some(NodeType::Array));
    }
    if storage.get(&store_key(key, ".zgroup")?)?.is_some() {
        return Ok(Some(NodeType::Group));
    }
    Ok(None)
}

/// Create empty groups for every missing ancestor of `key`.
pub(crate) fn ensure_parents(
    storage: &ReadableWritableListableStorage,
    key: &str,
) -> crate::Result<()> {
    let parts: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
    for depth in 0..parts.len() {
        let ancestor = parts[..depth].join("/");
        match node_type(storage, &ancestor)? {
            Some(NodeType::Group) => (),
            Some(NodeType::Array) => {
                return Err(crate::Error::backend_state(
                    node_path(key),
                    "w",
                    format!("ancestor {:?} is an array", node_path(&ancestor)),
                ));
            }
            None => {
                ZarrGroup::create(storage.clone(), &ancestor, Attributes::new())?;
            }
        }
    }
    Ok(())
}

/// Remove every key under `key`; the root key empties the store.
pub(crate) fn erase_node(storage: &ReadableWritableListableStorage, key: &str) -> crate::Result<()> {
    log::debug!("erasing {:?}", node_path(key));
    storage.erase_prefix(&store_prefix(key)?)?;
    Ok(())
}

/// Every physical key under `key`.
pub(crate) fn keys_under(
    storage: &ReadableWritableListableStorage,
    key: &str,
) -> crate::Result<Vec<String>> {
    Ok(storage
        .list_prefix(&store_prefix(key)?)?
        .into_iter()
        .map(|k| k.as_str().to_string())
        .collect())
}

fn regular_chunk_grid(chunks: &[u64]) -> MetadataV3 {
    let mut configuration = serde_json::Map::new();
    configuration.insert("chunk_shape".into(), serde_json::json!(chunks));
    MetadataV3::new_with_configuration("regular", Configuration::from(configuration))
}

pub(crate) struct ZarrArray {
    storage: ReadableWritableListableStorage,
    key: String,
    array: Array<dyn ReadableWritableListableStorageTraits>,
    dtype: DType,
    chunks: Vec<u64>,
}

impl ZarrArray {
    pub(crate) fn open(storage: ReadableWritableListableStorage, key: &str) -> crate::Result<Self> {
        let array = Array::open(storage.clone(), &node_path(key))?;
        Self::from_array(storage, key, array)
    }

    fn from_array(
        storage: ReadableWritableListableStorage,
        key: &str,
        array: Array<dyn ReadableWritableListableStorageTraits>,
    ) -> crate::Result<Self> {
        let dtype = DType::from_data_type(array.data_type())?;
        let origin = vec![0; array.shape().len()];
        let chunks = array
            .chunk_shape(&origin)?
            .iter()
            .map(|n| n.get())
            .collect();
        Ok(Self {
            storage,
            key: key.to_string(),
            array,
            dtype,
            chunks,
        })
    }

    pub(crate) fn create(
        storage: ReadableWritableListableStorage,
        kind: BackendKind,
        key: &str,
        spec: &ArraySpec,
        attributes: Attributes,
    ) -> crate::Result<Self> {
        let chunks = spec.resolved_chunks();
        let metadata = match kind {
            BackendKind::N5 => {
                if spec.fill_value != 0.0 {
                    log::warn!("N5 has no fill value; ignoring {}", spec.fill_value);
                }
                ArrayMetadataV3::try_from(N5ArrayMetadata::new(
                    &spec.shape,
                    &chunks,
                    spec.dtype,
                    spec.compressor.into(),
                    attributes,
                ))?
            }
            _ => ArrayMetadataV3::new(
                spec.shape.clone(),
                regular_chunk_grid(&chunks),
                spec.dtype.to_metadata(),
                spec.dtype.fill_value_metadata(spec.fill_value)?,
                spec.compressor.zarr_codecs()?,
            )
            .with_attributes(attributes),
        };
        log::debug!(
            "creating {kind} array {:?} with shape {:?} and chunks {chunks:?}",
            node_path(key),
            spec.shape
        );
        let array =
            Array::new_with_metadata(storage.clone(), &node_path(key), ArrayMetadata::V3(metadata))?;
        array.store_metadata_opt(&metadata_options())?;
        Self::from_array(storage, key, array)
    }

    pub(crate) fn storage(&self) -> &ReadableWritableListableStorage {
        &self.storage
    }

    /// Re-read the array so metadata written by other handles is seen.
    fn reopen(&self) -> crate::Result<Array<dyn ReadableWritableListableStorageTraits>> {
        Ok(Array::open(self.storage.clone(), &node_path(&self.key))?)
    }
}

impl ArrayBackend for ZarrArray {
    fn shape(&self) -> Vec<u64> {
        self.array.shape().to_vec()
    }

    fn chunks(&self) -> Vec<u64> {
        self.chunks.clone()
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn attributes(&self) -> crate::Result<Attributes> {
        Ok(clean(self.reopen()?.attributes().clone()))
    }

    fn set_attributes(&self, attributes: Attributes) -> crate::Result<()> {
        let mut array = self.reopen()?;
        *array.attributes_mut() = clean(attributes);
        array.store_metadata_opt(&metadata_options())?;
        Ok(())
    }

    fn read_region<T: Scalar>(&self, region: &[Range<u64>]) -> crate::Result<ArrayD<T>> {
        check_dtype::<T>(self.dtype)?;
        check_region(self.array.shape(), region)?;
        log::trace!("reading {region:?} from {:?}", node_path(&self.key));
        let subset = ArraySubset::new_with_ranges(region);
        Ok(self.array.retrieve_array_subset::<ArrayD<T>>(&subset)?)
    }

    fn write_region<T: Scalar>(&self, offset: &[u64], data: ArrayViewD<'_, T>) -> crate::Result<()> {
        check_dtype::<T>(self.dtype)?;
        let region = region_at(offset, data.shape());
        check_region(self.array.shape(), &region)?;
        log::trace!("writing {region:?} to {:?}", node_path(&self.key));
        let subset = ArraySubset::new_with_ranges(&region);
        self.array
            .store_array_subset(&subset, data.as_standard_layout().into_owned())?;
        Ok(())
    }
}

pub(crate) struct ZarrGroup {
    storage: ReadableWritableListableStorage,
    key: String,
}

impl ZarrGroup {
    pub(crate) fn open(storage: ReadableWritableListableStorage, key: &str) -> crate::Result<Self> {
        // fail now rather than on first use
        Group::open(storage.clone(), &node_path(key))?;
        Ok(Self {
            storage,
            key: key.to_string(),
        })
    }

    pub(crate) fn create(
        storage: ReadableWritableListableStorage,
        key: &str,
        attributes: Attributes,
    ) -> crate::Result<Self> {
        log::debug!("creating group {:?}", node_path(key));
        let group = GroupBuilder::new()
            .attributes(attributes)
            .build(storage.clone(), &node_path(key))?;
        group.store_metadata()?;
        Ok(Self {
            storage,
            key: key.to_string(),
        })
    }

    pub(crate) fn storage(&self) -> &ReadableWritableListableStorage {
        &self.storage
    }
}

impl GroupBackend for ZarrGroup {
    fn attributes(&self) -> crate::Result<Attributes> {
        let group = Group::open(self.storage.clone(), &node_path(&self.key))?;
        Ok(clean(group.attributes().clone()))
    }

    fn set_attributes(&self, attributes: Attributes) -> crate::Result<()> {
        let mut group = Group::open(self.storage.clone(), &node_path(&self.key))?;
        *group.attributes_mut() = clean(attributes);
        group.store_metadata()?;
        Ok(())
    }

    fn member_names(&self) -> crate::Result<Vec<String>> {
        let listing = self.storage.list_dir(&store_prefix(&self.key)?)?;
        let mut names = Vec::new();
        for prefix in listing.prefixes() {
            let Some(name) = prefix
                .as_str()
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .map(str::to_string)
            else {
                continue;
            };
            if node_type(&self.storage, &child_key(&self.key, &name))?.is_some() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
