use bytes::{Buf, Bytes};
use zarrs::{
    metadata::v3::NodeMetadataV3,
    storage::{
        ListableStorageTraits, MaybeBytes, MaybeBytesIterator, OffsetBytesIterator,
        ReadableStorageTraits, StorageError, StoreKey, StoreKeys, StoreKeysPrefixes, StorePrefix,
        WritableStorageTraits, byte_range::ByteRangeIterator,
    },
};

use super::metadata::N5Metadata;

const ZARR_JSON: &str = "zarr.json";
const ATTRIBUTES_JSON: &str = "attributes.json";

/// Presents an N5 container as a zarr v3 hierarchy.
///
/// `zarr.json` documents are synthesized from, and written back to, N5 `attributes.json`.
/// Every other key passes through to the wrapped store unchanged.
pub struct N5Store<R> {
    inner: R,
}

impl<R> N5Store<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Map requests for zarr.json to attributes.json.
    ///
    /// Returns None if the request was _not_ for a zarr.json object.
    /// Otherwise, returns the key of the equivalent attributes.json object.
    fn intercept_zarr_json(&self, key: &StoreKey) -> Option<StoreKey> {
        let s = key.as_str();
        let (prefix, suffix) = match s.rsplit_once('/') {
            Some(tup) => tup,
            None => ("", s),
        };
        if suffix != ZARR_JSON {
            return None;
        }
        let k = if prefix.is_empty() {
            StoreKey::new(ATTRIBUTES_JSON)
        } else {
            StoreKey::new(format!("{prefix}/{ATTRIBUTES_JSON}"))
        };
        k.ok()
    }

    fn invalid(key: &StoreKey, message: String) -> StorageError {
        StorageError::InvalidMetadata(key.clone(), message)
    }

    /// Convert N5 metadata to Zarr metadata.
    fn convert_metadata(key: &StoreKey, bytes: Option<Bytes>) -> Result<Option<Bytes>, StorageError> {
        let Some(b) = bytes else {
            return Ok(None);
        };
        let n5: N5Metadata = serde_json::from_reader(b.reader())
            .map_err(|e| Self::invalid(key, format!("could not parse N5 metadata: {e}")))?;
        let zarr: NodeMetadataV3 = n5.try_into().map_err(|e| {
            Self::invalid(
                key,
                format!("could not convert N5 metadata to Zarr metadata: {e}"),
            )
        })?;
        serde_json::to_vec(&zarr)
            .map(|v| Some(Bytes::from(v)))
            .map_err(|e| Self::invalid(key, format!("could not serialize Zarr metadata: {e}")))
    }

    /// Convert Zarr metadata to the N5 `attributes.json` document.
    fn convert_to_n5(key: &StoreKey, value: &[u8]) -> Result<Bytes, StorageError> {
        let is_root = key.as_str() == ATTRIBUTES_JSON;
        let n5 = N5Metadata::from_zarr_json(value, is_root).map_err(|e| {
            Self::invalid(key, format!("could not convert Zarr metadata to N5: {e}"))
        })?;
        serde_json::to_vec_pretty(&n5)
            .map(Bytes::from)
            .map_err(|e| Self::invalid(key, format!("could not serialize N5 metadata: {e}")))
    }
}

impl<R: ListableStorageTraits> N5Store<R> {
    /// Metadata for the directory holding `attributes`, which does not exist.
    ///
    /// N5 writers may leave out group attributes, so a directory with contents but no
    /// `attributes.json` is a group without attributes. An empty or missing directory is nothing.
    fn implicit_group(&self, attributes: &StoreKey) -> Result<MaybeBytes, StorageError> {
        let dir = match attributes.as_str().rsplit_once('/') {
            Some((parent, _)) => StorePrefix::new(format!("{parent}/"))?,
            None => StorePrefix::root(),
        };
        let listing = self.inner.list_dir(&dir)?;
        if listing.keys().is_empty() && listing.prefixes().is_empty() {
            return Ok(None);
        }
        log::debug!("{dir:?} has no {ATTRIBUTES_JSON}; treating it as an implicit group");
        Self::convert_metadata(attributes, Some(Bytes::from_static(b"{}")))
    }
}

impl<R: ReadableStorageTraits + ListableStorageTraits> ReadableStorageTraits for N5Store<R> {
    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        if self.intercept_zarr_json(key).is_some() {
            // the synthesized document differs in size from the N5 one
            Ok(self.get(key)?.map(|b| b.len() as u64))
        } else {
            self.inner.size_key(key)
        }
    }

    fn supports_get_partial(&self) -> bool {
        false
    }

    fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        if let Some(k) = self.intercept_zarr_json(key) {
            log::debug!("serving {key} from {k}");
            match self.inner.get(&k)? {
                Some(bytes) => Self::convert_metadata(&k, Some(bytes)),
                None => self.implicit_group(&k),
            }
        } else {
            self.inner.get(key)
        }
    }

    fn get_partial_many<'a>(
        &'a self,
        key: &StoreKey,
        byte_ranges: ByteRangeIterator<'a>,
    ) -> Result<MaybeBytesIterator<'a>, StorageError> {
        if self.intercept_zarr_json(key).is_some() {
            return Err(StorageError::Unsupported(
                "partial reads of synthesized metadata are not supported".into(),
            ));
        }
        self.inner.get_partial_many(key, byte_ranges)
    }
}

impl<R: WritableStorageTraits> WritableStorageTraits for N5Store<R> {
    fn set(&self, key: &StoreKey, value: Bytes) -> Result<(), StorageError> {
        if let Some(k) = self.intercept_zarr_json(key) {
            log::debug!("writing {key} as {k}");
            self.inner.set(&k, Self::convert_to_n5(&k, &value)?)
        } else {
            self.inner.set(key, value)
        }
    }

    fn set_partial_many(
        &self,
        key: &StoreKey,
        offset_values: OffsetBytesIterator,
    ) -> Result<(), StorageError> {
        if self.intercept_zarr_json(key).is_some() {
            return Err(StorageError::Unsupported(
                "partial writes of synthesized metadata are not supported".into(),
            ));
        }
        self.inner.set_partial_many(key, offset_values)
    }

    fn erase(&self, key: &StoreKey) -> Result<(), StorageError> {
        match self.intercept_zarr_json(key) {
            Some(k) => self.inner.erase(&k),
            None => self.inner.erase(key),
        }
    }

    fn erase_prefix(&self, prefix: &StorePrefix) -> Result<(), StorageError> {
        self.inner.erase_prefix(prefix)
    }

    fn supports_set_partial(&self) -> bool {
        false
    }
}

impl<R: ListableStorageTraits> ListableStorageTraits for N5Store<R> {
    fn list(&self) -> Result<StoreKeys, StorageError> {
        self.inner.list()
    }

    fn list_prefix(&self, prefix: &StorePrefix) -> Result<StoreKeys, StorageError> {
        self.inner.list_prefix(prefix)
    }

    fn list_dir(&self, prefix: &StorePrefix) -> Result<StoreKeysPrefixes, StorageError> {
        self.inner.list_dir(prefix)
    }

    fn size_prefix(&self, prefix: &StorePrefix) -> Result<u64, StorageError> {
        self.inner.size_prefix(prefix)
    }

    fn size(&self) -> Result<u64, StorageError> {
        self.inner.size()
    }
}
