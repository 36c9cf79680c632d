use zarrs::{
    array::{
        ChunkKeyEncoding, ChunkKeyEncodingTraits,
        chunk_key_encoding::{self as cke, api::ChunkKeyEncodingPlugin},
    },
    metadata::{Configuration, v3::MetadataV3},
    plugin::{PluginConfigurationInvalidError, PluginCreateError},
    storage::StoreKey,
};

/// N5 block paths: grid indices in reverse order, `/`-separated.
#[derive(Debug, Clone, Copy)]
pub struct N5ChunkKeyEncoding;

zarrs::plugin::impl_extension_aliases!(N5ChunkKeyEncoding, v3: "zarrs.n5", ["zarrs.n5", "n5"]);
inventory::submit! {
    ChunkKeyEncodingPlugin::new::<N5ChunkKeyEncoding>()
}

impl N5ChunkKeyEncoding {
    /// A zero-dimensional array has a single block, stored as `0`.
    fn key_string(chunk_grid_indices: &[u64]) -> String {
        if chunk_grid_indices.is_empty() {
            return "0".into();
        }
        chunk_grid_indices
            .iter()
            .rev()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl ChunkKeyEncodingTraits for N5ChunkKeyEncoding {
    fn create(metadata: &MetadataV3) -> Result<cke::api::ChunkKeyEncoding, PluginCreateError>
    where
        Self: Sized,
    {
        if !matches!(metadata.name(), "zarrs.n5" | "n5") {
            return Err(PluginCreateError::NameInvalid {
                name: metadata.name().into(),
            });
        }
        if !metadata.configuration_is_none_or_empty() {
            return Err(PluginCreateError::ConfigurationInvalid(
                PluginConfigurationInvalidError::new(
                    "N5 chunk key encoding does not support configuration".into(),
                ),
            ));
        }
        Ok(ChunkKeyEncoding::new(Self))
    }

    fn configuration(&self) -> Configuration {
        Configuration::default()
    }

    fn encode(&self, chunk_grid_indices: &[u64]) -> StoreKey {
        // digits joined by `/` always form a valid key
        StoreKey::new(Self::key_string(chunk_grid_indices)).expect("chunk key should be valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_reversed() {
        assert_eq!(N5ChunkKeyEncoding.encode(&[1, 2, 3]).as_str(), "3/2/1");
        assert_eq!(N5ChunkKeyEncoding.encode(&[7]).as_str(), "7");
    }

    #[test]
    fn scalar_arrays_have_one_key() {
        assert_eq!(N5ChunkKeyEncoding.encode(&[]).as_str(), "0");
    }
}
