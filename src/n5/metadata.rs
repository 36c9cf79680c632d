use std::num::NonZeroU64;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zarrs::{
    array::{
        ArrayMetadataV3, FillValueMetadata,
        chunk_grid::{RegularBoundedChunkGrid, RegularBoundedChunkGridConfiguration},
        codec::{Bz2Codec, Bz2CompressionLevel, GzipCodec},
    },
    group::GroupMetadataV3,
    metadata::v3::{MetadataV3, NodeMetadataV3},
    plugin::ExtensionAliasesV3,
};

use super::{chunk_key_encoding::N5ChunkKeyEncoding, codec::N5Codec};
use crate::Attributes;
use crate::compression::codec_metadata;
use crate::dtype::DType;

/// Version written to the `n5` key of a container root.
pub const N5_VERSION: &str = "4.0.0";

/// Representation of N5 metadata, either an array or a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum N5Metadata {
    Array(N5ArrayMetadata),
    Group(N5GroupMetadata),
}

impl From<N5ArrayMetadata> for N5Metadata {
    fn from(value: N5ArrayMetadata) -> Self {
        Self::Array(value)
    }
}

impl From<N5GroupMetadata> for N5Metadata {
    fn from(value: N5GroupMetadata) -> Self {
        Self::Group(value)
    }
}

impl N5Metadata {
    /// Get the N5 version if present.
    pub fn version(&self) -> Option<&str> {
        match self {
            N5Metadata::Array(m) => m.n5_version.as_deref(),
            N5Metadata::Group(m) => m.n5_version.as_deref(),
        }
    }

    /// Extract the unstructured attributes map.
    pub fn into_attributes(self) -> Attributes {
        match self {
            N5Metadata::Array(m) => m.attributes,
            N5Metadata::Group(m) => m.attributes,
        }
    }

    fn set_version(&mut self, version: Option<String>) {
        match self {
            N5Metadata::Array(m) => m.n5_version = version,
            N5Metadata::Group(m) => m.n5_version = version,
        }
    }

    /// Translate a serialized zarr v3 node document back into N5 metadata.
    ///
    /// Only arrays using the N5 codec can be represented.
    /// The container root additionally records the N5 version.
    pub fn from_zarr_json(bytes: &[u8], is_root: bool) -> crate::Result<Self> {
        let node: ZarrNodeDocument = serde_json::from_slice(bytes)?;
        let mut out = match node.node_type.as_str() {
            "group" => N5Metadata::Group(N5GroupMetadata {
                n5_version: None,
                attributes: node.attributes,
            }),
            "array" => N5Metadata::Array(N5ArrayMetadata::from_zarr_document(node)?),
            other => {
                return Err(crate::Error::general(format!(
                    "unknown zarr node type {other:?}"
                )));
            }
        };
        out.set_version(is_root.then(|| N5_VERSION.to_string()));
        Ok(out)
    }
}

/// Representation of N5 group metadata.
///
/// Should be deserialized via the [N5Metadata] enum,
/// as all N5 arrays are also groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct N5GroupMetadata {
    /// N5 version; present if this is a hierarchy root.
    #[serde(rename = "n5", default, skip_serializing_if = "Option::is_none")]
    pub n5_version: Option<String>,
    /// Unstructured attributes.
    #[serde(flatten)]
    pub attributes: Attributes,
}

/// Representation of N5 array metadata.
///
/// Should be deserialized via the [N5Metadata] enum,
/// as all N5 arrays are also groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct N5ArrayMetadata {
    /// N5 version; present if this is a hierarchy root.
    #[serde(rename = "n5", default, skip_serializing_if = "Option::is_none")]
    pub n5_version: Option<String>,
    /// Array shape. Note that N5 uses F order, so the dimensions are reversed compared to Zarr.
    pub dimensions: Vec<u64>,
    /// Chunk shape. Note that N5 uses F order, so the dimensions are reversed compared to Zarr.
    pub block_size: Vec<u64>,
    /// Data type as a string.
    pub data_type: String,
    /// Chunk compression configuration.
    pub compression: N5Compression,
    /// Unstructured attributes.
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl N5ArrayMetadata {
    /// Build from a zarr-order shape and chunk shape.
    pub fn new(
        shape: &[u64],
        chunks: &[u64],
        data_type: DType,
        compression: N5Compression,
        attributes: Attributes,
    ) -> Self {
        Self {
            n5_version: None,
            dimensions: shape.iter().rev().copied().collect(),
            block_size: chunks.iter().rev().copied().collect(),
            data_type: data_type.name().to_string(),
            compression,
            attributes,
        }
    }

    fn from_zarr_document(node: ZarrNodeDocument) -> crate::Result<Self> {
        let grid = node
            .chunk_grid
            .as_ref()
            .and_then(named)
            .ok_or_else(|| crate::Error::general("array metadata has no chunk grid"))?;
        let chunks: Vec<u64> = grid
            .1
            .get("chunk_shape")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| crate::Error::general("chunk grid has no chunk_shape"))?;
        let data_type = node
            .data_type
            .as_ref()
            .and_then(named)
            .ok_or_else(|| crate::Error::general("array metadata has no data type"))?
            .0
            .parse::<DType>()?;
        let compression = node
            .codecs
            .iter()
            .filter_map(named)
            .find(|(name, _)| matches!(name.as_str(), "zarrs.n5" | "n5"))
            .map(|(_, config)| {
                serde_json::from_value::<super::codec::N5CodecConfiguration>(
                    serde_json::Value::Object(config),
                )
            })
            .transpose()?
            .ok_or_else(|| {
                crate::Error::Unsupported("N5 arrays must use the N5 codec".into())
            })?
            .compression;
        Ok(Self::new(
            &node.shape,
            &chunks,
            data_type,
            compression,
            node.attributes,
        ))
    }
}

/// The fields of a `zarr.json` document needed to rebuild N5 metadata.
#[derive(Debug, Deserialize)]
struct ZarrNodeDocument {
    node_type: String,
    #[serde(default)]
    shape: Vec<u64>,
    #[serde(default)]
    chunk_grid: Option<serde_json::Value>,
    #[serde(default)]
    data_type: Option<serde_json::Value>,
    #[serde(default)]
    codecs: Vec<serde_json::Value>,
    #[serde(default)]
    attributes: Attributes,
}

/// Split a zarr v3 extension point (`"name"` or `{"name", "configuration"}`).
fn named(value: &serde_json::Value) -> Option<(String, Attributes)> {
    match value {
        serde_json::Value::String(s) => Some((s.clone(), Attributes::new())),
        serde_json::Value::Object(map) => {
            let name = map.get("name")?.as_str()?.to_string();
            let config = match map.get("configuration") {
                Some(serde_json::Value::Object(c)) => c.clone(),
                _ => Attributes::new(),
            };
            Some((name, config))
        }
        _ => None,
    }
}

/// N5 chunk compression configuration.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Copy)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum N5Compression {
    /// Uncompressed.
    #[default]
    Raw,
    Bzip2 {
        /// Default 9. Must be in the range 1..=9.
        #[serde(rename = "blockSize", default = "default_bzip2_block_size")]
        block_size: u8,
    },
    Gzip {
        /// Default -1, meaning "implementation default" (usually 6).
        #[serde(default = "default_gzip_level")]
        level: i8,
    },
    Lz4 {
        /// Default 65536. Must be a positive integer.
        #[serde(rename = "blockSize", default = "default_lz4_block_size")]
        block_size: u64,
    },
    Xz {
        /// Default 6.
        #[serde(default = "default_xz_preset")]
        preset: u32,
    },
}

fn default_bzip2_block_size() -> u8 {
    9
}

fn default_gzip_level() -> i8 {
    -1
}

fn default_lz4_block_size() -> u64 {
    65536
}

fn default_xz_preset() -> u32 {
    6
}

impl N5Compression {
    /// Convert to a bytes-to-bytes codec if possible.
    pub fn to_bytes_to_bytes_codec(
        &self,
    ) -> crate::Result<Option<Arc<dyn zarrs_codec::BytesToBytesCodecTraits>>> {
        match self {
            N5Compression::Raw => Ok(None),
            N5Compression::Bzip2 { block_size } => Ok(Some(Arc::new(Bz2Codec::new(
                Bz2CompressionLevel::new(*block_size as u32)
                    .map_err(|n| crate::Error::general(format!("invalid bz2 block size {n}")))?,
            )))),
            N5Compression::Gzip { level } => {
                let lvl_int: u32 = match level {
                    -1 => 6,
                    n if *n >= 0 => *n as u32,
                    n => {
                        return Err(crate::Error::general(format!(
                            "invalid gzip compression level {n}"
                        )));
                    }
                };
                Ok(Some(Arc::new(
                    GzipCodec::new(lvl_int).map_err(crate::Error::wrap)?,
                )))
            }
            c => Err(crate::Error::Unsupported(format!("N5 compression {c:?}"))),
        }
    }
}

/// Reverses block_size and creates regular chunk grid
fn convert_chunk_grid(block_size: &[u64]) -> crate::Result<MetadataV3> {
    let chunk_shape: Vec<_> = block_size
        .iter()
        .map(|&n| NonZeroU64::new(n).ok_or_else(|| crate::Error::general("zero block size")))
        .rev()
        .collect::<crate::Result<Vec<_>>>()?;
    let out = MetadataV3::new_with_serializable_configuration(
        RegularBoundedChunkGrid::aliases_v3()
            .default_name
            .clone()
            .to_string(),
        &RegularBoundedChunkGridConfiguration { chunk_shape },
    )?;

    Ok(out)
}

// N5 has no fill value; missing blocks read as zero
fn convert_fill_value() -> FillValueMetadata {
    FillValueMetadata::Number(serde_json::Number::from(0))
}

fn convert_chunk_key_encoding() -> MetadataV3 {
    MetadataV3::new(
        N5ChunkKeyEncoding::aliases_v3()
            .default_name
            .clone()
            .to_string(),
    )
}

impl From<N5GroupMetadata> for GroupMetadataV3 {
    fn from(value: N5GroupMetadata) -> Self {
        Self::default().with_attributes(value.attributes)
    }
}

impl TryFrom<N5ArrayMetadata> for ArrayMetadataV3 {
    type Error = crate::Error;

    fn try_from(value: N5ArrayMetadata) -> Result<Self, Self::Error> {
        let shape: Vec<_> = value.dimensions.iter().rev().copied().collect();
        let chunk_grid = convert_chunk_grid(&value.block_size)?;
        let data_type = value.data_type.parse::<DType>()?.to_metadata();
        let fill_value = convert_fill_value();
        let codec_meta = codec_metadata(&N5Codec::new(value.compression)?)?;
        let out = Self::new(shape, chunk_grid, data_type, fill_value, vec![codec_meta])
            .with_chunk_key_encoding(convert_chunk_key_encoding())
            .with_attributes(value.attributes);
        Ok(out)
    }
}

impl TryFrom<N5Metadata> for NodeMetadataV3 {
    type Error = crate::Error;

    fn try_from(value: N5Metadata) -> Result<Self, Self::Error> {
        match value {
            N5Metadata::Array(m) => m.try_into().map(Self::Array),
            N5Metadata::Group(m) => Ok(Self::Group(m.into())),
        }
    }
}
