use serde::{Deserialize, Serialize};
use zarrs::array::codec::{BytesCodec, Bz2Codec, Bz2CompressionLevel, GzipCodec};
use zarrs::metadata::v3::MetadataV3;
use zarrs::plugin::{ExtensionName, ZarrVersion};
use zarrs_codec::{CodecMetadataOptions, CodecTraits};

use crate::n5::metadata::N5Compression;

/// Chunk compression applied when creating arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "id")]
pub enum Compressor {
    #[default]
    Raw,
    Gzip {
        /// -1 selects the library default.
        level: i8,
    },
    Bzip2 {
        /// 1..=9.
        block_size: u8,
    },
}

impl Compressor {
    pub fn gzip(level: i8) -> Self {
        Self::Gzip { level }
    }

    fn gzip_level(level: i8) -> crate::Result<u32> {
        match level {
            -1 => Ok(6),
            n if n >= 0 => Ok(n as u32),
            n => Err(crate::Error::general(format!(
                "invalid gzip compression level {n}"
            ))),
        }
    }

    /// The zarr v3 `codecs` list: little-endian bytes, then the compressor if any.
    pub(crate) fn zarr_codecs(&self) -> crate::Result<Vec<MetadataV3>> {
        let mut codecs = vec![codec_metadata(&BytesCodec::little())?];
        match self {
            Compressor::Raw => (),
            Compressor::Gzip { level } => {
                let codec = GzipCodec::new(Self::gzip_level(*level)?).map_err(crate::Error::wrap)?;
                codecs.push(codec_metadata(&codec)?);
            }
            Compressor::Bzip2 { block_size } => {
                let level = Bz2CompressionLevel::new(*block_size as u32)
                    .map_err(|n| crate::Error::general(format!("invalid bz2 block size {n}")))?;
                codecs.push(codec_metadata(&Bz2Codec::new(level))?);
            }
        }
        Ok(codecs)
    }
}

impl From<Compressor> for N5Compression {
    fn from(value: Compressor) -> Self {
        match value {
            Compressor::Raw => N5Compression::Raw,
            Compressor::Gzip { level } => N5Compression::Gzip { level },
            Compressor::Bzip2 { block_size } => N5Compression::Bzip2 { block_size },
        }
    }
}

/// Name and configuration of a codec as they appear in `zarr.json`.
pub(crate) fn codec_metadata<C: CodecTraits + ExtensionName>(codec: &C) -> crate::Result<MetadataV3> {
    let version = ZarrVersion::V3;
    let name = codec
        .name(version)
        .ok_or_else(|| crate::Error::general("codec has no zarr v3 name"))?;
    let out = match codec.configuration(version, &CodecMetadataOptions::default()) {
        Some(config) if !config.is_empty() => MetadataV3::new_with_configuration(name, config),
        _ => MetadataV3::new(name),
    };
    Ok(out)
}
