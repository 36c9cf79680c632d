use std::borrow::Cow;
use std::num::NonZeroU64;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zarrs::array::codec::BytesCodec;
use zarrs::array::{CodecChain, DataType, FillValue};
use zarrs::metadata::Configuration;
use zarrs::metadata::v3::MetadataV3;
use zarrs::plugin::{PluginCreateError, ZarrVersion};
use zarrs_codec::{
    ArrayBytes, ArrayBytesRaw, ArrayCodecTraits, ArrayToBytesCodecTraits, BytesRepresentation,
    Codec, CodecError, CodecMetadataOptions, CodecOptions, CodecPluginV3, CodecTraits,
    CodecTraitsV3, PartialDecoderCapability, PartialEncoderCapability, RecommendedConcurrency,
};

use super::chunk::{N5ChunkHeader, N5ChunkMode};
use super::metadata::N5Compression;

zarrs::plugin::impl_extension_aliases!(N5Codec, v3: "zarrs.n5", ["zarrs.n5", "n5"]);
inventory::submit! {
    CodecPluginV3::new::<N5Codec>()
}

/// Array-to-bytes codec producing N5 blocks: a big-endian header followed by the
/// (optionally compressed) big-endian payload.
#[derive(Debug, Clone)]
pub struct N5Codec {
    n5_compression: N5Compression,
    /// Big-endian bytes codec, then at most one compressor.
    codecs: CodecChain,
}

impl N5Codec {
    pub fn new(compression: N5Compression) -> crate::Result<Self> {
        let codecs = CodecChain::new(
            vec![],
            Arc::new(BytesCodec::big()),
            compression.to_bytes_to_bytes_codec()?.into_iter().collect(),
        );
        Ok(Self {
            codecs,
            n5_compression: compression,
        })
    }

    pub fn new_with_configuration(
        configuration: &N5CodecConfiguration,
    ) -> Result<Self, PluginCreateError> {
        Self::new(configuration.compression).map_err(|e| PluginCreateError::Other(e.to_string()))
    }

    pub fn compression(&self) -> N5Compression {
        self.n5_compression
    }

    fn header_shape(shape: &[NonZeroU64]) -> Result<N5ChunkHeader, CodecError> {
        let dims = shape
            .iter()
            .map(|n| {
                u32::try_from(n.get())
                    .map_err(|_| CodecError::Other(format!("N5 block edge {n} exceeds u32")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(N5ChunkHeader::dense(dims.into_iter()))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Copy)]
pub struct N5CodecConfiguration {
    pub compression: N5Compression,
}

impl CodecTraitsV3 for N5Codec {
    fn create(metadata: &MetadataV3) -> Result<Codec, PluginCreateError>
    where
        Self: Sized,
    {
        let configuration = metadata.to_typed_configuration()?;
        let codec = Arc::new(N5Codec::new_with_configuration(&configuration)?);
        Ok(Codec::ArrayToBytes(codec))
    }
}

impl CodecTraits for N5Codec {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn configuration(
        &self,
        _version: ZarrVersion,
        _options: &CodecMetadataOptions,
    ) -> Option<Configuration> {
        let config = N5CodecConfiguration {
            compression: self.n5_compression,
        };
        match serde_json::to_value(config) {
            Ok(serde_json::Value::Object(map)) => Some(map.into()),
            _ => None,
        }
    }

    fn partial_decoder_capability(&self) -> PartialDecoderCapability {
        PartialDecoderCapability {
            partial_read: false,
            partial_decode: false,
        }
    }

    fn partial_encoder_capability(&self) -> PartialEncoderCapability {
        PartialEncoderCapability {
            partial_encode: false,
        }
    }
}

impl ArrayCodecTraits for N5Codec {
    fn recommended_concurrency(
        &self,
        _shape: &[NonZeroU64],
        _data_type: &DataType,
    ) -> Result<RecommendedConcurrency, CodecError> {
        Ok(RecommendedConcurrency::new_maximum(1))
    }
}

impl ArrayToBytesCodecTraits for N5Codec {
    fn into_dyn(self: Arc<Self>) -> Arc<dyn ArrayToBytesCodecTraits> {
        self
    }

    fn encoded_representation(
        &self,
        shape: &[NonZeroU64],
        data_type: &DataType,
        _fill_value: &FillValue,
    ) -> Result<BytesRepresentation, CodecError> {
        let ret = if let Some(fs) = data_type.fixed_size() {
            let numel: u64 = shape.iter().map(|n| n.get()).product();
            let header = (2 + 2 + 4 * shape.len()) as u64;
            if self.n5_compression == N5Compression::Raw {
                BytesRepresentation::BoundedSize(header + numel * fs as u64)
            } else {
                BytesRepresentation::UnboundedSize
            }
        } else {
            BytesRepresentation::UnboundedSize
        };
        Ok(ret)
    }

    fn encode<'a>(
        &self,
        bytes: ArrayBytes<'a>,
        shape: &[NonZeroU64],
        data_type: &DataType,
        fill_value: &FillValue,
        options: &CodecOptions,
    ) -> Result<ArrayBytesRaw<'a>, CodecError> {
        let header = Self::header_shape(shape)?;
        let payload = self
            .codecs
            .encode(bytes, shape, data_type, fill_value, options)?;
        let mut out = header.to_bytes();
        out.extend_from_slice(&payload);
        Ok(Cow::Owned(out))
    }

    fn decode<'a>(
        &self,
        bytes: ArrayBytesRaw<'a>,
        shape: &[NonZeroU64],
        data_type: &DataType,
        fill_value: &FillValue,
        options: &CodecOptions,
    ) -> Result<ArrayBytes<'a>, CodecError> {
        let header = N5ChunkHeader::from_bytes(&bytes)
            .map_err(|e| CodecError::Other(format!("N5 chunk header could not be parsed: {e}")))?;

        if header.mode != N5ChunkMode::Default {
            return Err(CodecError::Other(format!(
                "unsupported N5 chunk mode: {:?}",
                header.mode
            )));
        }

        // the regular bounded chunk grid hands us truncated edge blocks, as N5 stores them
        let expected = Self::header_shape(shape)?;
        if header.shape != expected.shape {
            return Err(CodecError::Other(format!(
                "N5 chunk header has shape {:?}, expected {:?}",
                header.shape, expected.shape,
            )));
        }

        let payload = match bytes {
            Cow::Borrowed(b) => Cow::Borrowed(&b[header.data_offset()..]),
            Cow::Owned(mut v) => {
                v.drain(..header.data_offset());
                Cow::Owned(v)
            }
        };
        self.codecs
            .decode(payload, shape, data_type, fill_value, options)
    }
}
