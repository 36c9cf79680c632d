use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use zarrs::array::{DataType, Element, ElementOwned, FillValueMetadata, data_type};
use zarrs::metadata::v3::MetadataV3;

/// Numeric element types shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Uint64,
    Int64,
    Float32,
    Float64,
}

impl DType {
    pub const ALL: [DType; 10] = [
        DType::Uint8,
        DType::Int8,
        DType::Uint16,
        DType::Int16,
        DType::Uint32,
        DType::Int32,
        DType::Uint64,
        DType::Int64,
        DType::Float32,
        DType::Float64,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DType::Uint8 => "uint8",
            DType::Int8 => "int8",
            DType::Uint16 => "uint16",
            DType::Int16 => "int16",
            DType::Uint32 => "uint32",
            DType::Int32 => "int32",
            DType::Uint64 => "uint64",
            DType::Int64 => "int64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }

    /// Width of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            DType::Uint8 | DType::Int8 => 1,
            DType::Uint16 | DType::Int16 => 2,
            DType::Uint32 | DType::Int32 | DType::Float32 => 4,
            DType::Uint64 | DType::Int64 | DType::Float64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }

    fn to_data_type(self) -> DataType {
        match self {
            DType::Uint8 => data_type::uint8(),
            DType::Int8 => data_type::int8(),
            DType::Uint16 => data_type::uint16(),
            DType::Int16 => data_type::int16(),
            DType::Uint32 => data_type::uint32(),
            DType::Int32 => data_type::int32(),
            DType::Uint64 => data_type::uint64(),
            DType::Int64 => data_type::int64(),
            DType::Float32 => data_type::float32(),
            DType::Float64 => data_type::float64(),
        }
    }

    /// The zarr v3 `data_type` metadata for this type.
    pub(crate) fn to_metadata(self) -> MetadataV3 {
        let data_type = self.to_data_type();
        let name = data_type
            .name_v3()
            .map_or_else(|| self.name().to_string(), Cow::into_owned);
        let configuration = data_type.configuration_v3();
        if configuration.is_empty() {
            MetadataV3::new(name)
        } else {
            MetadataV3::new_with_configuration(name, configuration)
        }
    }

    /// Identify the type of an opened zarr array.
    pub(crate) fn from_data_type(data_type: &DataType) -> crate::Result<Self> {
        let name = data_type
            .name_v3()
            .ok_or_else(|| crate::Error::Unsupported("unnamed data type".into()))?;
        name.parse()
    }

    /// Fill value metadata holding `value` cast to this type.
    pub(crate) fn fill_value_metadata(self, value: f64) -> crate::Result<FillValueMetadata> {
        let number = if self.is_float() {
            serde_json::Number::from_f64(value).ok_or_else(|| {
                crate::Error::Unsupported(format!("non-finite fill value {value}"))
            })?
        } else if value < 0.0 {
            serde_json::Number::from(value as i64)
        } else {
            serde_json::Number::from(value as u64)
        };
        Ok(FillValueMetadata::Number(number))
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DType::ALL
            .into_iter()
            .find(|d| d.name() == s)
            .ok_or_else(|| crate::Error::Unsupported(format!("data type {s:?}")))
    }
}

#[cfg(feature = "hdf5")]
pub trait MaybeH5Type: hdf5::H5Type {}
#[cfg(feature = "hdf5")]
impl<T: hdf5::H5Type> MaybeH5Type for T {}

#[cfg(not(feature = "hdf5"))]
pub trait MaybeH5Type {}
#[cfg(not(feature = "hdf5"))]
impl<T> MaybeH5Type for T {}

/// A Rust element type bound to exactly one [`DType`].
pub trait Scalar:
    Element
    + ElementOwned
    + bytemuck::Pod
    + Default
    + PartialEq
    + fmt::Debug
    + Send
    + Sync
    + MaybeH5Type
    + 'static
{
    const DTYPE: DType;

    fn to_f64(self) -> f64;

    /// Saturating conversion; integer types round to nearest, halves away from zero.
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_scalar_int {
    ($($t:ty => $d:ident),* $(,)?) => {
        $(
            impl Scalar for $t {
                const DTYPE: DType = DType::$d;

                fn to_f64(self) -> f64 {
                    self as f64
                }

                fn from_f64(value: f64) -> Self {
                    value.round() as $t
                }
            }
        )*
    };
}

impl_scalar_int!(
    u8 => Uint8,
    i8 => Int8,
    u16 => Uint16,
    i16 => Int16,
    u32 => Uint32,
    i32 => Int32,
    u64 => Uint64,
    i64 => Int64,
);

impl Scalar for f32 {
    const DTYPE: DType = DType::Float32;

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl Scalar for f64 {
    const DTYPE: DType = DType::Float64;

    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(value: f64) -> Self {
        value
    }
}

/// Fail unless `T` stores elements of type `found`.
pub(crate) fn check_dtype<T: Scalar>(found: DType) -> crate::Result<()> {
    if T::DTYPE == found {
        Ok(())
    } else {
        Err(crate::Error::DtypeMismatch {
            expected: found.to_string(),
            found: T::DTYPE.to_string(),
        })
    }
}
