//! Uniform access to volumetric arrays in zarr, N5, MRC and HDF5 storage,
//! plus multiscale pyramid construction.
//!
//! A path like `/data/vol.n5/raw/s0` is split at the first segment with a registered suffix;
//! the suffix picks the backend and the rest addresses a node within the container.
pub mod access;
pub mod backend;
pub mod chunked;
pub mod compression;
pub mod dtype;
mod error;
pub mod multiscale;
pub mod n5;
pub mod node;
pub mod path;
pub mod write;

pub use zarrs;

pub use access::{Accessor, access, read, read_dask};
pub use backend::{BackendKind, BackendRegistry};
pub use chunked::{ArrayLike, BlockSource, ChunkedArray};
pub use compression::Compressor;
pub use dtype::{DType, Scalar};
pub use error::{Error, Result};
pub use multiscale::{
    Coordinate, DataArray, MetadataDialect, multiscale_group, multiscale_metadata, pyramid,
};
pub use node::{AccessMode, ArrayHandle, ArraySpec, CreateOptions, GroupHandle, Location, Node};
pub use path::{StorePath, split_by_suffix};
pub use write::{
    DeferredWrite, GroupOptions, create_group, delete_zbranch, store_blocks, store_blocks_many,
};

/// Free-form node metadata, identical in shape across backends.
pub type Attributes = serde_json::Map<String, serde_json::Value>;
