//! N5 containers served through the zarr v3 array engine.
//!
//! [`storage::N5Store`] translates `attributes.json` to and from `zarr.json` on the fly,
//! [`codec::N5Codec`] reads and writes N5 block headers, and
//! [`chunk_key_encoding::N5ChunkKeyEncoding`] lays blocks out in N5's reversed index order.
pub mod chunk;
pub mod chunk_key_encoding;
pub mod codec;
pub mod metadata;
pub mod storage;
