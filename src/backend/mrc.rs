//! MRC2014 volume files.
//!
//! A 1024-byte header, an optional extended header of `nsymbt` bytes, then the voxels
//! in C order with shape `(nz, ny, nx)`.
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use ndarray::{ArrayD, ArrayViewD, IxDyn};
use serde_json::json;

use super::{ArrayBackend, check_region, region_at};
use crate::Attributes;
use crate::dtype::{DType, Scalar, check_dtype};

pub(crate) const HEADER_LEN: usize = 1024;
const IMOD_STAMP: i32 = 1146047817;
const IMOD_FLAG_SIGNED_BYTES: i32 = 1;
const MAP_ID: &[u8; 4] = b"MAP ";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MrcHeader {
    pub nx: u32,
    pub ny: u32,
    pub nz: u32,
    pub mode: i32,
    /// Sampling along x, y, z.
    pub grid: [i32; 3],
    /// Cell dimensions along x, y, z, in angstroms.
    pub cell: [f32; 3],
    pub nsymbt: u32,
    pub imod_flags: Option<i32>,
    pub origin: [f32; 3],
    pub little_endian: bool,
}

struct Fields<'a> {
    bytes: &'a [u8],
    little_endian: bool,
}

impl Fields<'_> {
    fn word(&self, offset: usize) -> [u8; 4] {
        let mut out = [0u8; 4];
        out.copy_from_slice(&self.bytes[offset..offset + 4]);
        out
    }

    fn i32(&self, offset: usize) -> i32 {
        if self.little_endian {
            i32::from_le_bytes(self.word(offset))
        } else {
            i32::from_be_bytes(self.word(offset))
        }
    }

    fn f32(&self, offset: usize) -> f32 {
        if self.little_endian {
            f32::from_le_bytes(self.word(offset))
        } else {
            f32::from_be_bytes(self.word(offset))
        }
    }
}

fn non_negative(value: i32, field: &str) -> crate::Result<u32> {
    u32::try_from(value)
        .map_err(|_| crate::Error::general(format!("negative MRC header field {field}: {value}")))
}

impl MrcHeader {
    pub(crate) fn parse(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(crate::Error::general(format!(
                "MRC header needs {HEADER_LEN} bytes, found {}",
                bytes.len()
            )));
        }
        // machine stamp: 0x44 0x4? little endian, 0x11 0x11 big endian; missing stamps are common
        let little_endian = bytes[212] != 0x11;
        let f = Fields {
            bytes,
            little_endian,
        };
        let imod_flags = (f.i32(152) == IMOD_STAMP).then(|| f.i32(156));
        Ok(Self {
            nx: non_negative(f.i32(0), "nx")?,
            ny: non_negative(f.i32(4), "ny")?,
            nz: non_negative(f.i32(8), "nz")?,
            mode: f.i32(12),
            grid: [f.i32(28), f.i32(32), f.i32(36)],
            cell: [f.f32(40), f.f32(44), f.f32(48)],
            nsymbt: non_negative(f.i32(92), "nsymbt")?,
            imod_flags,
            origin: [f.f32(196), f.f32(200), f.f32(204)],
            little_endian,
        })
    }

    /// A little-endian header for a fresh volume.
    ///
    /// Only `(nz, ny, nx)` shapes are accepted; a single section is `(1, ny, nx)`.
    pub(crate) fn new(shape: &[u64], dtype: DType) -> crate::Result<Self> {
        let [nz, ny, nx] = *shape else {
            return Err(crate::Error::Unsupported(format!(
                "MRC volumes are (nz, ny, nx), not shape {shape:?}"
            )));
        };
        let dim = |n: u64| {
            u32::try_from(n)
                .ok()
                .filter(|&n| n <= i32::MAX as u32)
                .ok_or_else(|| crate::Error::Unsupported(format!("MRC dimension {n} is too large")))
        };
        let (mode, imod_flags) = match dtype {
            DType::Uint8 => (0, Some(0)),
            DType::Int8 => (0, Some(IMOD_FLAG_SIGNED_BYTES)),
            DType::Int16 => (1, None),
            DType::Float32 => (2, None),
            DType::Uint16 => (6, None),
            other => {
                return Err(crate::Error::Unsupported(format!(
                    "MRC cannot store {other}"
                )));
            }
        };
        let (nx, ny, nz) = (dim(nx)?, dim(ny)?, dim(nz)?);
        Ok(Self {
            nx,
            ny,
            nz,
            mode,
            grid: [nx as i32, ny as i32, nz as i32],
            cell: [nx as f32, ny as f32, nz as f32],
            nsymbt: 0,
            imod_flags,
            origin: [0.0; 3],
            little_endian: true,
        })
    }

    /// Always written little-endian.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_LEN];
        let mut put = |offset: usize, word: [u8; 4]| out[offset..offset + 4].copy_from_slice(&word);
        put(0, (self.nx as i32).to_le_bytes());
        put(4, (self.ny as i32).to_le_bytes());
        put(8, (self.nz as i32).to_le_bytes());
        put(12, self.mode.to_le_bytes());
        for (i, g) in self.grid.iter().enumerate() {
            put(28 + 4 * i, g.to_le_bytes());
        }
        for (i, c) in self.cell.iter().enumerate() {
            put(40 + 4 * i, c.to_le_bytes());
        }
        for (i, angle) in [90f32; 3].iter().enumerate() {
            put(52 + 4 * i, angle.to_le_bytes());
        }
        for (i, axis) in [1i32, 2, 3].iter().enumerate() {
            put(64 + 4 * i, axis.to_le_bytes());
        }
        put(92, (self.nsymbt as i32).to_le_bytes());
        put(108, 20140i32.to_le_bytes());
        if let Some(flags) = self.imod_flags {
            put(152, IMOD_STAMP.to_le_bytes());
            put(156, flags.to_le_bytes());
        }
        for (i, o) in self.origin.iter().enumerate() {
            put(196 + 4 * i, o.to_le_bytes());
        }
        put(208, *MAP_ID);
        put(212, [0x44, 0x44, 0, 0]);
        out
    }

    pub(crate) fn dtype(&self) -> crate::Result<DType> {
        match self.mode {
            0 => match self.imod_flags {
                Some(flags) if flags & IMOD_FLAG_SIGNED_BYTES == 0 => Ok(DType::Uint8),
                _ => Ok(DType::Int8),
            },
            1 => Ok(DType::Int16),
            2 => Ok(DType::Float32),
            6 => Ok(DType::Uint16),
            m => Err(crate::Error::Unsupported(format!("MRC mode {m}"))),
        }
    }

    /// `(nz, ny, nx)`
    pub(crate) fn shape(&self) -> Vec<u64> {
        vec![self.nz as u64, self.ny as u64, self.nx as u64]
    }

    pub(crate) fn data_offset(&self) -> u64 {
        HEADER_LEN as u64 + self.nsymbt as u64
    }

    /// Voxel spacing in `(z, y, x)` order.
    pub(crate) fn voxel_size(&self) -> [f64; 3] {
        let spacing = |i: usize| {
            if self.grid[i] > 0 {
                self.cell[i] as f64 / self.grid[i] as f64
            } else {
                1.0
            }
        };
        [spacing(2), spacing(1), spacing(0)]
    }
}

fn swap_elements(bytes: &mut [u8], width: usize) {
    if width > 1 {
        bytes.chunks_exact_mut(width).for_each(<[u8]>::reverse);
    }
}

/// The contiguous runs of `region`: one per `(z, y)` pair, as `(byte offset, element count)`.
fn rows(header: &MrcHeader, region: &[Range<u64>], width: u64) -> Vec<(u64, usize)> {
    let (nx, ny) = (header.nx as u64, header.ny as u64);
    let run = (region[2].end - region[2].start) as usize;
    let mut out = Vec::new();
    for z in region[0].clone() {
        for y in region[1].clone() {
            let element = (z * ny + y) * nx + region[2].start;
            out.push((header.data_offset() + element * width, run));
        }
    }
    out
}

pub(crate) struct MrcArray {
    path: PathBuf,
    header: MrcHeader,
    dtype: DType,
}

impl MrcArray {
    pub(crate) fn open(path: &Path) -> crate::Result<Self> {
        let mut buf = vec![0u8; HEADER_LEN];
        File::open(path)?.read_exact(&mut buf)?;
        let header = MrcHeader::parse(&buf)?;
        let dtype = header.dtype()?;
        Ok(Self {
            path: path.to_path_buf(),
            header,
            dtype,
        })
    }

    /// Write a header and a zero-filled data block, replacing any existing file.
    pub(crate) fn create(path: &Path, shape: &[u64], dtype: DType) -> crate::Result<Self> {
        let header = MrcHeader::new(shape, dtype)?;
        log::debug!("creating MRC file {path:?} with shape {:?}", header.shape());
        let mut file = File::create(path)?;
        file.write_all(&header.to_bytes())?;
        let numel: u64 = header.shape().iter().product();
        file.set_len(header.data_offset() + numel * dtype.size() as u64)?;
        Ok(Self {
            path: path.to_path_buf(),
            header,
            dtype,
        })
    }
}

impl ArrayBackend for MrcArray {
    fn shape(&self) -> Vec<u64> {
        self.header.shape()
    }

    /// One section.
    fn chunks(&self) -> Vec<u64> {
        vec![1, self.header.ny as u64, self.header.nx as u64]
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn attributes(&self) -> crate::Result<Attributes> {
        let [ox, oy, oz] = self.header.origin;
        let mut attributes = Attributes::new();
        attributes.insert("mode".into(), json!(self.header.mode));
        attributes.insert("voxel_size".into(), json!(self.header.voxel_size()));
        attributes.insert("origin".into(), json!([oz, oy, ox]));
        Ok(attributes)
    }

    fn set_attributes(&self, _attributes: Attributes) -> crate::Result<()> {
        Err(crate::Error::Unsupported(
            "MRC attributes are derived from the header and are read-only".into(),
        ))
    }

    fn read_region<T: Scalar>(&self, region: &[Range<u64>]) -> crate::Result<ArrayD<T>> {
        check_dtype::<T>(self.dtype)?;
        check_region(&self.shape(), region)?;
        let width = self.dtype.size();
        let mut file = File::open(&self.path)?;
        let runs = rows(&self.header, region, width as u64);
        let mut buf = Vec::with_capacity(runs.iter().map(|(_, n)| n * width).sum());
        for (offset, count) in runs {
            let start = buf.len();
            buf.resize(start + count * width, 0);
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf[start..])?;
        }
        if self.header.little_endian != cfg!(target_endian = "little") {
            swap_elements(&mut buf, width);
        }
        let values: Vec<T> = bytemuck::pod_collect_to_vec(&buf);
        let shape: Vec<usize> = region.iter().map(|r| (r.end - r.start) as usize).collect();
        ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(crate::Error::wrap)
    }

    fn write_region<T: Scalar>(&self, offset: &[u64], data: ArrayViewD<'_, T>) -> crate::Result<()> {
        check_dtype::<T>(self.dtype)?;
        let region = region_at(offset, data.shape());
        check_region(&self.shape(), &region)?;
        let width = self.dtype.size();
        let mut bytes: Vec<u8> = Vec::with_capacity(data.len() * width);
        for value in data.iter() {
            bytes.extend_from_slice(bytemuck::bytes_of(value));
        }
        if self.header.little_endian != cfg!(target_endian = "little") {
            swap_elements(&mut bytes, width);
        }
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        let mut cursor = 0;
        for (offset, count) in rows(&self.header, &region, width as u64) {
            let len = count * width;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&bytes[cursor..cursor + len])?;
            cursor += len;
        }
        log::trace!("wrote {region:?} to {:?}", self.path);
        Ok(())
    }
}

/// Check a chunk request for a section-addressable volume.
///
/// Only the first axis can be split; every other axis must be `-1` or its full extent.
pub(crate) fn validate_section_chunks(
    path: &str,
    shape: &[u64],
    chunks: &[i64],
) -> crate::Result<Vec<u64>> {
    let incompatible = || crate::Error::IncompatibleChunking {
        path: path.to_string(),
        chunks: chunks.to_vec(),
        shape: shape.to_vec(),
    };
    if chunks.len() != shape.len() {
        return Err(incompatible());
    }
    chunks
        .iter()
        .zip(shape)
        .enumerate()
        .map(|(axis, (&c, &n))| match c {
            -1 => Ok(n.max(1)),
            c if c > 0 && axis == 0 => Ok(c as u64),
            c if c > 0 && c as u64 == n => Ok(n),
            _ => Err(incompatible()),
        })
        .collect()
}
