//! HDF5 files, through the `hdf5` bindings.
//!
//! Handles keep only the file path and object name; every operation reopens the file.
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use hdf5::types::{FloatSize, IntSize, TypeDescriptor, VarLenUnicode};
use hdf5::{Dataset, File, Hyperslab, Selection, SliceOrIndex};
use ndarray::{ArrayD, ArrayViewD, IxDyn};
use serde_json::Value;

use super::{ArrayBackend, BackendKind, GroupBackend, check_region, region_at};
use crate::Attributes;
use crate::dtype::{DType, Scalar, check_dtype};
use crate::node::{
    AccessMode, ArrayHandle, ArrayInner, ArraySpec, CreateOptions, GroupHandle, GroupInner,
    Location, Node,
};

fn object_path(key: &str) -> String {
    format!("/{key}")
}

fn selection(region: &[Range<u64>]) -> Selection {
    let slices: Vec<SliceOrIndex> = region
        .iter()
        .map(|r| SliceOrIndex::from(r.start as usize..r.end as usize))
        .collect();
    Selection::from(Hyperslab::from(slices))
}

fn dtype_of(dataset: &Dataset) -> crate::Result<DType> {
    let descriptor = dataset.dtype()?.to_descriptor()?;
    let dtype = match descriptor {
        TypeDescriptor::Unsigned(IntSize::U1) => DType::Uint8,
        TypeDescriptor::Integer(IntSize::U1) => DType::Int8,
        TypeDescriptor::Unsigned(IntSize::U2) => DType::Uint16,
        TypeDescriptor::Integer(IntSize::U2) => DType::Int16,
        TypeDescriptor::Unsigned(IntSize::U4) => DType::Uint32,
        TypeDescriptor::Integer(IntSize::U4) => DType::Int32,
        TypeDescriptor::Unsigned(IntSize::U8) => DType::Uint64,
        TypeDescriptor::Integer(IntSize::U8) => DType::Int64,
        TypeDescriptor::Float(FloatSize::U4) => DType::Float32,
        TypeDescriptor::Float(FloatSize::U8) => DType::Float64,
        other => return Err(crate::Error::Unsupported(format!("hdf5 type {other:?}"))),
    };
    Ok(dtype)
}

fn read_attributes(location: &hdf5::Location) -> crate::Result<Attributes> {
    let mut out = Attributes::new();
    for name in location.attr_names()? {
        let attr = location.attr(&name)?;
        let value = match attr.dtype()?.to_descriptor()? {
            TypeDescriptor::VarLenUnicode => {
                let s: VarLenUnicode = attr.read_scalar()?;
                let s = s.as_str();
                // values that were not scalars were stored as JSON text
                match serde_json::from_str::<Value>(s) {
                    Ok(v @ (Value::Array(_) | Value::Object(_) | Value::Null)) => v,
                    _ => Value::String(s.to_string()),
                }
            }
            TypeDescriptor::Boolean => Value::Bool(attr.read_scalar::<bool>()?),
            TypeDescriptor::Unsigned(_) => Value::from(attr.read_scalar::<u64>()?),
            TypeDescriptor::Integer(_) => Value::from(attr.read_scalar::<i64>()?),
            TypeDescriptor::Float(_) => Value::from(attr.read_scalar::<f64>()?),
            other => {
                log::warn!("skipping hdf5 attribute {name:?} of type {other:?}");
                continue;
            }
        };
        out.insert(name, value);
    }
    Ok(out)
}

fn write_string(location: &hdf5::Location, name: &str, value: &str) -> crate::Result<()> {
    let value = VarLenUnicode::from_str(value).map_err(crate::Error::wrap)?;
    location
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn write_attributes(location: &hdf5::Location, attributes: &Attributes) -> crate::Result<()> {
    for name in location.attr_names()? {
        location.delete_attr(&name)?;
    }
    for (name, value) in attributes {
        match value {
            Value::String(s) => write_string(location, name, s)?,
            Value::Bool(b) => location.new_attr::<bool>().create(name.as_str())?.write_scalar(b)?,
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    location.new_attr::<i64>().create(name.as_str())?.write_scalar(&i)?;
                } else if let Some(u) = n.as_u64() {
                    location.new_attr::<u64>().create(name.as_str())?.write_scalar(&u)?;
                } else if let Some(f) = n.as_f64() {
                    location.new_attr::<f64>().create(name.as_str())?.write_scalar(&f)?;
                }
            }
            other => write_string(location, name, &serde_json::to_string(other)?)?,
        }
    }
    Ok(())
}

/// Create every missing group on the way to `key`, excluding `key` itself.
fn ensure_parents(file: &File, key: &str) -> crate::Result<()> {
    let parts: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
    for depth in 1..parts.len() {
        let path = object_path(&parts[..depth].join("/"));
        if !file.link_exists(&path) {
            file.create_group(&path)?;
        }
    }
    Ok(())
}

fn new_dataset<T: Scalar>(
    file: &File,
    key: &str,
    shape: &[usize],
    chunks: Option<&[usize]>,
) -> crate::Result<Dataset> {
    let builder = file.new_dataset::<T>().shape(shape.to_vec());
    let dataset = match chunks {
        Some(chunks) => builder.chunk(chunks.to_vec()).create(object_path(key).as_str())?,
        None => builder.create(object_path(key).as_str())?,
    };
    Ok(dataset)
}

pub(crate) struct H5Array {
    path: PathBuf,
    key: String,
    shape: Vec<u64>,
    chunks: Vec<u64>,
    dtype: DType,
}

impl H5Array {
    pub(crate) fn open(path: &Path, key: &str) -> crate::Result<Self> {
        let file = File::open(path)?;
        let dataset = file.dataset(&object_path(key))?;
        let shape: Vec<u64> = dataset.shape().iter().map(|&n| n as u64).collect();
        let chunks = dataset
            .chunk()
            .map(|c| c.iter().map(|&n| n as u64).collect())
            .unwrap_or_else(|| shape.clone());
        Ok(Self {
            path: path.to_path_buf(),
            key: key.to_string(),
            dtype: dtype_of(&dataset)?,
            shape,
            chunks,
        })
    }

    fn create(file: &File, path: &Path, key: &str, spec: &ArraySpec) -> crate::Result<Self> {
        if spec.compressor != Default::default() {
            log::warn!("hdf5 datasets are created uncompressed; ignoring {:?}", spec.compressor);
        }
        ensure_parents(file, key)?;
        let shape: Vec<usize> = spec.shape.iter().map(|&n| n as usize).collect();
        let chunks: Option<Vec<usize>> = spec
            .chunks
            .as_ref()
            .map(|_| spec.resolved_chunks().iter().map(|&n| n as usize).collect());
        let chunks = chunks.as_deref();
        log::debug!("creating hdf5 dataset {key:?} with shape {shape:?}");
        match spec.dtype {
            DType::Uint8 => new_dataset::<u8>(file, key, &shape, chunks)?,
            DType::Int8 => new_dataset::<i8>(file, key, &shape, chunks)?,
            DType::Uint16 => new_dataset::<u16>(file, key, &shape, chunks)?,
            DType::Int16 => new_dataset::<i16>(file, key, &shape, chunks)?,
            DType::Uint32 => new_dataset::<u32>(file, key, &shape, chunks)?,
            DType::Int32 => new_dataset::<i32>(file, key, &shape, chunks)?,
            DType::Uint64 => new_dataset::<u64>(file, key, &shape, chunks)?,
            DType::Int64 => new_dataset::<i64>(file, key, &shape, chunks)?,
            DType::Float32 => new_dataset::<f32>(file, key, &shape, chunks)?,
            DType::Float64 => new_dataset::<f64>(file, key, &shape, chunks)?,
        };
        Ok(Self {
            path: path.to_path_buf(),
            key: key.to_string(),
            shape: spec.shape.clone(),
            chunks: spec.resolved_chunks(),
            dtype: spec.dtype,
        })
    }
}

impl ArrayBackend for H5Array {
    fn shape(&self) -> Vec<u64> {
        self.shape.clone()
    }

    fn chunks(&self) -> Vec<u64> {
        self.chunks.clone()
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn attributes(&self) -> crate::Result<Attributes> {
        let file = File::open(&self.path)?;
        read_attributes(&file.dataset(&object_path(&self.key))?)
    }

    fn set_attributes(&self, attributes: Attributes) -> crate::Result<()> {
        let file = File::open_rw(&self.path)?;
        write_attributes(&file.dataset(&object_path(&self.key))?, &attributes)
    }

    fn read_region<T: Scalar>(&self, region: &[Range<u64>]) -> crate::Result<ArrayD<T>> {
        check_dtype::<T>(self.dtype)?;
        check_region(&self.shape, region)?;
        let file = File::open(&self.path)?;
        let dataset = file.dataset(&object_path(&self.key))?;
        Ok(dataset.read_slice::<T, _, IxDyn>(selection(region))?)
    }

    fn write_region<T: Scalar>(&self, offset: &[u64], data: ArrayViewD<'_, T>) -> crate::Result<()> {
        check_dtype::<T>(self.dtype)?;
        let region = region_at(offset, data.shape());
        check_region(&self.shape, &region)?;
        let file = File::open_rw(&self.path)?;
        let dataset = file.dataset(&object_path(&self.key))?;
        dataset.write_slice(&data.as_standard_layout(), selection(&region))?;
        Ok(())
    }
}

pub(crate) struct H5Group {
    path: PathBuf,
    key: String,
}

impl H5Group {
    fn group(&self, file: &File) -> crate::Result<hdf5::Group> {
        Ok(file.group(&object_path(&self.key))?)
    }
}

impl GroupBackend for H5Group {
    fn attributes(&self) -> crate::Result<Attributes> {
        let file = File::open(&self.path)?;
        read_attributes(&self.group(&file)?)
    }

    fn set_attributes(&self, attributes: Attributes) -> crate::Result<()> {
        let file = File::open_rw(&self.path)?;
        write_attributes(&self.group(&file)?, &attributes)
    }

    fn member_names(&self) -> crate::Result<Vec<String>> {
        let file = File::open(&self.path)?;
        let mut names = self.group(&file)?.member_names()?;
        names.sort();
        Ok(names)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Array,
    Group,
}

fn kind_at(file: &File, key: &str) -> Option<Kind> {
    if key.is_empty() {
        return Some(Kind::Group);
    }
    let path = object_path(key);
    if !file.link_exists(&path) {
        None
    } else if file.dataset(&path).is_ok() {
        Some(Kind::Array)
    } else {
        Some(Kind::Group)
    }
}

pub(crate) fn open(location: &Location, mode: AccessMode, options: CreateOptions) -> crate::Result<Node> {
    let path = location.container.as_path();
    let key = location.key.as_str();
    let state = |reason: &str| crate::Error::backend_state(location.to_string(), mode, reason);
    if mode == AccessMode::WriteNew && key.is_empty() && path.exists() {
        return Err(state("file already exists"));
    }

    let file = match mode {
        AccessMode::Read if path.is_file() => File::open(path)?,
        AccessMode::ReadWrite if path.is_file() => File::open_rw(path)?,
        AccessMode::Read | AccessMode::ReadWrite => return Err(state("file does not exist")),
        AccessMode::Write if key.is_empty() => File::create(path)?,
        _ => File::append(path)?,
    };

    let existing = kind_at(&file, key);
    let create = match (mode, existing) {
        (AccessMode::Read | AccessMode::ReadWrite, None) => {
            return Err(state("no array or group at this path"));
        }
        (AccessMode::WriteNew, Some(_)) if !key.is_empty() => {
            return Err(state("a node already exists at this path"));
        }
        (AccessMode::Append, Some(Kind::Group)) if options.array.is_some() => {
            return Err(state("cannot open a group as an array"));
        }
        (AccessMode::Write, Some(_)) if !key.is_empty() => {
            log::debug!("unlinking hdf5 object {key:?}");
            file.unlink(&object_path(key))?;
            true
        }
        (_, None) => true,
        (AccessMode::Write | AccessMode::WriteNew, Some(_)) => true,
        (_, Some(_)) => false,
    };

    let location = Location::new(BackendKind::Hdf5, path, key);
    let node = match (create, options.array, existing) {
        (true, Some(spec), _) => {
            let array = H5Array::create(&file, path, key, &spec)?;
            drop(file);
            let handle = ArrayHandle::new(location, mode, ArrayInner::Hdf5(array));
            handle.set_attrs(options.attributes)?;
            Node::Array(handle)
        }
        (true, None, _) => {
            if !key.is_empty() && kind_at(&file, key).is_none() {
                ensure_parents(&file, key)?;
                file.create_group(&object_path(key))?;
            }
            drop(file);
            let group = H5Group {
                path: path.to_path_buf(),
                key: key.to_string(),
            };
            let handle = GroupHandle::new(location, mode, GroupInner::Hdf5(group));
            handle.set_attrs(options.attributes)?;
            Node::Group(handle)
        }
        (false, spec, Some(Kind::Array)) => {
            drop(file);
            let handle =
                ArrayHandle::new(location, mode, ArrayInner::Hdf5(H5Array::open(path, key)?));
            if let Some(spec) = spec {
                spec.check_matches(&handle)?;
            }
            if !options.attributes.is_empty() {
                handle.update_attrs(options.attributes)?;
            }
            Node::Array(handle)
        }
        (false, _, _) => {
            drop(file);
            let group = H5Group {
                path: path.to_path_buf(),
                key: key.to_string(),
            };
            let handle = GroupHandle::new(location, mode, GroupInner::Hdf5(group));
            if !options.attributes.is_empty() {
                handle.update_attrs(options.attributes)?;
            }
            Node::Group(handle)
        }
    };
    Ok(node)
}
