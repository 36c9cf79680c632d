#![cfg(feature = "hdf5")]

use fibsem_io::{AccessMode, ArraySpec, CreateOptions, DType, access, read, read_dask};
use ndarray::{Array, ArrayD, IxDyn};
use serde_json::json;

fn attrs() -> fibsem_io::Attributes {
    json!({"resolution": "1000", "offset": [1, 2], "valid": true})
        .as_object()
        .cloned()
        .expect("should be an object")
}

fn h5_path(dir: &tempfile::TempDir) -> String {
    env_logger::try_init().ok();
    dir.path().join("data.h5").to_string_lossy().into_owned()
}

#[test]
fn test_access_array_h5() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = format!("{}/volume", h5_path(&dir));
    let spec = ArraySpec::new([6, 8], DType::Float32).with_chunks([3, 4]);
    let array = access(
        &path,
        AccessMode::Write,
        CreateOptions::array(spec).with_attributes(attrs()),
    )
    .expect("should create array")
    .into_array()
    .expect("should be an array");

    let data = Array::from_shape_fn(IxDyn(&[6, 8]), |i| (i[0] * 8 + i[1]) as f32);
    array
        .write_region(&[0, 0], data.view())
        .expect("should write data");

    let opened = read(&path)
        .expect("should open")
        .into_array()
        .expect("should be an array");
    assert_eq!(opened.attrs().expect("should read attrs"), attrs());
    assert_eq!(opened.dtype(), DType::Float32);
    assert_eq!(opened.chunks(), vec![3, 4]);
    let back: ArrayD<f32> = opened.read_all().expect("should read data");
    assert_eq!(back, data);

    let lazy = read_dask::<f32>(&path, Some(&[2, -1])).expect("should open lazily");
    assert_eq!(lazy.chunks(), &[2, 8]);
    assert_eq!(lazy.compute().expect("should compute"), data);
}

#[test]
fn test_access_group_h5() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = h5_path(&dir);
    access(&path, AccessMode::Write, CreateOptions::group(attrs())).expect("should create group");
    access(
        &format!("{path}/inner/deeper"),
        AccessMode::Append,
        CreateOptions::group(Default::default()),
    )
    .expect("should create nested group");

    let group = read(&path)
        .expect("should open")
        .into_group()
        .expect("should be a group");
    assert_eq!(group.attrs().expect("should read attrs"), attrs());
    assert_eq!(group.member_names().expect("should list"), vec!["inner"]);

    let writable = access(&path, AccessMode::ReadWrite, CreateOptions::default())
        .expect("should open")
        .into_group()
        .expect("should be a group");
    writable
        .update_attrs(json!({"resolution": "2000"}).as_object().cloned().expect("object"))
        .expect("should update");
    assert_eq!(group.attrs().expect("should read attrs")["resolution"], json!("2000"));

    let err = access(&path, AccessMode::WriteNew, CreateOptions::default()).unwrap_err();
    assert!(err.is_backend_state());
}
