use fibsem_io::{
    AccessMode, Accessor, ArrayHandle, ArrayLike, ArraySpec, BackendKind, BackendRegistry,
    ChunkedArray, CreateOptions, DType, GroupHandle, GroupOptions, Node, access, create_group,
    delete_zbranch, read, read_dask, split_by_suffix, store_blocks,
};
use ndarray::{Array, ArrayD, IxDyn};
use serde_json::{Value, json};
use tempfile::TempDir;

/// A scratch directory and the path of a container with `suffix` inside it.
fn scratch(suffix: &str) -> (TempDir, String) {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join(format!("data{suffix}"));
    (dir, path.to_string_lossy().into_owned())
}

fn attrs(value: Value) -> fibsem_io::Attributes {
    value.as_object().cloned().expect("should be an object")
}

fn ramp(n: usize) -> ArrayD<u8> {
    Array::from_iter((0..n).map(|i| (i * 7 % 251) as u8)).into_dyn()
}

fn new_array(path: &str, spec: ArraySpec) -> ArrayHandle {
    access(path, AccessMode::Write, CreateOptions::array(spec))
        .expect("should create array")
        .into_array()
        .expect("should be an array")
}

fn new_group(path: &str, attributes: Value) -> GroupHandle {
    access(path, AccessMode::Write, CreateOptions::group(attrs(attributes)))
        .expect("should create group")
        .into_group()
        .expect("should be a group")
}

fn check_array_round_trip(suffix: &str) {
    let (_dir, path) = scratch(suffix);
    let data = ramp(100);
    let array = new_array(&path, ArraySpec::new([100], DType::Uint8).with_chunks([10]));
    array
        .write_region(&[0], data.view())
        .expect("should write data");

    let back: ArrayD<u8> = read(&path)
        .expect("should open")
        .into_array()
        .expect("should be an array")
        .read_all()
        .expect("should read data");
    assert_eq!(back, data);

    let lazy = read_dask::<u8>(&path, Some(&[10])).expect("should open lazily");
    assert_eq!(lazy.chunks(), &[10]);
    assert_eq!(lazy.num_blocks(), 10);
    assert_eq!(lazy.compute().expect("should compute"), data);
}

#[test]
fn test_access_array_zarr() {
    check_array_round_trip(".zarr");
}

#[test]
fn test_access_array_n5() {
    check_array_round_trip(".n5");
}

#[test]
fn test_read_dask_defaults_to_native_chunks() {
    let (_dir, path) = scratch(".zarr");
    let array = new_array(&path, ArraySpec::new([12, 9], DType::Uint8).with_chunks([5, 4]));
    array.fill(3u8).expect("should fill");

    let lazy = read_dask::<u8>(&path, None).expect("should open lazily");
    assert_eq!(lazy.chunks(), &[5, 4]);
    assert_eq!(lazy.grid_shape(), vec![3, 3]);

    let lazy = read_dask::<u8>(&path, Some(&[-1, 3])).expect("should open lazily");
    assert_eq!(lazy.chunks(), &[12, 3]);
    assert_eq!(
        lazy.compute().expect("should compute"),
        ArrayD::from_elem(IxDyn(&[12, 9]), 3u8)
    );

    let err = read_dask::<u8>(&path, Some(&[0, 3])).unwrap_err();
    assert!(err.is_incompatible_chunking());
    let err = read_dask::<u16>(&path, None).unwrap_err();
    assert!(matches!(err, fibsem_io::Error::DtypeMismatch { .. }));
}

#[test]
fn test_access_group_zarr() {
    let (_dir, path) = scratch(".zarr");
    let group = new_group(&path, json!({}));
    let foo = new_array(
        &format!("{path}/foo"),
        ArraySpec::new([100], DType::Uint8).with_chunks([10]),
    );
    foo.fill(42u8).expect("should fill");

    let again = access(&path, AccessMode::Append, CreateOptions::default()).expect("should open");
    assert_eq!(again, Node::Group(group.clone()));
    assert_eq!(group.member_names().expect("should list"), vec!["foo"]);

    // w replaces the existing hierarchy
    let fresh = new_group(&path, json!({}));
    assert_eq!(fresh, group);
    assert!(fresh.member_names().expect("should list").is_empty());
}

#[test]
fn test_access_group_n5() {
    let (_dir, path) = scratch(".n5");
    let group = access(
        &path,
        AccessMode::Append,
        CreateOptions::group(attrs(json!({"foo": "bar"}))),
    )
    .expect("should create group")
    .into_group()
    .expect("should be a group");
    let foo = new_array(
        &format!("{path}/foo"),
        ArraySpec::new([100], DType::Uint8).with_chunks([10]),
    );
    foo.fill(42u8).expect("should fill");
    drop(group);

    let group = read(&path)
        .expect("should open")
        .into_group()
        .expect("should be a group");
    assert_eq!(group.attrs().expect("should read attrs"), attrs(json!({"foo": "bar"})));
    let values: ArrayD<u8> = group
        .array("foo")
        .expect("should open child")
        .read_all()
        .expect("should read data");
    assert_eq!(values, ArrayD::from_elem(IxDyn(&[100]), 42u8));
}

#[test]
fn test_access_mrc() {
    let (_dir, path) = scratch(".mrc");
    let data = Array::from_iter(0..27u8)
        .into_shape_with_order(IxDyn(&[3, 3, 3]))
        .expect("should reshape");
    let array = new_array(&path, ArraySpec::new([3, 3, 3], DType::Uint8));
    array
        .write_region(&[0, 0, 0], data.view())
        .expect("should write data");

    let opened = read(&path)
        .expect("should open")
        .into_array()
        .expect("should be an array");
    assert_eq!(opened.kind(), BackendKind::Mrc);
    assert_eq!(opened.chunks(), vec![1, 3, 3]);
    assert_eq!(opened.read_all::<u8>().expect("should read"), data);
    let header = opened.attrs().expect("should read attrs");
    assert_eq!(header["mode"], json!(0));
    assert_eq!(header["voxel_size"], json!([1.0, 1.0, 1.0]));

    assert_eq!(
        read_dask::<u8>(&path, None).expect("should open").compute().expect("should compute"),
        data
    );
    assert_eq!(
        read_dask::<u8>(&path, Some(&[2, -1, -1]))
            .expect("should open")
            .compute()
            .expect("should compute"),
        data
    );
    let err = read_dask::<u8>(&path, Some(&[1, 1, 1])).unwrap_err();
    assert!(err.is_incompatible_chunking());

    let err = opened.set_attrs(attrs(json!({"a": 1}))).unwrap_err();
    assert!(err.is_backend_state());
    let writable = access(&path, AccessMode::ReadWrite, CreateOptions::default())
        .expect("should open")
        .into_array()
        .expect("should be an array");
    let err = writable.set_attrs(attrs(json!({"a": 1}))).unwrap_err();
    assert!(err.is_unsupported(), "{err:?}");
    let err = writable.update_attrs(attrs(json!({"a": 1}))).unwrap_err();
    assert!(err.is_unsupported(), "{err:?}");

    // sections are always three dimensional
    let (_flat_dir, flat) = scratch(".mrc");
    let err = access(
        &flat,
        AccessMode::Write,
        CreateOptions::array(ArraySpec::new([3, 3], DType::Uint8)),
    )
    .unwrap_err();
    assert!(err.is_unsupported(), "{err:?}");
    assert!(!std::path::Path::new(&flat).exists());
}

#[test]
fn test_mrc_partial_regions() {
    let (_dir, path) = scratch(".rec");
    let array = new_array(&path, ArraySpec::new([4, 5, 6], DType::Int16));
    let block = Array::from_elem(IxDyn(&[2, 2, 3]), -7i16);
    array
        .write_region(&[1, 3, 2], block.view())
        .expect("should write block");

    let all: ArrayD<i16> = array.read_all().expect("should read");
    assert_eq!(all.iter().filter(|&&v| v == -7).count(), 12);
    assert_eq!(all[[1, 3, 2]], -7);
    assert_eq!(all[[1, 2, 2]], 0);
    let region = array
        .read_region::<i16>(&[1..3, 3..5, 2..5])
        .expect("should read region");
    assert_eq!(region, block);
}

#[test]
fn test_path_splitting() {
    let split = split_by_suffix("s3://0/1/2.n5/3/4", &[".n5"]).expect("should split");
    assert_eq!(
        split.into_tuple(),
        ("s3://0/1/2.n5".into(), "3/4".into(), ".n5".into())
    );

    let sep = std::path::MAIN_SEPARATOR;
    let path = format!("0{sep}1{sep}2.n5{sep}3{sep}4");
    let split = split_by_suffix(&path, &[".n5"]).expect("should split");
    assert_eq!(
        split.into_tuple(),
        (format!("0{sep}1{sep}2.n5"), format!("3{sep}4"), ".n5".into())
    );

    let path = format!("0{sep}1{sep}2.n5");
    let split = split_by_suffix(&path, &[".n5"]).expect("should split");
    assert_eq!(split.into_tuple(), (path.clone(), String::new(), ".n5".into()));
}

#[test]
fn test_store_blocks() {
    let (_dir, path) = scratch(".zarr");
    let data = Array::from_iter(0..256i64)
        .into_shape_with_order(IxDyn(&[16, 16]))
        .expect("should reshape");
    let source = ChunkedArray::from_array(data.clone(), &[4, 4]).expect("should chunk");
    let target = new_array(&path, ArraySpec::new([16, 16], DType::Int64).with_chunks([4, 4]));

    let plan = store_blocks(&source, &target).expect("should plan");
    assert_eq!(plan.len(), 16);
    // nothing is written until the plan runs
    assert_eq!(
        target.read_all::<i64>().expect("should read"),
        ArrayD::<i64>::zeros(IxDyn(&[16, 16]))
    );
    plan.compute().expect("should write");
    plan.compute().expect("should rewrite");

    let back: ArrayD<i64> = read(&path)
        .expect("should open")
        .into_array()
        .expect("should be an array")
        .read_all()
        .expect("should read");
    assert_eq!(back, data);
}

#[test]
fn test_store_blocks_validation() {
    let (_dir, path) = scratch(".zarr");
    let target = new_array(&path, ArraySpec::new([16, 16], DType::Uint8).with_chunks([4, 4]));
    let data = ArrayD::<u8>::zeros(IxDyn(&[16, 16]));

    let misaligned = ChunkedArray::from_array(data.clone(), &[6, 4]).expect("should chunk");
    let err = store_blocks(&misaligned, &target).unwrap_err();
    assert!(err.is_incompatible_chunking());

    let whole = ChunkedArray::from_array(data.clone(), &[16, 16]).expect("should chunk");
    assert!(store_blocks(&whole, &target).is_ok());

    let wrong_shape =
        ChunkedArray::from_array(ArrayD::<u8>::zeros(IxDyn(&[8, 16])), &[4, 4]).expect("chunk");
    assert!(matches!(
        store_blocks(&wrong_shape, &target),
        Err(fibsem_io::Error::ShapeMismatch { .. })
    ));

    let wrong_type =
        ChunkedArray::from_array(ArrayD::<f32>::zeros(IxDyn(&[16, 16])), &[4, 4]).expect("chunk");
    assert!(matches!(
        store_blocks(&wrong_type, &target),
        Err(fibsem_io::Error::DtypeMismatch { .. })
    ));

    let read_only = read(&path)
        .expect("should open")
        .into_array()
        .expect("should be an array");
    let err = store_blocks(&whole, &read_only).unwrap_err();
    assert!(err.is_backend_state());

    let err = fibsem_io::store_blocks_many(&[whole], &[]).unwrap_err();
    assert!(err.is_cardinality_mismatch());
}

#[test]
fn test_group_initialization() {
    let (_dir, path) = scratch(".zarr");
    let foo: ArrayD<i64> = Array::from_iter(0..10i64).into_dyn();
    let bar: ArrayD<i64> = Array::from_iter(0..20i64).into_dyn();
    let arrays: [&dyn ArrayLike; 2] = [&foo, &bar];
    let array_attrs = [attrs(json!({"a": 10})), attrs(json!({"b": 15}))];
    let group_attrs = attrs(json!({"bla": "bla"}));

    let group = create_group(
        &path,
        &arrays,
        &["foo", "bar"],
        Some(&[vec![2], vec![2]]),
        group_attrs.clone(),
        Some(&array_attrs),
        &GroupOptions::default(),
    )
    .expect("should create group");

    assert_eq!(group.attrs().expect("should read attrs"), group_attrs);
    for ((name, source), expected) in ["foo", "bar"].iter().zip(arrays).zip(&array_attrs) {
        let array = group.array(name).expect("should open child");
        assert_eq!(array.shape(), source.shape());
        assert_eq!(array.dtype(), DType::Int64);
        assert_eq!(array.chunks(), vec![2]);
        assert_eq!(&array.attrs().expect("should read attrs"), expected);
    }
}

#[test]
fn test_group_initialization_errors() {
    let (_dir, path) = scratch(".zarr");
    let foo: ArrayD<u8> = ArrayD::zeros(IxDyn(&[4]));
    let arrays: [&dyn ArrayLike; 2] = [&foo, &foo];
    let options = GroupOptions::default();

    let err = create_group(&path, &arrays, &["a", "a"], None, Default::default(), None, &options)
        .unwrap_err();
    assert!(err.is_cardinality_mismatch());

    let err = create_group(&path, &arrays, &["a"], None, Default::default(), None, &options)
        .unwrap_err();
    assert!(err.is_cardinality_mismatch());

    let err = create_group(
        &path,
        &arrays,
        &["a", "b"],
        Some(&[vec![2]]),
        Default::default(),
        None,
        &options,
    )
    .unwrap_err();
    assert!(err.is_cardinality_mismatch());

    let err = create_group(
        &path,
        &arrays,
        &["a", "b"],
        Some(&[vec![2], vec![2, 2]]),
        Default::default(),
        None,
        &options,
    )
    .unwrap_err();
    assert!(err.is_incompatible_chunking());

    // nothing was created by the failed calls
    assert!(read(&path).unwrap_err().is_backend_state());

    let (_mrc_dir, mrc) = scratch(".mrc");
    let err = create_group(&mrc, &arrays, &["a", "b"], None, Default::default(), None, &options)
        .unwrap_err();
    assert!(matches!(err, fibsem_io::Error::Unsupported(_)));
}

#[test]
fn test_deletion() {
    let (_dir, path) = scratch(".zarr");
    let existing = new_array(
        &format!("{path}/bar"),
        ArraySpec::new([10], DType::Uint8).with_chunks([1]),
    );
    existing.fill(10u8).expect("should fill");
    let sibling = new_array(
        &format!("{path}/barn"),
        ArraySpec::new([4], DType::Uint8).with_chunks([2]),
    );
    sibling.fill(1u8).expect("should fill");

    let keys = existing.store_keys().expect("should list keys");
    assert!(keys.len() > 10);
    assert!(keys.iter().all(|k| k.starts_with("bar/")));
    let sibling_keys = sibling.store_keys().expect("should list keys");

    let node = Node::Array(existing.clone());
    delete_zbranch(&node).expect("should delete");
    assert!(existing.store_keys().expect("should list keys").is_empty());
    assert_eq!(sibling.store_keys().expect("should list keys"), sibling_keys);

    delete_zbranch(&node).expect("deleting twice should be a no-op");
    let root = read(&path)
        .expect("should open")
        .into_group()
        .expect("should be a group");
    assert_eq!(root.member_names().expect("should list"), vec!["barn"]);
}

#[test]
fn test_attributes_are_never_stale() {
    let (_dir, path) = scratch(".zarr");
    new_group(&path, json!({"v": 0}));
    let open = |mode| {
        access(&path, mode, CreateOptions::default())
            .expect("should open")
            .into_group()
            .expect("should be a group")
    };
    let first = open(AccessMode::Append);
    let second = open(AccessMode::Read);
    assert_eq!(second.attrs().expect("attrs")["v"], json!(0));

    first
        .update_attrs(attrs(json!({"v": 1, "w": [1, 2]})))
        .expect("should update");
    let seen = second.attrs().expect("attrs");
    assert_eq!(seen["v"], json!(1));
    assert_eq!(seen["w"], json!([1, 2]));

    let array = new_array(&format!("{path}/a"), ArraySpec::new([2], DType::Float32));
    let other = first.array("a").expect("should open child");
    array.set_attrs(attrs(json!({"unit": "nm"}))).expect("should set");
    assert_eq!(other.attrs().expect("attrs"), attrs(json!({"unit": "nm"})));
}

#[test]
fn test_access_modes() {
    let (_dir, path) = scratch(".zarr");
    let spec = ArraySpec::new([4], DType::Uint16);

    let err = read(&path).unwrap_err();
    assert!(err.is_backend_state());
    let err = access(&path, AccessMode::ReadWrite, CreateOptions::default()).unwrap_err();
    assert!(err.is_backend_state());

    new_array(&path, spec.clone());
    let err = access(&path, AccessMode::WriteNew, CreateOptions::array(spec.clone())).unwrap_err();
    assert!(err.is_backend_state());

    let read_only = read(&path).expect("should open").into_array().expect("array");
    let err = read_only.fill(1u16).unwrap_err();
    assert!(err.is_backend_state());
    let writable = access(&path, AccessMode::ReadWrite, CreateOptions::default())
        .expect("should open")
        .into_array()
        .expect("array");
    writable.fill(1u16).expect("should fill");

    // a reuses an existing array only when it matches the requested one
    let err = access(
        &path,
        AccessMode::Append,
        CreateOptions::array(ArraySpec::new([4, 4], DType::Float32)),
    )
    .unwrap_err();
    assert!(matches!(err, fibsem_io::Error::ShapeMismatch { .. }), "{err:?}");
    let err = access(
        &path,
        AccessMode::Append,
        CreateOptions::array(ArraySpec::new([4], DType::Uint8)),
    )
    .unwrap_err();
    assert!(matches!(err, fibsem_io::Error::DtypeMismatch { .. }), "{err:?}");
    let reused = access(&path, AccessMode::Append, CreateOptions::array(spec.clone()))
        .expect("should reuse array")
        .into_array()
        .expect("array");
    assert_eq!(reused.read_all::<u16>().expect("should read").sum(), 4);

    // w replaces an array with a group
    new_group(&path, json!({}));
    let err = access(&path, AccessMode::Append, CreateOptions::array(spec)).unwrap_err();
    assert!(err.is_backend_state());
}

#[test]
fn test_dispatch_errors() {
    env_logger::try_init().ok();
    let err = read("/tmp/volume.tif").unwrap_err();
    assert!(err.is_malformed_path());

    let err = read("s3://bucket/volume.zarr/s0").unwrap_err();
    assert!(matches!(err, fibsem_io::Error::Unsupported(_)));
}

#[test]
fn test_injected_registry() {
    let (dir, _) = scratch(".zarr");
    let path = dir.path().join("data.zr");
    let path = path.to_string_lossy();
    assert!(access(&path, AccessMode::Write, CreateOptions::default()).is_err());

    let accessor = Accessor::new(BackendRegistry::empty().with(".zr", BackendKind::Zarr));
    let node = accessor
        .access(&path, AccessMode::Write, CreateOptions::default())
        .expect("should create group");
    assert_eq!(node.location().kind, BackendKind::Zarr);
    assert!(accessor.read(&path).is_ok());
}

#[cfg(not(feature = "hdf5"))]
#[test]
fn test_hdf5_requires_feature() {
    let (_dir, path) = scratch(".h5");
    let err = access(&path, AccessMode::Write, CreateOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        fibsem_io::Error::BackendUnavailable(BackendKind::Hdf5)
    ));
}
