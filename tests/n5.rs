use std::path::Path;

use fibsem_io::{AccessMode, ArraySpec, Compressor, CreateOptions, DType, access, read};
use ndarray::{Array, ArrayD, IxDyn};
use serde_json::{Value, json};

fn container() -> (tempfile::TempDir, String) {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("volume.n5");
    (dir, path.to_string_lossy().into_owned())
}

fn read_json(path: &Path) -> Value {
    let bytes = std::fs::read(path).expect("should read file");
    serde_json::from_slice(&bytes).expect("should parse json")
}

#[test]
fn array_metadata_is_n5_ordered() {
    let (_dir, path) = container();
    access(
        &format!("{path}/arr"),
        AccessMode::Write,
        CreateOptions::array(ArraySpec::new([6, 10], DType::Uint16).with_chunks([3, 4]))
            .with_attributes(json!({"resolution": [4, 4]}).as_object().cloned().expect("object")),
    )
    .expect("should create array");

    let root = read_json(&Path::new(&path).join("attributes.json"));
    assert_eq!(root["n5"], json!("4.0.0"));

    let meta = read_json(&Path::new(&path).join("arr").join("attributes.json"));
    assert_eq!(meta["dimensions"], json!([10, 6]));
    assert_eq!(meta["blockSize"], json!([4, 3]));
    assert_eq!(meta["dataType"], json!("uint16"));
    assert_eq!(meta["compression"]["type"], json!("raw"));
    assert_eq!(meta["resolution"], json!([4, 4]));
    assert!(meta.get("n5").is_none());

    let array = read(&format!("{path}/arr"))
        .expect("should open")
        .into_array()
        .expect("should be an array");
    assert_eq!(array.shape(), vec![6, 10]);
    assert_eq!(array.chunks(), vec![3, 4]);
    assert_eq!(array.dtype(), DType::Uint16);
    assert_eq!(
        array.attrs().expect("should read attrs"),
        json!({"resolution": [4, 4]}).as_object().cloned().expect("object")
    );
}

#[test]
fn blocks_are_big_endian_with_header() {
    let (_dir, path) = container();
    let array = access(
        &format!("{path}/arr"),
        AccessMode::Write,
        CreateOptions::array(ArraySpec::new([4, 6], DType::Uint16).with_chunks([2, 3])),
    )
    .expect("should create array")
    .into_array()
    .expect("should be an array");

    let data = Array::from_iter(0..24u16)
        .into_shape_with_order(IxDyn(&[4, 6]))
        .expect("should reshape");
    array
        .write_region(&[0, 0], data.view())
        .expect("should write data");

    // grid index (0, 1) is stored under the reversed key
    let block = std::fs::read(Path::new(&path).join("arr").join("1").join("0"))
        .expect("should read block");
    let mut expected = Vec::new();
    expected.extend(0u16.to_be_bytes());
    expected.extend(2u16.to_be_bytes());
    expected.extend(3u32.to_be_bytes());
    expected.extend(2u32.to_be_bytes());
    for v in [3u16, 4, 5, 9, 10, 11] {
        expected.extend(v.to_be_bytes());
    }
    assert_eq!(block, expected);

    let back: ArrayD<u16> = array.read_all().expect("should read data");
    assert_eq!(back, data);
}

#[test]
fn compressed_round_trip() {
    let (_dir, path) = container();
    let spec = ArraySpec::new([5, 7, 9], DType::Float32)
        .with_chunks([2, 4, 4])
        .with_compressor(Compressor::gzip(-1));
    let array = access(&path, AccessMode::Write, CreateOptions::array(spec))
        .expect("should create array")
        .into_array()
        .expect("should be an array");
    let data = Array::from_shape_fn(IxDyn(&[5, 7, 9]), |i| (i[0] * 100 + i[1] * 10 + i[2]) as f32);
    array
        .write_region(&[0, 0, 0], data.view())
        .expect("should write data");

    let meta = read_json(&Path::new(&path).join("attributes.json"));
    assert_eq!(meta["compression"]["type"], json!("gzip"));
    assert_eq!(meta["n5"], json!("4.0.0"));

    let back: ArrayD<f32> = read(&path)
        .expect("should open")
        .into_array()
        .expect("should be an array")
        .read_all()
        .expect("should read data");
    assert_eq!(back, data);
}

#[test]
fn group_attributes_hide_version() {
    let (_dir, path) = container();
    access(
        &path,
        AccessMode::Write,
        CreateOptions::group(json!({"foo": "bar"}).as_object().cloned().expect("object")),
    )
    .expect("should create group");
    access(
        &format!("{path}/a/b"),
        AccessMode::Write,
        CreateOptions::group(Default::default()),
    )
    .expect("should create nested group");

    let root = read(&path)
        .expect("should open")
        .into_group()
        .expect("should be a group");
    assert_eq!(
        root.attrs().expect("should read attrs"),
        json!({"foo": "bar"}).as_object().cloned().expect("object")
    );
    assert_eq!(root.member_names().expect("should list"), vec!["a"]);
    let inner = root.group("a").expect("should open child");
    assert_eq!(inner.member_names().expect("should list"), vec!["b"]);
    assert_eq!(read_json(&Path::new(&path).join("attributes.json"))["foo"], json!("bar"));
}

#[test]
fn directories_without_attributes_are_groups() {
    let (_dir, path) = container();
    let root = Path::new(&path);
    let level = root.join("raw").join("s0");
    std::fs::create_dir_all(level.join("0")).expect("should create dirs");
    std::fs::write(root.join("attributes.json"), br#"{"n5": "4.0.0"}"#)
        .expect("should write root attributes");
    let meta = json!({
        "dimensions": [2, 3],
        "blockSize": [2, 3],
        "dataType": "uint8",
        "compression": {"type": "raw"},
    });
    std::fs::write(
        level.join("attributes.json"),
        serde_json::to_vec(&meta).expect("should serialize"),
    )
    .expect("should write array attributes");
    // mode 0, 2 dimensions, then the reversed shape
    let mut block = vec![0, 0, 0, 2, 0, 0, 0, 2, 0, 0, 0, 3];
    block.extend(1..=6u8);
    std::fs::write(level.join("0").join("0"), block).expect("should write block");

    let raw = read(&format!("{path}/raw"))
        .expect("should open")
        .into_group()
        .expect("should be a group");
    assert!(raw.attrs().expect("should read attrs").is_empty());
    assert_eq!(raw.member_names().expect("should list"), vec!["s0"]);
    let s0 = raw.array("s0").expect("should open child");
    assert_eq!(s0.shape(), vec![3, 2]);
    let data: ArrayD<u8> = s0.read_all().expect("should read data");
    assert_eq!(data.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6]);

    let writable = access(&format!("{path}/raw"), AccessMode::ReadWrite, CreateOptions::default())
        .expect("should open")
        .into_group()
        .expect("should be a group");
    writable
        .set_attrs(json!({"foo": 1}).as_object().cloned().expect("object"))
        .expect("should write attributes");
    assert_eq!(read_json(&root.join("raw").join("attributes.json")), json!({"foo": 1}));

    let err = read(&format!("{path}/missing")).unwrap_err();
    assert!(err.is_backend_state());
}
