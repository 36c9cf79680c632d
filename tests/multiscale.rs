use fibsem_io::{
    AccessMode, ArrayHandle, ChunkedArray, Compressor, Coordinate, CreateOptions, DataArray,
    MetadataDialect, access, multiscale_group, multiscale_metadata, pyramid, read,
    store_blocks_many,
};
use ndarray::{Array, ArrayD, IxDyn};
use serde_json::json;

const PATHS: [&str; 2] = ["s0", "s1"];

fn level0() -> DataArray<u8> {
    let data = Array::from_iter((0..16 * 16 * 16).map(|i| (i % 256) as u8))
        .into_shape_with_order(IxDyn(&[16, 16, 16]))
        .expect("should reshape");
    let coords = vec![
        Coordinate::arange("z", 16, 10.0, 1.0).with_units("nm"),
        Coordinate::arange("y", 16, 20.0, 1.0).with_units("nm"),
        Coordinate::arange("x", 16, -30.0, 1.0).with_units("nm"),
    ];
    let data = ChunkedArray::from_array(data, &[8, 8, 8]).expect("should chunk");
    DataArray::new(data, coords).expect("should build level")
}

fn check_multiscale(suffix: &str, dialect_names: &[&str]) {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join(format!("pyramid{suffix}"));
    let path = path.to_string_lossy();

    let dialects = MetadataDialect::parse_all(dialect_names).expect("should parse dialects");
    let levels = pyramid(level0(), &[2, 2, 2], 2).expect("should coarsen");
    let chunks = vec![vec![8, 8, 8]; 2];
    let (g_meta, a_meta) =
        multiscale_metadata(&levels, &dialects, &PATHS).expect("should build metadata");

    multiscale_group(
        &path,
        &levels,
        &PATHS,
        &dialects,
        Some(chunks.as_slice()),
        Compressor::gzip(-1),
    )
    .expect("should create group");

    let targets: Vec<ArrayHandle> = PATHS
        .iter()
        .map(|name| {
            access(&format!("{path}/{name}"), AccessMode::Append, CreateOptions::default())
                .expect("should open array")
                .into_array()
                .expect("should be an array")
        })
        .collect();
    let sources: Vec<ChunkedArray<u8>> = levels
        .iter()
        .zip(&chunks)
        .map(|(level, c)| level.data.rechunk(c).expect("should rechunk"))
        .collect();
    store_blocks_many(&sources, &targets)
        .expect("should plan writes")
        .compute()
        .expect("should write");

    let group = read(&path)
        .expect("should open")
        .into_group()
        .expect("should be a group");
    assert_eq!(group.attrs().expect("should read attrs"), g_meta);
    for ((name, expected), level) in PATHS.iter().zip(&a_meta).zip(&levels) {
        let array = group.array(name).expect("should open child");
        assert_eq!(array.chunks(), vec![8, 8, 8]);
        assert_eq!(&array.attrs().expect("should read attrs"), expected);
        let stored: ArrayD<u8> = array.read_all().expect("should read data");
        assert_eq!(stored, level.data.compute().expect("should compute"));
    }
}

#[test]
fn test_multiscale_ngff_versioned() {
    check_multiscale(".zarr", &["ome-ngff@0.4"]);
}

#[test]
fn test_multiscale_neuroglancer() {
    check_multiscale(".n5", &["neuroglancer"]);
}

#[test]
fn test_multiscale_ngff() {
    check_multiscale(".zarr", &["ome-ngff"]);
}

#[test]
fn test_multiscale_ngff_and_neuroglancer() {
    check_multiscale(".zarr", &["ome-ngff", "neuroglancer"]);
}

#[test]
fn rewriting_a_pyramid_replaces_its_metadata() {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir().expect("should create temp dir");
    let path = dir.path().join("pyramid.zarr");
    let path = path.to_string_lossy();
    let levels = pyramid(level0(), &[2, 2, 2], 2).expect("should coarsen");

    for dialect in [MetadataDialect::Neuroglancer, MetadataDialect::OmeNgff] {
        let (g_meta, a_meta) =
            multiscale_metadata(&levels, &[dialect], &PATHS).expect("should build metadata");
        let group = multiscale_group(&path, &levels, &PATHS, &[dialect], None, Compressor::Raw)
            .expect("should create group");
        assert_eq!(group.attrs().expect("should read attrs"), g_meta);
        for (name, expected) in PATHS.iter().zip(&a_meta) {
            let array = group.array(name).expect("should open child");
            assert_eq!(&array.attrs().expect("should read attrs"), expected);
        }
    }

    // an existing level with a different shape is not silently kept
    let smaller = pyramid(levels[1].clone(), &[2, 2, 2], 2).expect("should coarsen");
    let err = multiscale_group(
        &path,
        &smaller,
        &PATHS,
        &[MetadataDialect::OmeNgff],
        None,
        Compressor::Raw,
    )
    .unwrap_err();
    assert!(matches!(err, fibsem_io::Error::ShapeMismatch { .. }), "{err:?}");
}

#[test]
fn ngff_document_contents() {
    let levels = pyramid(level0(), &[2, 2, 2], 2).expect("should coarsen");
    let (group, arrays) = multiscale_metadata(&levels, &[MetadataDialect::OmeNgff], &PATHS)
        .expect("should build metadata");
    let multiscale = &group["multiscales"][0];
    assert_eq!(multiscale["version"], json!("0.4"));
    assert_eq!(
        multiscale["axes"][2],
        json!({"name": "x", "type": "space", "unit": "nanometer"})
    );
    assert_eq!(
        multiscale["datasets"][1],
        json!({
            "path": "s1",
            "coordinateTransformations": [
                {"type": "scale", "scale": [2.0, 2.0, 2.0]},
                {"type": "translation", "translation": [10.5, 20.5, -29.5]},
            ],
        })
    );
    assert!(arrays.iter().all(|a| a.is_empty()));
}

#[test]
fn neuroglancer_document_contents() {
    let levels = pyramid(level0(), &[2, 2, 2], 2).expect("should coarsen");
    let (group, arrays) = multiscale_metadata(&levels, &[MetadataDialect::Neuroglancer], &PATHS)
        .expect("should build metadata");
    assert_eq!(group["axes"], json!(["x", "y", "z"]));
    assert_eq!(group["scales"], json!([[1, 1, 1], [2, 2, 2]]));
    assert_eq!(
        group["pixelResolution"],
        json!({"dimensions": [1.0, 1.0, 1.0], "unit": "nm"})
    );
    assert_eq!(arrays[1]["downsamplingFactors"], json!([2, 2, 2]));

    // the same levels spell the unit out for NGFF but keep it as given here
    let (ngff, _) = multiscale_metadata(&levels, &[MetadataDialect::OmeNgff], &PATHS)
        .expect("should build metadata");
    assert_eq!(ngff["multiscales"][0]["axes"][0]["unit"], json!("nanometer"));
}

#[test]
fn conflicting_dialects_are_rejected() {
    let levels = pyramid(level0(), &[2, 2, 2], 2).expect("should coarsen");
    let dialects = [MetadataDialect::OmeNgff, MetadataDialect::Cosem];
    match multiscale_metadata(&levels, &dialects, &PATHS) {
        Err(fibsem_io::Error::MetadataConflict { key, dialects }) => {
            assert_eq!(key, "multiscales");
            assert_eq!(dialects, vec!["ome-ngff@0.4", "cosem"]);
        }
        other => panic!("expected a metadata conflict, got {other:?}"),
    }

    let (_, arrays) = multiscale_metadata(&levels, &[MetadataDialect::Cosem], &PATHS)
        .expect("should build metadata");
    assert_eq!(arrays[1]["transform"]["scale"], json!([2.0, 2.0, 2.0]));
    assert!(multiscale_metadata(&levels, &dialects, &["s0"]).is_err());
    assert!("zarr-multiscales".parse::<MetadataDialect>().is_err());
}
