//! Pyramid metadata documents in the formats that viewers and tools read.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::data_array::Coordinate;
use crate::Attributes;

pub const NGFF_VERSION: &str = "0.4";

/// A schema for describing a multiscale pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataDialect {
    /// OME-NGFF `multiscales`, version [`NGFF_VERSION`].
    OmeNgff,
    /// The N5 layout read by neuroglancer.
    Neuroglancer,
    /// Per-array `transform` documents.
    Cosem,
}

impl MetadataDialect {
    pub fn name(&self) -> &'static str {
        match self {
            MetadataDialect::OmeNgff => "ome-ngff",
            MetadataDialect::Neuroglancer => "neuroglancer",
            MetadataDialect::Cosem => "cosem",
        }
    }

    /// Parse each of `names`.
    pub fn parse_all<S: AsRef<str>>(names: &[S]) -> crate::Result<Vec<Self>> {
        names.iter().map(|n| n.as_ref().parse()).collect()
    }

    /// Group document and one array document per level.
    pub(crate) fn documents(
        &self,
        transforms: &[Transform],
        array_paths: &[&str],
        name: Option<&str>,
    ) -> (Attributes, Vec<Attributes>) {
        match self {
            MetadataDialect::OmeNgff => ngff_documents(transforms, array_paths, name),
            MetadataDialect::Neuroglancer => neuroglancer_documents(transforms),
            MetadataDialect::Cosem => cosem_documents(transforms, array_paths, name),
        }
    }
}

impl fmt::Display for MetadataDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataDialect::OmeNgff => write!(f, "ome-ngff@{NGFF_VERSION}"),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for MetadataDialect {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, version) = match s.split_once('@') {
            Some((name, version)) => (name, Some(version)),
            None => (s, None),
        };
        match (name, version) {
            ("ome-ngff", None) | ("ome-ngff", Some(NGFF_VERSION)) => Ok(MetadataDialect::OmeNgff),
            ("neuroglancer", None) => Ok(MetadataDialect::Neuroglancer),
            ("cosem", None) => Ok(MetadataDialect::Cosem),
            _ => Err(crate::Error::UnknownDialect(s.to_string())),
        }
    }
}

/// Per-axis placement of one level, inferred from its coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub axes: Vec<String>,
    pub units: Vec<String>,
    /// Axis types, such as `space` or `time`.
    pub kinds: Vec<String>,
    pub translate: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Transform {
    /// Translation is the first coordinate, scale the step between the first two.
    pub fn from_coords(coords: &[Coordinate]) -> Self {
        Self {
            axes: coords.iter().map(|c| c.dim.clone()).collect(),
            units: coords.iter().map(|c| c.units.clone()).collect(),
            kinds: coords.iter().map(|c| c.kind.clone()).collect(),
            translate: coords
                .iter()
                .map(|c| c.values.first().copied().unwrap_or(0.0))
                .collect(),
            scale: coords
                .iter()
                .map(|c| match c.values.as_slice() {
                    [a, b, ..] => b - a,
                    _ => 1.0,
                })
                .collect(),
        }
    }

    fn to_value(&self) -> Value {
        json!({
            "axes": self.axes,
            "units": self.units,
            "translate": self.translate,
            "scale": self.scale,
        })
    }

    fn reversed(values: &[f64]) -> Vec<f64> {
        values.iter().rev().copied().collect()
    }
}

/// UDUNITS-2 name for common abbreviations; anything else is kept as given.
pub fn normalize_unit(unit: &str) -> String {
    let name = match unit {
        "pm" => "picometer",
        "Å" | "A" => "angstrom",
        "nm" => "nanometer",
        "um" | "µm" | "μm" | "micron" => "micrometer",
        "mm" => "millimeter",
        "cm" => "centimeter",
        "m" => "meter",
        "ns" => "nanosecond",
        "us" | "µs" => "microsecond",
        "ms" => "millisecond",
        "s" => "second",
        other => other,
    };
    name.to_string()
}

fn object(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        _ => Attributes::new(),
    }
}

fn ngff_documents(
    transforms: &[Transform],
    array_paths: &[&str],
    name: Option<&str>,
) -> (Attributes, Vec<Attributes>) {
    let Some(base) = transforms.first() else {
        return (Attributes::new(), Vec::new());
    };
    let axes: Vec<Value> = base
        .axes
        .iter()
        .zip(&base.units)
        .zip(&base.kinds)
        .map(|((axis, unit), kind)| json!({"name": axis, "type": kind, "unit": normalize_unit(unit)}))
        .collect();
    let datasets: Vec<Value> = transforms
        .iter()
        .zip(array_paths)
        .map(|(t, path)| {
            json!({
                "path": path,
                "coordinateTransformations": [
                    {"type": "scale", "scale": t.scale},
                    {"type": "translation", "translation": t.translate},
                ],
            })
        })
        .collect();
    let mut multiscale = json!({
        "version": NGFF_VERSION,
        "axes": axes,
        "datasets": datasets,
        "coordinateTransformations": [
            {"type": "scale", "scale": vec![1.0; base.axes.len()]},
        ],
    });
    if let Some(name) = name {
        multiscale["name"] = json!(name);
    }
    let group = object(json!({ "multiscales": [multiscale] }));
    (group, vec![Attributes::new(); transforms.len()])
}

// Neuroglancer reads the unit verbatim, so unlike the NGFF axes it is not normalized.
fn pixel_resolution(transform: &Transform) -> Value {
    json!({
        "dimensions": Transform::reversed(&transform.scale),
        "unit": transform.units.first().cloned().unwrap_or_default(),
    })
}

/// Integer downsampling of `level` relative to `base`, in XYZ order.
fn downsampling_factors(base: &Transform, level: &Transform) -> Vec<u64> {
    base.scale
        .iter()
        .zip(&level.scale)
        .rev()
        .map(|(b, l)| if *b == 0.0 { 1 } else { (l / b).round().max(1.0) as u64 })
        .collect()
}

fn neuroglancer_documents(transforms: &[Transform]) -> (Attributes, Vec<Attributes>) {
    let Some(base) = transforms.first() else {
        return (Attributes::new(), Vec::new());
    };
    let scales: Vec<Vec<u64>> = transforms
        .iter()
        .map(|t| downsampling_factors(base, t))
        .collect();
    let group = object(json!({
        "axes": base.axes.iter().rev().collect::<Vec<_>>(),
        "units": base.units.iter().rev().collect::<Vec<_>>(),
        "scales": scales,
        "pixelResolution": pixel_resolution(base),
    }));
    let arrays = transforms
        .iter()
        .zip(&scales)
        .map(|(t, factors)| {
            object(json!({
                "pixelResolution": pixel_resolution(t),
                "downsamplingFactors": factors,
            }))
        })
        .collect();
    (group, arrays)
}

fn cosem_documents(
    transforms: &[Transform],
    array_paths: &[&str],
    name: Option<&str>,
) -> (Attributes, Vec<Attributes>) {
    let datasets: Vec<Value> = transforms
        .iter()
        .zip(array_paths)
        .map(|(t, path)| json!({"path": path, "transform": t.to_value()}))
        .collect();
    let mut multiscale = json!({ "datasets": datasets });
    if let Some(name) = name {
        multiscale["name"] = json!(name);
    }
    let group = object(json!({ "multiscales": [multiscale] }));
    let arrays = transforms
        .iter()
        .map(|t| object(json!({ "transform": t.to_value() })))
        .collect();
    (group, arrays)
}

/// Merge documents from several dialects; a key two dialects disagree on is an error.
pub(crate) fn merge_documents(
    documents: Vec<(MetadataDialect, Attributes)>,
) -> crate::Result<Attributes> {
    let mut merged = Attributes::new();
    let mut origin: Vec<(String, MetadataDialect)> = Vec::new();
    for (dialect, document) in documents {
        for (key, value) in document {
            match merged.get(&key) {
                Some(existing) if *existing != value => {
                    let first = origin
                        .iter()
                        .find(|(k, _)| *k == key)
                        .map(|(_, d)| d.to_string())
                        .unwrap_or_default();
                    return Err(crate::Error::MetadataConflict {
                        key,
                        dialects: vec![first, dialect.to_string()],
                    });
                }
                Some(_) => (),
                None => {
                    origin.push((key.clone(), dialect));
                    merged.insert(key, value);
                }
            }
        }
    }
    Ok(merged)
}
