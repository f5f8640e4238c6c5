use crate::types::{AttributeRecord, AttributeTable, AttributeValue, Attributes, RawIdentifier, RawTract};
use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use geo::MultiPolygon;
use shapefile::dbase::FieldValue;
use shapefile::Reader;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{info, warn};

/// Reads the walkability CSV. The id column is kept as text; every other
/// column becomes a nullable attribute.
pub fn load_attributes(path: &Path, id_column: &str) -> Result<AttributeTable> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open CSV file: {:?}", path))?;
    let mut rdr = ReaderBuilder::new().from_reader(file);
    let headers = rdr.headers()?.clone();

    let id_idx = headers
        .iter()
        .position(|h| h == id_column)
        .ok_or_else(|| anyhow!("Join column '{}' not found in CSV", id_column))?;

    let columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, h)| *i != id_idx && !h.is_empty())
        .map(|(i, h)| (i, h.to_string()))
        .collect();

    let mut rows = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Malformed CSV row {}", line + 1))?;
        let id = RawIdentifier::Text(record.get(id_idx).unwrap_or("").to_string());

        let values: Attributes = columns
            .iter()
            .map(|(i, name)| (name.clone(), record.get(*i).and_then(AttributeValue::parse)))
            .collect();

        rows.push(AttributeRecord { id, values });
    }

    info!("Loaded {} attribute rows with {} columns", rows.len(), columns.len());
    Ok(AttributeTable {
        columns: columns.into_iter().map(|(_, name)| name).collect(),
        rows,
    })
}

/// Reads tract polygons from a shapefile or GeoJSON, by extension.
pub fn load_tracts(path: &Path, id_column: &str) -> Result<Vec<RawTract>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .ok_or_else(|| anyhow!("Input geometry file has no extension"))?;

    let tracts = match extension.as_str() {
        "shp" => load_shapefile(path, id_column)?,
        "json" | "geojson" => load_geojson(path, id_column)?,
        _ => return Err(anyhow!("Unsupported geometry format: {}", extension)),
    };

    info!("Loaded geometry for {} tracts", tracts.len());
    Ok(tracts)
}

fn shapefile_id(value: &FieldValue) -> Result<RawIdentifier> {
    match value {
        FieldValue::Character(s) => Ok(RawIdentifier::Text(s.clone().unwrap_or_default())),
        FieldValue::Numeric(Some(n)) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
            Ok(RawIdentifier::Integer(*n as i64))
        }
        FieldValue::Numeric(Some(n)) => Ok(RawIdentifier::Text(n.to_string())),
        FieldValue::Numeric(None) => Ok(RawIdentifier::Text(String::new())),
        other => Err(anyhow!(
            "Shapefile join column must be text or numeric, found {:?}",
            other
        )),
    }
}

fn load_shapefile(path: &Path, id_column: &str) -> Result<Vec<RawTract>> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open Shapefile: {:?}", path))?;

    let mut tracts = Vec::new();
    let mut skipped = 0;

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;

        let id_value = record
            .get(id_column)
            .ok_or_else(|| anyhow!("Join column '{}' not found in Shapefile", id_column))?;
        let id = shapefile_id(id_value)?;

        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygon: {:?}", e))?,
            shapefile::Shape::PolygonM(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygonM: {:?}", e))?,
            shapefile::Shape::PolygonZ(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygonZ: {:?}", e))?,
            _ => {
                skipped += 1;
                continue;
            }
        };

        tracts.push(RawTract { id, geometry });
    }

    if skipped > 0 {
        warn!("Skipped {} non-polygon shapes", skipped);
    }
    Ok(tracts)
}

fn geojson_id(value: Option<&serde_json::Value>) -> RawIdentifier {
    match value {
        Some(serde_json::Value::String(s)) => RawIdentifier::Text(s.clone()),
        Some(serde_json::Value::Number(n)) => match n.as_i64() {
            Some(i) => RawIdentifier::Integer(i),
            None => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    RawIdentifier::Integer(f as i64)
                }
                _ => RawIdentifier::Text(n.to_string()),
            },
        },
        // Null or missing ids surface as invalid identifiers during the join
        _ => RawIdentifier::Text(String::new()),
    }
}

fn load_geojson(path: &Path, id_column: &str) -> Result<Vec<RawTract>> {
    use geojson::GeoJson;

    let file = File::open(path)
        .with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
    let reader = BufReader::new(file);

    let geojson = GeoJson::from_reader(reader).context("Failed to parse GeoJSON")?;
    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("GeoJSON must be a FeatureCollection")),
    };

    let mut tracts = Vec::new();
    let mut skipped = 0;

    for feature in collection.features {
        let id = geojson_id(
            feature
                .properties
                .as_ref()
                .and_then(|props| props.get(id_column)),
        );

        let geometry = match feature.geometry {
            Some(geom) => {
                let valid_geo: geo::Geometry<f64> = geom
                    .value
                    .try_into()
                    .map_err(|e| anyhow!("Failed to convert geojson geometry: {:?}", e))?;

                match valid_geo {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => {
                        skipped += 1;
                        continue;
                    }
                }
            }
            None => {
                skipped += 1;
                continue;
            }
        };

        tracts.push(RawTract { id, geometry });
    }

    if skipped > 0 {
        warn!("Skipped {} features without polygon geometry", skipped);
    }
    Ok(tracts)
}
