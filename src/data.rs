use crate::crs::Crs;
use crate::error::{MapError, MapResult};
use crate::types::{Feature, StudyArea};
use geo::MultiPolygon;
use geojson::GeoJson;
use shapefile::dbase::{self, FieldValue};
use shapefile::{Reader, ShapeReader};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// All polygon rows of one boundary file.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub path: PathBuf,
    /// Attribute names, sorted.
    pub columns: Vec<String>,
    pub features: Vec<Feature>,
    pub crs: Crs,
}

impl Dataset {
    /// Reads a shapefile or GeoJSON file. `crs_override` replaces whatever the
    /// file declares.
    pub fn load(path: &Path, crs_override: Option<&str>) -> MapResult<Self> {
        info!("Loading boundaries from {:?}...", path);

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s: &str| s.to_lowercase())
            .ok_or_else(|| MapError::dataset(path, "file has no extension"))?;

        let crs_override = crs_override.map(Crs::from_name).transpose()?;
        let dataset = match extension.as_str() {
            "shp" => load_shapefile(path, crs_override)?,
            "json" | "geojson" => load_geojson(path, crs_override)?,
            _ => {
                return Err(MapError::dataset(
                    path,
                    format!("unsupported geometry format: {}", extension),
                ))
            }
        };

        info!(
            "Loaded {} features from {:?} ({} columns, {:?})",
            dataset.features.len(),
            dataset.path,
            dataset.columns.len(),
            dataset.crs
        );
        Ok(dataset)
    }

    fn ensure_field(&self, field: &str) -> MapResult<()> {
        if self.columns.iter().any(|c| c == field) {
            Ok(())
        } else {
            Err(MapError::MissingField {
                field: field.to_string(),
                available: self.columns.clone(),
            })
        }
    }

    /// Distinct values of `field`, sorted ascending.
    pub fn area_names(&self, field: &str) -> MapResult<Vec<String>> {
        self.ensure_field(field)?;
        let names: BTreeSet<&str> = self
            .features
            .iter()
            .filter_map(|f| f.attributes.get(field).map(String::as_str))
            .collect();
        Ok(names.into_iter().map(str::to_string).collect())
    }

    /// Merges every row whose `field` equals `name` and reprojects to WGS84.
    pub fn select(&self, field: &str, name: &str) -> MapResult<StudyArea> {
        self.ensure_field(field)?;

        let mut polygons = Vec::new();
        let mut rows = 0;
        for feature in &self.features {
            if feature.attributes.get(field).map(String::as_str) == Some(name) {
                rows += 1;
                polygons.extend(feature.geometry.0.iter().cloned());
            }
        }

        if rows == 0 {
            return Err(MapError::UnknownArea {
                field: field.to_string(),
                name: name.to_string(),
            });
        }
        debug!(rows, polygons = polygons.len(), "Selected '{}'", name);

        let geometry = self.crs.to_wgs84(&MultiPolygon::new(polygons));
        Ok(StudyArea {
            name: name.to_string(),
            geometry,
        })
    }
}

fn load_shapefile(path: &Path, crs_override: Option<Crs>) -> MapResult<Dataset> {
    // Columns come from the .dbf header so an empty table still lists them.
    let table = dbase::Reader::from_path(path.with_extension("dbf"))
        .map_err(|e| MapError::dataset(path, e))?;
    let mut columns: BTreeSet<String> = table
        .fields()
        .iter()
        .map(|f| f.name().to_string())
        .collect();
    let shapes = ShapeReader::from_path(path).map_err(|e| MapError::dataset(path, e))?;
    let mut reader = Reader::new(shapes, table);

    let mut features = Vec::new();
    let mut skipped = 0usize;

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result.map_err(|e| MapError::dataset(path, e))?;

        let record: HashMap<String, FieldValue> = record.into();
        let mut attributes = HashMap::with_capacity(record.len());
        for (key, value) in record {
            if let Some(text) = field_value_to_string(&value) {
                attributes.insert(key.clone(), text);
            }
            columns.insert(key);
        }

        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon
                .try_into()
                .map_err(|e| MapError::dataset(path, format!("bad polygon: {:?}", e)))?,
            shapefile::Shape::PolygonM(polygon) => polygon
                .try_into()
                .map_err(|e| MapError::dataset(path, format!("bad polygonM: {:?}", e)))?,
            shapefile::Shape::PolygonZ(polygon) => polygon
                .try_into()
                .map_err(|e| MapError::dataset(path, format!("bad polygonZ: {:?}", e)))?,
            _ => {
                skipped += 1;
                continue; // Skip non-polygon shapes
            }
        };

        features.push(Feature {
            attributes,
            geometry,
        });
    }

    if skipped > 0 {
        debug!("Skipped {} non-polygon shapes", skipped);
    }

    Ok(Dataset {
        path: path.to_path_buf(),
        columns: columns.into_iter().collect(),
        features,
        crs: match crs_override {
            Some(crs) => crs,
            None => shapefile_crs(path)?,
        },
    })
}

fn shapefile_crs(path: &Path) -> MapResult<Crs> {
    let prj = path.with_extension("prj");
    match fs::read_to_string(&prj) {
        Ok(wkt) => Crs::from_wkt(wkt.trim_start_matches('\u{feff}').trim()),
        Err(_) => {
            debug!("No readable {:?}, assuming WGS84", prj);
            Ok(Crs::Wgs84)
        }
    }
}

fn load_geojson(path: &Path, crs_override: Option<Crs>) -> MapResult<Dataset> {
    let file = File::open(path).map_err(|e| MapError::dataset(path, e))?;
    let reader = BufReader::new(file);

    // Parse the GeoJSON. warning: this loads the whole file into memory.
    let geojson = GeoJson::from_reader(reader).map_err(|e| MapError::dataset(path, e))?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(MapError::dataset(path, "GeoJSON must be a FeatureCollection")),
    };

    let declared = collection
        .foreign_members
        .as_ref()
        .and_then(|members| members.get("crs"))
        .and_then(|crs| crs.pointer("/properties/name"))
        .and_then(|name| name.as_str());
    let crs = match (crs_override, declared) {
        (Some(crs), _) => crs,
        (None, Some(name)) => Crs::from_name(name)?,
        (None, None) => Crs::Wgs84,
    };

    let mut columns = BTreeSet::new();
    let mut features = Vec::new();

    for feature in collection.features {
        let mut attributes = HashMap::new();
        if let Some(props) = &feature.properties {
            for (key, value) in props {
                columns.insert(key.clone());
                if let Some(text) = json_value_to_string(value) {
                    attributes.insert(key.clone(), text);
                }
            }
        }

        let geometry = match feature.geometry {
            Some(geom) => {
                let geom: geo::Geometry<f64> = geom
                    .value
                    .try_into()
                    .map_err(|e| MapError::dataset(path, format!("bad geometry: {:?}", e)))?;
                match geom {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => continue, // Skip points/lines
                }
            }
            None => continue,
        };

        features.push(Feature {
            attributes,
            geometry,
        });
    }

    Ok(Dataset {
        path: path.to_path_buf(),
        columns: columns.into_iter().collect(),
        features,
        crs,
    })
}

pub fn field_value_to_string(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Character(Some(s)) => Some(s.trim_end().to_string()),
        FieldValue::Memo(s) => Some(s.clone()),
        FieldValue::Numeric(Some(n)) => Some(n.to_string()),
        FieldValue::Float(Some(f)) => Some(f.to_string()),
        FieldValue::Integer(i) => Some(i.to_string()),
        FieldValue::Double(d) => Some(d.to_string()),
        FieldValue::Logical(Some(b)) => Some(b.to_string()),
        _ => None,
    }
}

fn json_value_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{BoundingRect, Centroid};
    use std::io::Write;
    use tempfile::TempDir;

    const COUNTIES: &str = r#"{
      "type": "FeatureCollection",
      "features": [
        {"type": "Feature", "properties": {"ADM1_EN": "Nairobi", "ADM1_PCODE": "KE047"},
         "geometry": {"type": "Polygon", "coordinates": [[[36.6,-1.4],[37.1,-1.4],[37.1,-1.1],[36.6,-1.1],[36.6,-1.4]]]}},
        {"type": "Feature", "properties": {"ADM1_EN": "Kisumu", "ADM1_PCODE": "KE042"},
         "geometry": {"type": "Polygon", "coordinates": [[[34.5,-0.4],[35.3,-0.4],[35.3,0.0],[34.5,0.0],[34.5,-0.4]]]}},
        {"type": "Feature", "properties": {"ADM1_EN": "Kisumu", "ADM1_PCODE": "KE042"},
         "geometry": {"type": "Polygon", "coordinates": [[[34.0,-0.2],[34.2,-0.2],[34.2,0.0],[34.0,-0.2]]]}},
        {"type": "Feature", "properties": {"ADM1_EN": "Baringo", "ADM1_PCODE": 30},
         "geometry": {"type": "MultiPolygon", "coordinates": [[[[35.6,0.2],[36.3,0.2],[36.3,1.2],[35.6,0.2]]]]}},
        {"type": "Feature", "properties": {"ADM1_EN": "Marker"},
         "geometry": {"type": "Point", "coordinates": [36.0, 0.0]}},
        {"type": "Feature", "properties": {"ADM1_EN": null},
         "geometry": {"type": "Polygon", "coordinates": [[[30,0],[31,0],[31,1],[30,0]]]}}
      ]
    }"#;

    fn write_fixture(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn geojson_names_are_sorted_and_distinct() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir, "counties.geojson", COUNTIES);
        let dataset = Dataset::load(&path, None).unwrap();

        assert_eq!(dataset.columns, ["ADM1_EN", "ADM1_PCODE"]);
        assert_eq!(dataset.features.len(), 5);
        assert_eq!(dataset.crs, Crs::Wgs84);
        assert_eq!(
            dataset.area_names("ADM1_EN").unwrap(),
            ["Baringo", "Kisumu", "Nairobi"]
        );
    }

    #[test]
    fn select_merges_all_matching_rows() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir, "counties.geojson", COUNTIES);
        let dataset = Dataset::load(&path, None).unwrap();

        let area = dataset.select("ADM1_EN", "Kisumu").unwrap();
        assert_eq!(area.name, "Kisumu");
        assert_eq!(area.geometry.0.len(), 2);
        let rect = area.geometry.bounding_rect().unwrap();
        assert_eq!((rect.min().x, rect.max().x), (34.0, 35.3));

        let matching = dataset
            .features
            .iter()
            .filter(|f| f.attributes.get("ADM1_EN").map(String::as_str) == Some("Kisumu"))
            .count();
        assert_eq!(matching, 2);
    }

    #[test]
    fn numeric_attributes_compare_as_strings() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir, "counties.geojson", COUNTIES);
        let dataset = Dataset::load(&path, None).unwrap();
        assert_eq!(
            dataset.area_names("ADM1_PCODE").unwrap(),
            ["30", "KE042", "KE047"]
        );
        assert!(dataset.select("ADM1_PCODE", "30").is_ok());
    }

    #[test]
    fn missing_field_lists_columns() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir, "counties.geojson", COUNTIES);
        let dataset = Dataset::load(&path, None).unwrap();

        match dataset.area_names("ADM2_EN") {
            Err(MapError::MissingField { field, available }) => {
                assert_eq!(field, "ADM2_EN");
                assert_eq!(available, ["ADM1_EN", "ADM1_PCODE"]);
            }
            other => panic!("unexpected: {:?}", other),
        }
        let message = dataset.select("ADM2_EN", "Kisumu").unwrap_err().to_string();
        assert!(message.contains("ADM1_EN, ADM1_PCODE"), "{message}");
    }

    #[test]
    fn unknown_area_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir, "counties.geojson", COUNTIES);
        let dataset = Dataset::load(&path, None).unwrap();
        assert!(matches!(
            dataset.select("ADM1_EN", "Atlantis"),
            Err(MapError::UnknownArea { .. })
        ));
    }

    #[test]
    fn missing_and_unsupported_files_fail_to_load() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.shp");
        assert!(matches!(Dataset::load(&missing, None), Err(MapError::DatasetLoad { .. })));
        assert!(matches!(
            Dataset::load(&dir.path().join("nope.geojson"), None),
            Err(MapError::DatasetLoad { .. })
        ));

        let csv = write_fixture(&dir, "areas.csv", "a,b\n1,2\n");
        assert!(matches!(Dataset::load(&csv, None), Err(MapError::DatasetLoad { .. })));

        let garbage = write_fixture(&dir, "broken.geojson", "{ not json");
        assert!(matches!(Dataset::load(&garbage, None), Err(MapError::DatasetLoad { .. })));

        let single = write_fixture(
            &dir,
            "single.geojson",
            r#"{"type": "Feature", "properties": {}, "geometry": null}"#,
        );
        assert!(matches!(Dataset::load(&single, None), Err(MapError::DatasetLoad { .. })));
    }

    #[test]
    fn mercator_collection_is_reprojected() {
        let dir = TempDir::new().unwrap();
        let body = r#"{
          "type": "FeatureCollection",
          "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::3857"}},
          "features": [
            {"type": "Feature", "properties": {"NAME": "Box"},
             "geometry": {"type": "Polygon", "coordinates": [[[4000000,-200000],[4200000,-200000],[4200000,0],[4000000,0],[4000000,-200000]]]}}
          ]
        }"#;
        let path = write_fixture(&dir, "box.geojson", body);
        let dataset = Dataset::load(&path, None).unwrap();
        assert_eq!(dataset.crs, Crs::WebMercator);

        let area = dataset.select("NAME", "Box").unwrap();
        let centroid = area.geometry.centroid().unwrap();
        assert!((36.0..38.0).contains(&centroid.x()), "{:?}", centroid);
        assert!((-1.0..0.0).contains(&centroid.y()), "{:?}", centroid);
    }

    #[test]
    fn crs_override_wins() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir, "counties.geojson", COUNTIES);
        let dataset = Dataset::load(&path, Some("EPSG:3857")).unwrap();
        assert_eq!(dataset.crs, Crs::WebMercator);
        assert!(Dataset::load(&path, Some("EPSG:32737")).is_err());
    }

    const WGS84_PRJ: &str = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;
    const UTM_PRJ: &str = r#"PROJCS["WGS_1984_UTM_Zone_37S",GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]]],PROJECTION["Transverse_Mercator"],UNIT["Meter",1.0]]"#;

    fn square(x0: f64, y0: f64, size: f64) -> shapefile::Polygon {
        shapefile::Polygon::new(shapefile::PolygonRing::Outer(vec![
            shapefile::Point::new(x0, y0),
            shapefile::Point::new(x0, y0 + size),
            shapefile::Point::new(x0 + size, y0 + size),
            shapefile::Point::new(x0 + size, y0),
            shapefile::Point::new(x0, y0),
        ]))
    }

    fn write_shapefile<S: shapefile::record::EsriShape>(path: &Path, rows: &[(S, &str)]) {
        let table = dbase::TableWriterBuilder::new()
            .add_character_field("ADM1_EN".try_into().unwrap(), 50)
            .add_character_field("ADM1_PCODE".try_into().unwrap(), 10);
        let mut writer = shapefile::Writer::from_path(path, table).unwrap();
        for (i, (shape, name)) in rows.iter().enumerate() {
            let mut record = dbase::Record::default();
            record.insert("ADM1_EN".to_string(), FieldValue::Character(Some(name.to_string())));
            record.insert(
                "ADM1_PCODE".to_string(),
                FieldValue::Character(Some(format!("KE{:03}", i))),
            );
            writer.write_shape_and_record(shape, &record).unwrap();
        }
    }

    fn counties_shapefile(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("counties.shp");
        write_shapefile(
            &path,
            &[
                (square(36.6, -1.4, 0.3), "Nairobi"),
                (square(34.5, -0.4, 0.4), "Kisumu"),
                (square(34.0, -0.2, 0.2), "Kisumu"),
            ],
        );
        path
    }

    #[test]
    fn shapefile_rows_become_features() {
        let dir = TempDir::new().unwrap();
        let path = counties_shapefile(&dir);
        fs::write(path.with_extension("prj"), format!("\u{feff}{}\n", WGS84_PRJ)).unwrap();

        let dataset = Dataset::load(&path, None).unwrap();
        assert_eq!(dataset.path, path);
        assert_eq!(dataset.columns, ["ADM1_EN", "ADM1_PCODE"]);
        assert_eq!(dataset.features.len(), 3);
        assert_eq!(dataset.crs, Crs::Wgs84);
        assert_eq!(dataset.area_names("ADM1_EN").unwrap(), ["Kisumu", "Nairobi"]);

        let area = dataset.select("ADM1_EN", "Kisumu").unwrap();
        assert_eq!(area.geometry.0.len(), 2);
        let rect = area.geometry.bounding_rect().unwrap();
        assert!((rect.min().x - 34.0).abs() < 1e-9 && (rect.max().x - 34.9).abs() < 1e-9);
        assert!((rect.min().y + 0.4).abs() < 1e-9 && rect.max().y.abs() < 1e-9);
    }

    #[test]
    fn shapefile_without_prj_is_wgs84() {
        let dir = TempDir::new().unwrap();
        let path = counties_shapefile(&dir);
        let dataset = Dataset::load(&path, None).unwrap();
        assert_eq!(dataset.crs, Crs::Wgs84);
    }

    #[test]
    fn shapefile_with_projected_prj_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let path = counties_shapefile(&dir);
        fs::write(path.with_extension("prj"), UTM_PRJ).unwrap();
        assert!(matches!(
            Dataset::load(&path, None),
            Err(MapError::UnsupportedCrs(_))
        ));
        // An explicit override still loads it.
        assert_eq!(
            Dataset::load(&path, Some("EPSG:4326")).unwrap().crs,
            Crs::Wgs84
        );
    }

    #[test]
    fn shapefile_polygon_z_is_flattened() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("relief.shp");
        let ring = vec![
            shapefile::PointZ::new(35.0, 0.0, 1500.0, 0.0),
            shapefile::PointZ::new(35.0, 0.5, 1600.0, 0.0),
            shapefile::PointZ::new(35.5, 0.5, 1700.0, 0.0),
            shapefile::PointZ::new(35.0, 0.0, 1500.0, 0.0),
        ];
        let shape = shapefile::PolygonZ::new(shapefile::PolygonRing::Outer(ring));
        write_shapefile(&path, &[(shape, "Baringo")]);

        let dataset = Dataset::load(&path, None).unwrap();
        let area = dataset.select("ADM1_EN", "Baringo").unwrap();
        let rect = area.geometry.bounding_rect().unwrap();
        assert_eq!((rect.min().x, rect.max().x), (35.0, 35.5));
        assert_eq!((rect.min().y, rect.max().y), (0.0, 0.5));
    }

    #[test]
    fn shapefile_points_are_skipped_but_columns_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("towns.shp");
        write_shapefile(&path, &[(shapefile::Point::new(36.8, -1.3), "Nairobi")]);

        let dataset = Dataset::load(&path, None).unwrap();
        assert!(dataset.features.is_empty());
        assert_eq!(dataset.columns, ["ADM1_EN", "ADM1_PCODE"]);
        assert!(dataset.area_names("ADM1_EN").unwrap().is_empty());
        assert!(matches!(
            dataset.select("ADM1_EN", "Nairobi"),
            Err(MapError::UnknownArea { .. })
        ));
    }

    #[test]
    fn shapefile_without_dbf_fails_to_load() {
        let dir = TempDir::new().unwrap();
        let path = counties_shapefile(&dir);
        fs::remove_file(path.with_extension("dbf")).unwrap();
        assert!(matches!(Dataset::load(&path, None), Err(MapError::DatasetLoad { .. })));
    }

    #[test]
    fn dbase_values_stringify() {
        assert_eq!(
            field_value_to_string(&FieldValue::Character(Some("Nairobi  ".into()))),
            Some("Nairobi".to_string())
        );
        assert_eq!(field_value_to_string(&FieldValue::Character(None)), None);
        assert_eq!(
            field_value_to_string(&FieldValue::Numeric(Some(47.0))),
            Some("47".to_string())
        );
        assert_eq!(field_value_to_string(&FieldValue::Integer(3)), Some("3".to_string()));
        assert_eq!(field_value_to_string(&FieldValue::Logical(None)), None);
    }
}
