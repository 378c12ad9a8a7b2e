use geo::MultiPolygon;
use serde::Deserialize;
use std::collections::HashMap;

/// The one geometry mapped by a request, in WGS84 lon/lat.
#[derive(Debug, Clone)]
pub struct StudyArea {
    pub name: String,
    pub geometry: MultiPolygon<f64>,
}

/// A boundary row: stringified attributes plus its polygons.
#[derive(Debug, Clone)]
pub struct Feature {
    pub attributes: HashMap<String, String>,
    pub geometry: MultiPolygon<f64>,
}

/// Inputs of one interaction, as sent by the form page or the CLI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MapRequest {
    pub level: Option<String>,
    pub area: Option<String>,
    pub coordinates: Option<String>,
    pub name: Option<String>,
}

/// PNG bytes ready to be displayed or downloaded.
#[derive(Debug, Clone)]
pub struct RenderedMap {
    pub filename: String,
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}
