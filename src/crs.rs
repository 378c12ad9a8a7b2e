use crate::error::{MapError, MapResult};
use geo::{Coord, MapCoords, MultiPolygon};
use std::f64::consts::PI;

// Spherical radius used by EPSG:3857
const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Reference systems a boundary file may come in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    /// Longitude/latitude in degrees. Other geographic datums are treated as WGS84.
    Wgs84,
    /// Spherical "Pseudo" Mercator in metres.
    WebMercator,
}

impl Crs {
    pub fn from_epsg(code: u32) -> MapResult<Self> {
        match code {
            4326 | 4269 | 4258 | 4210 => Ok(Crs::Wgs84),
            3857 | 900913 | 3785 | 102100 | 102113 => Ok(Crs::WebMercator),
            other => Err(MapError::UnsupportedCrs(format!("EPSG:{}", other))),
        }
    }

    /// Parses `EPSG:3857`, `urn:ogc:def:crs:EPSG::4326` or `urn:ogc:def:crs:OGC:1.3:CRS84`.
    pub fn from_name(name: &str) -> MapResult<Self> {
        let trimmed = name.trim();
        if trimmed.to_ascii_uppercase().ends_with("CRS84") {
            return Ok(Crs::Wgs84);
        }
        let code = trimmed
            .rsplit(':')
            .next()
            .and_then(|c| c.trim().parse::<u32>().ok())
            .ok_or_else(|| MapError::UnsupportedCrs(trimmed.to_string()))?;
        Crs::from_epsg(code)
    }

    /// Classifies the WKT found in a shapefile's `.prj` sidecar.
    pub fn from_wkt(wkt: &str) -> MapResult<Self> {
        let upper = wkt.to_ascii_uppercase();
        if upper.starts_with("GEOGCS") || upper.starts_with("GEOGCRS") {
            return Ok(Crs::Wgs84);
        }
        let mercator_markers = [
            "MERCATOR_AUXILIARY_SPHERE",
            "PSEUDO-MERCATOR",
            "PSEUDO_MERCATOR",
            "POPULAR VISUALISATION",
            "POPULAR_VISUALISATION",
        ];
        if mercator_markers.iter().any(|m| upper.contains(m)) {
            return Ok(Crs::WebMercator);
        }
        let summary: String = wkt.chars().take(60).collect();
        Err(MapError::UnsupportedCrs(summary))
    }

    pub fn to_wgs84(self, geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        match self {
            Crs::Wgs84 => geometry.clone(),
            Crs::WebMercator => geometry.map_coords(mercator_to_lon_lat),
        }
    }
}

pub fn mercator_to_lon_lat(c: Coord<f64>) -> Coord<f64> {
    let lon = (c.x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (c.y / EARTH_RADIUS_M).exp().atan() - PI / 2.0).to_degrees();
    Coord { x: lon, y: lat }
}
