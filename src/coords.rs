//! Parsing of pasted polygon coordinates.
//!
//! Input is a JSON array of two-element numeric arrays. Each `[a, b]` pair is
//! stored as the vertex `(x = b, y = a)`: the tool has always swapped the pair
//! order before building the polygon, and users' saved inputs rely on it.

use crate::error::{MapError, MapResult};
use geo::{BoundingRect, Coord, LineString, Polygon};
use serde_json::Value;
use tracing::warn;

pub const DEFAULT_CUSTOM_NAME: &str = "Custom Area";

pub fn parse_polygon(text: &str) -> MapResult<Polygon<f64>> {
    let value: Value = serde_json::from_str(text.trim())
        .map_err(|e| MapError::Validation(format!("not well-formed JSON: {}", e)))?;

    let items = match value {
        Value::Array(items) => items,
        _ => return Err(MapError::Validation("expected a list of [lon, lat] pairs".into())),
    };

    let mut coords = Vec::with_capacity(items.len() + 1);
    for (i, item) in items.iter().enumerate() {
        let (a, b) = parse_pair(item)
            .ok_or_else(|| MapError::Validation(format!("element {} is not a two-number pair", i)))?;
        let coord = Coord { x: b, y: a };
        if !(-180.0..=180.0).contains(&coord.x) || !(-90.0..=90.0).contains(&coord.y) {
            warn!(index = i, x = coord.x, y = coord.y, "Vertex lies outside lon/lat range");
        }
        coords.push(coord);
    }

    let mut ring = LineString::new(coords);
    ring.close();
    // A closed ring needs three distinct vertices plus the repeated first one.
    if ring.0.len() < 4 {
        return Err(MapError::Validation(format!(
            "a polygon needs at least 3 pairs, got {}",
            items.len()
        )));
    }

    // Finite vertices can still be far enough apart that the extent overflows.
    if let Some(rect) = ring.bounding_rect() {
        if !rect.width().is_finite() || !rect.height().is_finite() {
            return Err(MapError::Validation(
                "coordinates span more than a finite extent".into(),
            ));
        }
    }

    Ok(Polygon::new(ring, vec![]))
}

fn parse_pair(item: &Value) -> Option<(f64, f64)> {
    match item.as_array()?.as_slice() {
        [a, b] => Some((a.as_f64()?, b.as_f64()?)),
        _ => None,
    }
}
