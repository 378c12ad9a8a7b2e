//! One map request from inputs to PNG: resolve, load, render, export.

use crate::config::{AppConfig, LevelConfig};
use crate::coords;
use crate::data::Dataset;
use crate::error::{MapError, MapResult};
use crate::export;
use crate::render;
use crate::types::{MapRequest, RenderedMap, StudyArea};
use geo::{MultiPolygon, Polygon};
use tracing::info;

// Background kept around the trimmed figure, in inches
const EXPORT_PAD_IN: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The on-screen figure.
    Preview,
    /// The downloadable image.
    Export,
}

impl Resolution {
    pub fn dpi(self, config: &AppConfig) -> u32 {
        match self {
            Resolution::Preview => config.render.preview_dpi,
            Resolution::Export => config.render.dpi,
        }
    }
}

/// Where the study area comes from.
#[derive(Debug, Clone)]
pub enum AreaSource {
    Custom { polygon: Polygon<f64>, name: String },
    Boundary { level: Option<String>, area: Option<String> },
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.trim().is_empty())
}

/// Pasted coordinates win over the level/area selection.
pub fn resolve_source(request: &MapRequest) -> MapResult<AreaSource> {
    match request.coordinates.as_deref() {
        Some(text) if !text.trim().is_empty() => {
            let polygon = coords::parse_polygon(text)?;
            let name = request
                .name
                .clone()
                .unwrap_or_else(|| coords::DEFAULT_CUSTOM_NAME.to_string());
            Ok(AreaSource::Custom { polygon, name })
        }
        _ => Ok(AreaSource::Boundary {
            level: non_blank(&request.level),
            area: non_blank(&request.area),
        }),
    }
}

pub fn find_level<'a>(config: &'a AppConfig, name: Option<&str>) -> MapResult<&'a LevelConfig> {
    match name {
        Some(name) => config
            .level(name)
            .ok_or_else(|| MapError::UnknownLevel(name.to_string())),
        None => config
            .levels
            .first()
            .ok_or_else(|| MapError::UnknownLevel(String::new())),
    }
}

pub fn load_level(level: &LevelConfig) -> MapResult<Dataset> {
    Dataset::load(&level.path, level.crs.as_deref())
}

/// Sorted area names offered for a level.
pub fn list_areas<'a>(
    config: &'a AppConfig,
    level: Option<&str>,
) -> MapResult<(&'a LevelConfig, Vec<String>)> {
    let level = find_level(config, level)?;
    let names = load_level(level)?.area_names(&level.field)?;
    Ok((level, names))
}

pub fn load_study_area(config: &AppConfig, source: AreaSource) -> MapResult<StudyArea> {
    match source {
        AreaSource::Custom { polygon, name } => Ok(StudyArea {
            name,
            geometry: MultiPolygon::new(vec![polygon]),
        }),
        AreaSource::Boundary { level, area } => {
            let level = find_level(config, level.as_deref())?;
            let dataset = load_level(level)?;
            let area = match area {
                Some(area) => area,
                // Same default as the dropdown: the first name in sorted order.
                None => dataset
                    .area_names(&level.field)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| MapError::UnknownArea {
                        field: level.field.clone(),
                        name: String::new(),
                    })?,
            };
            dataset.select(&level.field, &area)
        }
    }
}

/// Runs the whole workflow for one interaction.
pub fn generate(
    config: &AppConfig,
    request: &MapRequest,
    resolution: Resolution,
) -> MapResult<RenderedMap> {
    let area = load_study_area(config, resolve_source(request)?)?;
    let dpi = resolution.dpi(config);
    let figure = render::render(&area, &config.render, dpi)?;
    let pad = (EXPORT_PAD_IN * dpi as f64).round() as u32;
    let map = export::export(&area.name, figure, pad)?;
    info!(
        "Rendered '{}' at {} dpi ({}x{}, {} bytes)",
        area.name,
        dpi,
        map.width,
        map.height,
        map.png.len()
    );
    Ok(map)
}
