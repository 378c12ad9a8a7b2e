use crate::config::RenderConfig;
use crate::error::{MapError, MapResult};
use crate::types::StudyArea;
use geo::{BoundingRect, Centroid, LineString, MultiPolygon, Rect, TriangulateEarcut};
use plotters::coord::Shift;
use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;
use plotters::style::register_font;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

// Fraction of the bounding box added on every side
const VIEW_PAD: f64 = 0.05;
// Smallest span in degrees, so a point-like polygon still gets a view
const MIN_SPAN: f64 = 1e-3;

const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

static FONT: OnceLock<Result<PathBuf, String>> = OnceLock::new();

/// Raw RGB pixels of one rendered figure.
#[derive(Debug, Clone)]
pub struct Figure {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Longitude,
    Latitude,
}

/// `34.52 -> 34.5°E`, `-1.26 -> 1.3°S`.
pub fn format_degrees(value: f64, axis: Axis) -> String {
    let direction = match axis {
        Axis::Longitude if value >= 0.0 => 'E',
        Axis::Longitude => 'W',
        Axis::Latitude if value >= 0.0 => 'N',
        Axis::Latitude => 'S',
    };
    format!("{:.1}°{}", value.abs(), direction)
}

/// Pads `bounds` and widens one axis so that a degree of latitude is drawn
/// `1 / cos(mid latitude)` times longer than a degree of longitude.
pub fn fit_view(bounds: Rect<f64>, plot_w: f64, plot_h: f64) -> MapResult<(Range<f64>, Range<f64>)> {
    let center = bounds.center();
    if !(bounds.width().is_finite() && bounds.height().is_finite())
        || !(center.x.is_finite() && center.y.is_finite())
    {
        return Err(MapError::Render(format!("unbounded extent {:?}", bounds)));
    }
    let half_w = bounds.width().max(MIN_SPAN) * (0.5 + VIEW_PAD);
    let half_h = bounds.height().max(MIN_SPAN) * (0.5 + VIEW_PAD);
    let aspect = 1.0 / center.y.to_radians().cos().max(0.01);

    // Pixels per degree of longitude
    let scale = (plot_w / (2.0 * half_w)).min(plot_h / (2.0 * half_h * aspect));
    let half_w = plot_w / (2.0 * scale);
    let half_h = plot_h / (2.0 * scale * aspect);

    let view = (
        center.x - half_w..center.x + half_w,
        center.y - half_h..center.y + half_h,
    );
    let finite = [view.0.start, view.0.end, view.1.start, view.1.end]
        .iter()
        .all(|v| v.is_finite());
    if !finite || view.0.start >= view.0.end || view.1.start >= view.1.end {
        return Err(MapError::Render(format!("no drawable view for extent {:?}", bounds)));
    }
    Ok(view)
}

pub fn hex_to_rgb(hex: &str) -> MapResult<RGBColor> {
    let digits = hex.trim().trim_start_matches('#');
    if digits.len() != 6 || !digits.is_ascii() {
        return Err(MapError::Render(format!("invalid colour '{}'", hex)));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&digits[i..i + 2], 16)
            .map_err(|_| MapError::Render(format!("invalid colour '{}'", hex)))
    };
    Ok(RGBColor(channel(0)?, channel(2)?, channel(4)?))
}

/// First existing font file: the configured one, else a common system font.
pub fn find_font(configured: Option<&Path>) -> Option<PathBuf> {
    match configured {
        Some(path) => path.is_file().then(|| path.to_path_buf()),
        None => FONT_CANDIDATES
            .iter()
            .map(Path::new)
            .find(|p| p.is_file())
            .map(Path::to_path_buf),
    }
}

/// Registers the sans-serif family once per process; later calls reuse it.
fn ensure_font(configured: Option<&Path>) -> MapResult<()> {
    let outcome = FONT.get_or_init(|| {
        let path = find_font(configured).ok_or_else(|| match configured {
            Some(p) => format!("configured font {:?} does not exist", p),
            None => "no TrueType font found; set render.font".to_string(),
        })?;
        let bytes = fs::read(&path).map_err(|e| format!("{:?}: {}", path, e))?;
        let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
        for style in [
            FontStyle::Normal,
            FontStyle::Bold,
            FontStyle::Italic,
            FontStyle::Oblique,
        ] {
            register_font("sans-serif", style, bytes)
                .map_err(|_| format!("{:?} is not a usable TrueType font", path))?;
        }
        info!("Registered font {:?}", path);
        Ok(path)
    });
    outcome
        .as_ref()
        .map(|_| ())
        .map_err(|e| MapError::Font(e.clone()))
}

impl<E: std::error::Error + Send + Sync> From<DrawingAreaErrorKind<E>> for MapError {
    fn from(err: DrawingAreaErrorKind<E>) -> Self {
        MapError::Render(err.to_string())
    }
}

fn font(points: f64, scale: f64, style: FontStyle) -> FontDesc<'static> {
    FontDesc::new(FontFamily::SansSerif, points * scale, style)
}

/// The colour `color` at `opacity` takes on over the white page.
pub fn blend_over_white(color: RGBColor, opacity: f64) -> RGBColor {
    let opacity = opacity.clamp(0.0, 1.0);
    let channel = |c: u8| (c as f64 * opacity + 255.0 * (1.0 - opacity)).round() as u8;
    RGBColor(channel(color.0), channel(color.1), channel(color.2))
}

/// Triangles covering the polygon interiors. Holes, and anything drawn
/// earlier inside them, are left untouched.
fn fill_triangles(geometry: &MultiPolygon<f64>) -> impl Iterator<Item = Vec<(f64, f64)>> + '_ {
    geometry
        .iter()
        .flat_map(|p| p.earcut_triangles())
        .map(|t| t.to_array().iter().map(|c| (c.x, c.y)).collect())
}

fn ring_points(ring: &LineString<f64>) -> Vec<(f64, f64)> {
    ring.coords().map(|c| (c.x, c.y)).collect()
}

struct Colors {
    fill: RGBColor,
    edge: RGBColor,
    label: RGBColor,
}

/// Pixel sizes of the fixed figure furniture at a given dpi.
struct Layout {
    scale: f64,
    margin: u32,
    x_label_area: u32,
    y_label_area: u32,
    footer: u32,
    caption: u32,
}

impl Layout {
    fn new(dpi: u32) -> Self {
        let dpi = dpi as f64;
        let scale = dpi / 72.0;
        Self {
            scale,
            margin: (0.3 * dpi) as u32,
            x_label_area: (0.6 * dpi) as u32,
            y_label_area: (0.9 * dpi) as u32,
            footer: (10.0 * scale * 2.5) as u32,
            // Caption text plus the gap plotters leaves under it
            caption: (16.0 * scale * 1.6) as u32,
        }
    }

    fn plot_size(&self, width: u32, height: u32) -> (f64, f64) {
        let w = width as f64 - (2 * self.margin + self.y_label_area) as f64;
        let h = height as f64 - (2 * self.margin + self.x_label_area + self.footer + self.caption) as f64;
        (w.max(1.0), h.max(1.0))
    }
}

/// Draws the study area figure at `dpi` and returns its pixels.
pub fn render(area: &StudyArea, style: &RenderConfig, dpi: u32) -> MapResult<Figure> {
    let colors = Colors {
        fill: hex_to_rgb(&style.fill_color)?,
        edge: hex_to_rgb(&style.edge_color)?,
        label: hex_to_rgb(&style.label_color)?,
    };
    let bounds = area
        .geometry
        .bounding_rect()
        .ok_or_else(|| MapError::Render("study area has no vertices".into()))?;

    let width = (style.width_in * dpi as f64).round() as u32;
    let height = (style.height_in * dpi as f64).round() as u32;
    if width == 0 || height == 0 {
        return Err(MapError::Render(format!("empty canvas {}x{}", width, height)));
    }
    let layout = Layout::new(dpi);
    let (plot_w, plot_h) = layout.plot_size(width, height);
    let view = fit_view(bounds, plot_w, plot_h)?;

    ensure_font(style.font.as_deref())?;
    debug!(width, height, dpi, "Rendering '{}'", area.name);

    let mut pixels = vec![255u8; width as usize * height as usize * 3];
    {
        let root = BitMapBackend::with_buffer(&mut pixels, (width, height)).into_drawing_area();
        draw_figure(&root, area, style, &colors, bounds, view, &layout)?;
        root.present()?;
    }

    Ok(Figure {
        width,
        height,
        pixels,
    })
}

fn draw_figure(
    root: &DrawingArea<BitMapBackend<'_>, Shift>,
    area: &StudyArea,
    style: &RenderConfig,
    colors: &Colors,
    bounds: Rect<f64>,
    (x_range, y_range): (Range<f64>, Range<f64>),
    layout: &Layout,
) -> MapResult<()> {
    let scale = layout.scale;
    root.fill(&WHITE)?;

    let (_, height) = root.dim_in_pixel();
    let (upper, footer) = root.split_vertically((height - layout.footer.min(height)) as i32);

    let mut chart = ChartBuilder::on(&upper)
        .margin(layout.margin)
        .caption(&style.title, font(16.0, scale, FontStyle::Bold))
        .x_label_area_size(layout.x_label_area)
        .y_label_area_size(layout.y_label_area)
        .build_cartesian_2d(x_range, y_range)?;

    let fill_style = blend_over_white(colors.fill, style.fill_opacity).filled();
    let edge_style = colors.edge.stroke_width((scale.round() as u32).max(1));
    let swatch = (5.0 * scale).max(2.0) as i32;
    chart
        .draw_series(
            fill_triangles(&area.geometry).map(|points| Polygon::new(points, fill_style)),
        )?
        .label(style.legend_label.as_str())
        .legend(move |(x, y)| {
            let corners = [(0, -swatch), (3 * swatch, swatch)];
            EmptyElement::at((x, y))
                + Rectangle::new(corners, fill_style)
                + Rectangle::new(corners, edge_style)
        });

    // Grid over the fill.
    chart
        .configure_mesh()
        .x_desc("Longitude")
        .y_desc("Latitude")
        .x_labels(8)
        .y_labels(8)
        .x_label_formatter(&|v: &f64| format_degrees(*v, Axis::Longitude))
        .y_label_formatter(&|v: &f64| format_degrees(*v, Axis::Latitude))
        .label_style(font(10.0, scale, FontStyle::Normal))
        .axis_desc_style(font(11.0, scale, FontStyle::Normal))
        .bold_line_style(BLACK.mix(0.2))
        .light_line_style(TRANSPARENT)
        .draw()?;

    chart.draw_series(
        area.geometry
            .iter()
            .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors().iter()))
            .map(|ring| PathElement::new(ring_points(ring), edge_style)),
    )?;

    if !area.name.is_empty() {
        let anchor = area
            .geometry
            .centroid()
            .map(|c| (c.x(), c.y()))
            .unwrap_or_else(|| bounds.center().x_y());
        let label_style = font(12.0, scale, FontStyle::Bold)
            .color(&colors.label)
            .pos(Pos::new(HPos::Center, VPos::Center));
        chart.draw_series(std::iter::once(Text::new(
            area.name.clone(),
            anchor,
            label_style,
        )))?;
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .label_font(font(10.0, scale, FontStyle::Normal))
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK.mix(0.3))
        .draw()?;

    draw_north_arrow(&chart.plotting_area().strip_coord_spec(), scale)?;

    if !style.credit.is_empty() {
        let (fw, fh) = footer.dim_in_pixel();
        let credit_style = font(10.0, scale, FontStyle::Italic)
            .color(&BLACK)
            .pos(Pos::new(HPos::Center, VPos::Center));
        footer.draw(&Text::new(
            style.credit.as_str(),
            ((fw / 2) as i32, (fh / 2) as i32),
            credit_style,
        ))?;
    }

    Ok(())
}

/// Arrow from axes fraction (0.1, 0.9) up to (0.1, 0.95) with an `N` above it.
fn draw_north_arrow(plot: &DrawingArea<BitMapBackend<'_>, Shift>, scale: f64) -> MapResult<()> {
    let (w, h) = plot.dim_in_pixel();
    let (w, h) = (w as f64, h as f64);

    let x = (0.1 * w) as i32;
    let base = ((1.0 - 0.9) * h) as i32;
    let tip = ((1.0 - 0.95) * h) as i32;
    let shaft = (2.5 * scale).max(1.0) as i32;
    let head = (7.5 * scale).max(2.0) as i32;
    let head_len = (head * 3 / 2).min(((base - tip) * 3 / 5).max(1));

    plot.draw(&Rectangle::new(
        [(x - shaft, tip + head_len), (x + shaft, base)],
        BLACK.filled(),
    ))?;
    plot.draw(&Polygon::new(
        vec![(x, tip), (x - head, tip + head_len), (x + head, tip + head_len)],
        BLACK.filled(),
    ))?;

    let letter = font(14.0, scale, FontStyle::Bold)
        .color(&BLACK)
        .pos(Pos::new(HPos::Center, VPos::Bottom));
    plot.draw(&Text::new("N", (x, tip - (0.02 * h) as i32), letter))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{coord, polygon};
    use plotters::coord::types::RangedCoordf64;

    #[test]
    fn degrees_carry_cardinal_suffix() {
        assert_eq!(format_degrees(34.5, Axis::Longitude), "34.5°E");
        assert_eq!(format_degrees(-73.98, Axis::Longitude), "74.0°W");
        assert_eq!(format_degrees(-1.26, Axis::Latitude), "1.3°S");
        assert_eq!(format_degrees(0.52, Axis::Latitude), "0.5°N");
        assert_eq!(format_degrees(0.0, Axis::Latitude), "0.0°N");
        assert_eq!(format_degrees(0.0, Axis::Longitude), "0.0°E");
    }

    #[test]
    fn view_contains_bounds_with_geographic_aspect() {
        let bounds = Rect::new(coord! { x: 34.0, y: -1.5 }, coord! { x: 35.0, y: -1.0 });
        let (xs, ys) = fit_view(bounds, 800.0, 600.0).unwrap();

        assert!(xs.start < 34.0 && xs.end > 35.0);
        assert!(ys.start < -1.5 && ys.end > -1.0);

        let aspect = 1.0 / (-1.25f64).to_radians().cos();
        let ratio = (xs.end - xs.start) / (ys.end - ys.start);
        assert!((ratio - 800.0 * aspect / 600.0).abs() < 1e-9, "{ratio}");
    }

    #[test]
    fn view_stretches_with_latitude() {
        let equator = Rect::new(coord! { x: 0.0, y: -0.5 }, coord! { x: 1.0, y: 0.5 });
        let north = Rect::new(coord! { x: 0.0, y: 59.5 }, coord! { x: 1.0, y: 60.5 });
        let (_, eq_y) = fit_view(equator, 500.0, 500.0).unwrap();
        let (north_x, north_y) = fit_view(north, 500.0, 500.0).unwrap();
        // At 60N a degree of longitude is half as long on the ground.
        assert!((eq_y.end - eq_y.start - 1.1).abs() < 1e-9);
        let ratio = (north_x.end - north_x.start) / (north_y.end - north_y.start);
        assert!((ratio - 2.0).abs() < 1e-9, "{ratio}");
    }

    #[test]
    fn degenerate_bounds_still_get_a_view() {
        let point = Rect::new(coord! { x: 36.8, y: -1.3 }, coord! { x: 36.8, y: -1.3 });
        let (xs, ys) = fit_view(point, 400.0, 400.0).unwrap();
        assert!(xs.end > xs.start && ys.end > ys.start);
        assert!(xs.contains(&36.8) && ys.contains(&-1.3));
    }

    #[test]
    fn unbounded_extent_has_no_view() {
        let huge = Rect::new(coord! { x: -1e308, y: -1e308 }, coord! { x: 1e308, y: 1e308 });
        assert!(matches!(fit_view(huge, 400.0, 400.0), Err(MapError::Render(_))));

        let area = StudyArea {
            name: "X".to_string(),
            geometry: MultiPolygon::new(vec![polygon![
                (x: 1e308, y: 1e308),
                (x: -1e308, y: -1e308),
                (x: -1e308, y: 1e308),
            ]]),
        };
        let style = RenderConfig {
            width_in: 2.0,
            height_in: 2.0,
            ..RenderConfig::default()
        };
        assert!(matches!(render(&area, &style, 30), Err(MapError::Render(_))));
    }

    #[test]
    fn fill_leaves_holes_but_not_islands() {
        let ring_with_hole = polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)],
            interiors: [[(x: 2.0, y: 2.0), (x: 8.0, y: 2.0), (x: 8.0, y: 8.0), (x: 2.0, y: 8.0)]],
        );
        let island = polygon![(x: 4.0, y: 4.0), (x: 6.0, y: 4.0), (x: 6.0, y: 6.0), (x: 4.0, y: 6.0)];
        let geometry = MultiPolygon::new(vec![ring_with_hole, island]);

        let mut pixels = vec![255u8; 100 * 100 * 3];
        {
            let root = BitMapBackend::with_buffer(&mut pixels, (100, 100))
                .into_drawing_area()
                .apply_coord_spec(Cartesian2d::<RangedCoordf64, RangedCoordf64>::new(
                    0.0..10.0,
                    0.0..10.0,
                    (0..100, 0..100),
                ));
            let fill = blend_over_white(RGBColor(144, 238, 144), 0.7).filled();
            for points in fill_triangles(&geometry) {
                root.draw(&Polygon::new(points, fill)).unwrap();
            }
            root.present().unwrap();
        }

        let at = |x: usize, y: usize| {
            let i = (y * 100 + x) * 3;
            (pixels[i], pixels[i + 1], pixels[i + 2])
        };
        let fill = (177, 243, 177);
        // Outer band, hole, island
        assert_eq!(at(10, 50), fill);
        assert_eq!(at(30, 50), (255, 255, 255));
        assert_eq!(at(42, 50), fill);
    }

    #[test]
    fn opacity_blends_toward_white() {
        assert_eq!(blend_over_white(RGBColor(144, 238, 144), 0.7), RGBColor(177, 243, 177));
        assert_eq!(blend_over_white(RGBColor(0, 0, 0), 1.0), RGBColor(0, 0, 0));
        assert_eq!(blend_over_white(RGBColor(0, 0, 0), 0.0), RGBColor(255, 255, 255));
    }

    #[test]
    fn hex_colours() {
        assert_eq!(hex_to_rgb("#90EE90").unwrap(), RGBColor(144, 238, 144));
        assert_eq!(hex_to_rgb("006400").unwrap(), RGBColor(0, 100, 0));
        assert!(hex_to_rgb("#12345").is_err());
        assert!(hex_to_rgb("#zzzzzz").is_err());
    }

    #[test]
    fn renders_figure_when_font_available() {
        if find_font(None).is_none() {
            eprintln!("skipping: no system font");
            return;
        }
        let area = StudyArea {
            name: "Test Block".to_string(),
            geometry: MultiPolygon::new(vec![polygon![
                (x: -1.0, y: 34.5),
                (x: -1.0, y: 34.6),
                (x: -1.1, y: 34.6),
                (x: -1.1, y: 34.5),
            ]]),
        };
        let style = RenderConfig {
            width_in: 6.0,
            height_in: 5.0,
            ..RenderConfig::default()
        };

        let figure = render(&area, &style, 40).unwrap();
        assert_eq!((figure.width, figure.height), (240, 200));
        assert_eq!(figure.pixels.len(), 240 * 200 * 3);

        let greenish = figure
            .pixels
            .chunks_exact(3)
            .filter(|px| px[1] > px[0].saturating_add(40) && px[1] > px[2].saturating_add(40))
            .count();
        assert!(greenish > 100, "only {greenish} fill pixels");
    }
}
