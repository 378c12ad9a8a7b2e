use crate::error::{MapError, MapResult};
use crate::render::Figure;
use crate::types::RenderedMap;
use image::{imageops, DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use tracing::debug;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

pub fn download_filename(area_name: &str) -> String {
    format!("study_area_map_{}.png", area_name)
}

/// Trims the figure to its drawn content and encodes it as PNG.
pub fn export(area_name: &str, figure: Figure, pad: u32) -> MapResult<RenderedMap> {
    let image = RgbImage::from_raw(figure.width, figure.height, figure.pixels)
        .ok_or_else(|| MapError::Render("pixel buffer does not match figure size".into()))?;
    let image = trim_background(&image, pad);

    let (width, height) = image.dimensions();

    let mut png = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| MapError::Render(format!("PNG encoding failed: {}", e)))?;
    debug!(bytes = png.len(), width, height, "Encoded PNG");

    Ok(RenderedMap {
        filename: download_filename(area_name),
        png,
        width,
        height,
    })
}

/// Crops uniform background borders, keeping `pad` pixels around the content.
pub fn trim_background(image: &RgbImage, pad: u32) -> RgbImage {
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0;
    let mut max_y = 0;
    for (x, y, px) in image.enumerate_pixels() {
        if *px != BACKGROUND {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    if min_x == u32::MAX {
        return image.clone();
    }

    let x0 = min_x.saturating_sub(pad);
    let y0 = min_y.saturating_sub(pad);
    let x1 = (max_x + pad).min(image.width() - 1);
    let y1 = (max_y + pad).min(image.height() - 1);
    imageops::crop_imm(image, x0, y0, x1 - x0 + 1, y1 - y0 + 1).to_image()
}

/// `Content-Disposition` value with an ASCII fallback and an RFC 5987 name.
pub fn content_disposition(disposition: &str, filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();

    let mut encoded = String::with_capacity(filename.len());
    for byte in filename.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'!' | b'#' | b'$' | b'&' | b'+' | b'-'
            | b'.' | b'^' | b'_' | b'`' | b'|' | b'~' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }

    format!(
        "{}; filename=\"{}\"; filename*=UTF-8''{}",
        disposition, fallback, encoded
    )
}
