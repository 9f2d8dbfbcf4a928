use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use super::{build_code, Style};
use crate::error::{QrError, QrResult};

pub fn render_raster(payload: &str, style: &Style) -> QrResult<RgbaImage> {
    let code = build_code(payload, style)?;
    let size = style.width.max(1);

    let img = code
        .render::<Rgba<u8>>()
        .dark_color(style.foreground.to_rgba())
        .light_color(style.background.to_rgba())
        .quiet_zone(true)
        .min_dimensions(size, size)
        .build();

    let mut canvas = if img.width() == size && img.height() == size {
        img
    } else {
        imageops::resize(&img, size, size, FilterType::Nearest)
    };

    if let Some(logo) = &style.logo {
        overlay_logo(&mut canvas, logo);
    }

    Ok(canvas)
}

fn overlay_logo(canvas: &mut RgbaImage, logo: &DynamicImage) {
    let box_size = (canvas.width() / 4).max(1);
    let logo = logo.resize(box_size, box_size, FilterType::Lanczos3).to_rgba8();
    let x = (canvas.width().saturating_sub(logo.width())) / 2;
    let y = (canvas.height().saturating_sub(logo.height())) / 2;
    imageops::overlay(canvas, &logo, i64::from(x), i64::from(y));
}

pub fn render_png(payload: &str, style: &Style) -> QrResult<Vec<u8>> {
    let raster = render_raster(payload, style)?;

    let mut bytes: Vec<u8> = Vec::new();
    DynamicImage::ImageRgba8(raster)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(QrError::rendering)?;
    Ok(bytes)
}
