use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::imageops::FilterType;
use image::ImageFormat;
use qrcode::render::svg;

use super::{build_code, Style};
use crate::error::{QrError, QrResult};

/// Quiet zone of a normal (non-micro) QR symbol, in modules.
const QUIET_ZONE_MODULES: u32 = 4;

pub fn render_svg(payload: &str, style: &Style) -> QrResult<String> {
    let code = build_code(payload, style)?;

    let modules = code.width() as u32 + 2 * QUIET_ZONE_MODULES;
    let unit = style.width.div_ceil(modules).max(1);
    let total = unit * modules;

    let dark = style.foreground.to_hex();
    let light = style.background.to_hex();
    let mut doc = code
        .render::<svg::Color>()
        .dark_color(svg::Color(&dark))
        .light_color(svg::Color(&light))
        .quiet_zone(true)
        .module_dimensions(unit, unit)
        .build();

    if let Some(logo) = &style.logo {
        let image = logo_element(logo, total)?;
        match doc.rfind("</svg>") {
            Some(pos) => doc.insert_str(pos, &image),
            None => return Err(QrError::rendering("svg renderer produced no closing tag")),
        }
    }

    Ok(doc)
}

fn logo_element(logo: &image::DynamicImage, total: u32) -> QrResult<String> {
    let box_size = (total / 4).max(1);
    let logo = logo.resize(box_size, box_size, FilterType::Lanczos3);

    let mut png: Vec<u8> = Vec::new();
    logo.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(QrError::rendering)?;

    let x = (total - logo.width()) / 2;
    let y = (total - logo.height()) / 2;
    Ok(format!(
        r#"<image x="{x}" y="{y}" width="{}" height="{}" href="data:image/png;base64,{}"/>"#,
        logo.width(),
        logo.height(),
        STANDARD.encode(png)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Color;
    use image::{DynamicImage, Rgba, RgbaImage};

    #[test]
    fn svg_embeds_style_colours() {
        let style = Style {
            foreground: Color::new(0x0f, 0x17, 0x2a),
            background: Color::new(0xf8, 0xfa, 0xfc),
            ..Style::default()
        };
        let svg = render_svg("pubkyauth://example", &style).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("#0f172a"));
        assert!(svg.contains("#f8fafc"));
        assert!(!svg.contains("<image"));
    }

    #[test]
    fn svg_logo_is_embedded_before_closing_tag() {
        let logo = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 255, 255])));
        let style = Style {
            logo: Some(logo),
            ..Style::default()
        };
        let svg = render_svg("https://example.com", &style).unwrap();
        let image_at = svg.find("<image").unwrap();
        let close_at = svg.rfind("</svg>").unwrap();
        assert!(image_at < close_at);
        assert!(svg.contains("data:image/png;base64,"));
    }
}
