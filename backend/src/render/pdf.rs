use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::DynamicImage;
use pdf_writer::{Content, Filter, Finish, Name, Pdf, Rect, Ref, Str};

use super::{render_raster, Style};
use crate::error::{QrError, QrResult};

const PAGE_WIDTH: f32 = 300.0;
const PAGE_HEIGHT: f32 = 360.0;
const QR_SIZE: f32 = 300.0;
const QR_BOTTOM: f32 = 60.0;
const LABEL_BASELINE: f32 = 30.0;
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_MAX_WIDTH: f32 = 280.0;

/// Helvetica-Bold advance widths for 0x20..=0x7E, in 1/1000 em.
const HELVETICA_BOLD_ASCII: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611,
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556,
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611,
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];

fn glyph_width(ch: u8) -> f32 {
    let width = match ch {
        0x20..=0x7e => HELVETICA_BOLD_ASCII[usize::from(ch - 0x20)],
        0xa0 | 0xb7 => 278,
        0xa1 | 0xa8 | 0xad | 0xaf | 0xb2..=0xb4 | 0xb8 | 0xb9 => 333,
        0xa6 => 280,
        0xa9 | 0xae => 737,
        0xaa => 370,
        0xba => 365,
        0xac | 0xb1 | 0xd7 | 0xf7 => 584,
        0xb0 => 400,
        0xb5 | 0xbf | 0xdf | 0xf0..=0xf6 | 0xf8..=0xfc | 0xfe => 611,
        0xbc..=0xbe => 834,
        0xc0..=0xc5 | 0xc7 | 0xd0 | 0xd1 | 0xd9..=0xdc => 722,
        0xc6 => 1000,
        0xc8..=0xcb | 0xdd | 0xde => 667,
        0xcc..=0xcf | 0xec..=0xef => 278,
        0xd2..=0xd6 | 0xd8 => 778,
        0xe6 => 889,
        _ => 556,
    };
    f32::from(width)
}

fn text_width(text: &[u8], size: f32) -> f32 {
    text.iter().map(|c| glyph_width(*c)).sum::<f32>() * size / 1000.0
}

/// Latin-1 for the standard-14 font; everything else becomes `?`.
fn encode_label(label: &str) -> Vec<u8> {
    label
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c as u32 {
            0x20..=0x7e | 0xa0..=0xff => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

fn fit_label(label: &str) -> Vec<u8> {
    let mut text = encode_label(label.trim());
    while !text.is_empty() && text_width(&text, LABEL_FONT_SIZE) > LABEL_MAX_WIDTH {
        text.pop();
    }
    text
}

pub fn render_pdf(payload: &str, style: &Style) -> QrResult<Vec<u8>> {
    let raster = render_raster(payload, style)?;
    let (width, height) = raster.dimensions();
    let rgb = DynamicImage::ImageRgba8(raster).to_rgb8().into_raw();

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&rgb).map_err(QrError::rendering)?;
    let compressed = encoder.finish().map_err(QrError::rendering)?;

    let catalog_id = Ref::new(1);
    let page_tree_id = Ref::new(2);
    let page_id = Ref::new(3);
    let image_id = Ref::new(4);
    let content_id = Ref::new(5);
    let font_id = Ref::new(6);
    let image_name = Name(b"Im1");
    let font_name = Name(b"F1");

    let mut pdf = Pdf::new();
    pdf.catalog(catalog_id).pages(page_tree_id);
    pdf.pages(page_tree_id).kids([page_id]).count(1);

    let mut page = pdf.page(page_id);
    page.media_box(Rect::new(0.0, 0.0, PAGE_WIDTH, PAGE_HEIGHT));
    page.parent(page_tree_id);
    page.contents(content_id);
    let mut resources = page.resources();
    resources.x_objects().pair(image_name, image_id);
    resources.fonts().pair(font_name, font_id);
    resources.finish();
    page.finish();

    let mut image = pdf.image_xobject(image_id, &compressed);
    image.filter(Filter::FlateDecode);
    image.width(width as i32);
    image.height(height as i32);
    image.color_space().device_rgb();
    image.bits_per_component(8);
    image.finish();

    pdf.type1_font(font_id)
        .base_font(Name(b"Helvetica-Bold"))
        .encoding_predefined(Name(b"WinAnsiEncoding"));

    let mut content = Content::new();
    content.save_state();
    content.transform([QR_SIZE, 0.0, 0.0, QR_SIZE, 0.0, QR_BOTTOM]);
    content.x_object(image_name);
    content.restore_state();

    let label = style.label.as_deref().map(fit_label).unwrap_or_default();
    if !label.is_empty() {
        let x = (PAGE_WIDTH - text_width(&label, LABEL_FONT_SIZE)) / 2.0;
        content.begin_text();
        content.set_fill_rgb(0.0, 0.0, 0.0);
        content.set_font(font_name, LABEL_FONT_SIZE);
        content.next_line(x.max(0.0), LABEL_BASELINE);
        content.show(Str(&label));
        content.end_text();
    }
    pdf.stream(content_id, &content.finish());

    Ok(pdf.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_has_header_and_trailer() {
        let bytes = render_pdf("https://example.com", &Style::default()).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
        let tail = String::from_utf8_lossy(&bytes[bytes.len().saturating_sub(32)..]).to_string();
        assert!(tail.contains("%%EOF"));
    }

    #[test]
    fn label_is_drawn_when_present() {
        let style = Style {
            label: Some("Scan me".to_string()),
            ..Style::default()
        };
        let bytes = render_pdf("https://example.com", &style).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("Helvetica-Bold"));
        assert!(text.contains("(Scan me) Tj"));
    }

    #[test]
    fn long_labels_are_clipped() {
        let label = fit_label(&"W".repeat(100));
        assert_eq!(label.len(), 16);
        assert!(text_width(&label, LABEL_FONT_SIZE) <= LABEL_MAX_WIDTH);
    }

    #[test]
    fn widths_follow_helvetica_bold_metrics() {
        assert_eq!(glyph_width(b'W'), 944.0);
        assert_eq!(glyph_width(b'@'), 975.0);
        assert_eq!(glyph_width(b'i'), 278.0);
        assert_eq!(glyph_width(b'M'), 833.0);
        assert_eq!(glyph_width(0xc6), 1000.0);
        assert_eq!(glyph_width(0xe9), 556.0);
    }

    #[test]
    fn non_latin_characters_are_replaced() {
        assert_eq!(encode_label("café ✓"), b"caf\xe9 ?".to_vec());
    }
}
