mod pdf;
mod png;
mod svg;

pub use pdf::render_pdf;
pub use png::{render_png, render_raster};
pub use svg::render_svg;

use image::{DynamicImage, Rgba};
use qrcode::types::QrError as EncodeError;
use qrcode::{EcLevel, QrCode};
use tracing::debug;

use crate::error::{QrError, QrResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);
    pub const WHITE: Color = Color::new(0xff, 0xff, 0xff);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let hex = raw.trim();
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).ok();
        match hex.len() {
            3 => {
                let mut it = hex.chars().map(|c| c.to_digit(16).map(|d| (d * 17) as u8));
                Some(Color::new(it.next()??, it.next()??, it.next()??))
            }
            6 | 8 => Some(Color::new(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
            )),
            _ => None,
        }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    pub fn to_rgba(self) -> Rgba<u8> {
        Rgba([self.r, self.g, self.b, 0xff])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Svg,
    Pdf,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> QrResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "png" => Ok(OutputFormat::Png),
            "svg" => Ok(OutputFormat::Svg),
            "pdf" => Ok(OutputFormat::Pdf),
            other => Err(QrError::invalid(format!(
                "Unsupported output format: {other} (use png, svg or pdf)"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Svg => "svg",
            OutputFormat::Pdf => "pdf",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Svg => "image/svg+xml",
            OutputFormat::Pdf => "application/pdf",
        }
    }

    pub fn filename(self) -> String {
        format!("qr-code.{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Style {
    pub foreground: Color,
    pub background: Color,
    pub label: Option<String>,
    pub logo: Option<DynamicImage>,
    pub width: u32,
    pub ec_level: EcLevel,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            foreground: Color::BLACK,
            background: Color::WHITE,
            label: None,
            logo: None,
            width: 300,
            ec_level: EcLevel::H,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderedQr {
    pub format: OutputFormat,
    pub bytes: Vec<u8>,
}

impl RenderedQr {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    pub fn filename(&self) -> String {
        self.format.filename()
    }
}

const EC_LEVELS: [EcLevel; 4] = [EcLevel::H, EcLevel::Q, EcLevel::M, EcLevel::L];

/// Encodes at the preferred level, stepping down towards `L` when the payload
/// does not fit. A logo occludes modules, so it pins the level to `H`.
pub fn build_code(payload: &str, style: &Style) -> QrResult<QrCode> {
    let (preferred, allow_downgrade) = if style.logo.is_some() {
        (EcLevel::H, false)
    } else {
        (style.ec_level, true)
    };

    let start = EC_LEVELS
        .iter()
        .position(|l| *l == preferred)
        .unwrap_or(0);
    let candidates = if allow_downgrade {
        &EC_LEVELS[start..]
    } else {
        &EC_LEVELS[start..=start]
    };

    for level in candidates {
        match QrCode::with_error_correction_level(payload.as_bytes(), *level) {
            Ok(code) => {
                if *level != preferred {
                    debug!("Downgraded error correction {:?} -> {:?}", preferred, level);
                }
                return Ok(code);
            }
            Err(EncodeError::DataTooLong) => continue,
            Err(e) => return Err(QrError::rendering(e)),
        }
    }

    Err(QrError::invalid(format!(
        "Payload too large for a QR code ({} bytes)",
        payload.len()
    )))
}

pub fn render(payload: &str, style: &Style, format: OutputFormat) -> QrResult<RenderedQr> {
    let bytes = match format {
        OutputFormat::Png => render_png(payload, style)?,
        OutputFormat::Svg => render_svg(payload, style)?.into_bytes(),
        OutputFormat::Pdf => render_pdf(payload, style)?,
    };
    Ok(RenderedQr { format, bytes })
}
