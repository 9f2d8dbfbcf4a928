//! Canonical payload strings for every supported QR content type.
//!
//! Everything here is pure: no I/O, no logging. The orchestrator decides what
//! to do with an empty payload.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{QrError, QrResult};

const PAYPAL_ME_BASE: &str = "https://www.paypal.me/";
const MULTI_LINK_KIND: &str = "multiLink";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Link,
    Text,
    Wifi,
    Payment,
    MultiLink,
    File,
}

impl ContentKind {
    pub fn from_form(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("text") {
            ContentKind::Text
        } else if raw.eq_ignore_ascii_case("wifi") {
            ContentKind::Wifi
        } else if raw.eq_ignore_ascii_case("payment") {
            ContentKind::Payment
        } else if raw.eq_ignore_ascii_case("multiLink") || raw.eq_ignore_ascii_case("multi") {
            ContentKind::MultiLink
        } else if raw.eq_ignore_ascii_case("file") {
            ContentKind::File
        } else {
            ContentKind::Link
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Link => "link",
            ContentKind::Text => "text",
            ContentKind::Wifi => "wifi",
            ContentKind::Payment => "payment",
            ContentKind::MultiLink => "multiLink",
            ContentKind::File => "file",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiEncryption {
    Wpa,
    Wep,
    None,
}

impl WifiEncryption {
    /// Empty input means WPA, the most common setup.
    pub fn parse(raw: &str) -> QrResult<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "" | "WPA" | "WPA2" | "WPA3" => Ok(WifiEncryption::Wpa),
            "WEP" => Ok(WifiEncryption::Wep),
            "NONE" | "NOPASS" => Ok(WifiEncryption::None),
            other => Err(QrError::invalid(format!(
                "Unsupported Wi-Fi encryption: {other} (use WPA, WEP or none)"
            ))),
        }
    }

    pub fn uri_token(self) -> &'static str {
        match self {
            WifiEncryption::Wpa => "WPA",
            WifiEncryption::Wep => "WEP",
            WifiEncryption::None => "nopass",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiCredential {
    pub ssid: String,
    pub encryption: WifiEncryption,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTarget {
    pub email: String,
    pub amount: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStrategy {
    Inline(Vec<u8>),
    Retained { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub mime: String,
    pub strategy: FileStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    Link(String),
    Text(String),
    Wifi(WifiCredential),
    Payment(PaymentTarget),
    MultiLink(Vec<String>),
    File(FileContent),
}

impl ContentType {
    pub fn kind(&self) -> ContentKind {
        match self {
            ContentType::Link(_) => ContentKind::Link,
            ContentType::Text(_) => ContentKind::Text,
            ContentType::Wifi(_) => ContentKind::Wifi,
            ContentType::Payment(_) => ContentKind::Payment,
            ContentType::MultiLink(_) => ContentKind::MultiLink,
            ContentType::File(_) => ContentKind::File,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiLinkMode {
    Joined,
    Viewer,
}

impl MultiLinkMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "joined" | "join" | "list" => Some(MultiLinkMode::Joined),
            "viewer" | "page" => Some(MultiLinkMode::Viewer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FormatOptions {
    pub multi_link_mode: MultiLinkMode,
    pub public_base_url: String,
}

pub fn format_payload(content: &ContentType, opts: &FormatOptions) -> QrResult<String> {
    match content {
        ContentType::Link(text) | ContentType::Text(text) => Ok(format_text(text)),
        ContentType::Wifi(cred) => Ok(format_wifi(&cred.ssid, cred.encryption, &cred.password)),
        ContentType::Payment(target) => format_payment(&target.email, target.amount.as_deref()),
        ContentType::MultiLink(links) => {
            let links = format_multi_link(links);
            if links.is_empty() {
                return Ok(String::new());
            }
            Ok(match opts.multi_link_mode {
                MultiLinkMode::Joined => links.join("\n"),
                MultiLinkMode::Viewer => format!(
                    "{}/multilinks?data={}",
                    opts.public_base_url.trim_end_matches('/'),
                    encode_multi_link_viewer(&links)
                ),
            })
        }
        ContentType::File(file) => Ok(match &file.strategy {
            FileStrategy::Inline(bytes) => {
                format!("data:{};base64,{}", file.mime, STANDARD.encode(bytes))
            }
            FileStrategy::Retained { url } => url.clone(),
        }),
    }
}

pub fn format_text(text: &str) -> String {
    if text.is_empty() {
        " ".to_string()
    } else {
        text.to_string()
    }
}

fn escape_wifi_field(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | ';' | ',' | ':' | '"') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// `WIFI:T:<mode>;S:<ssid>;P:<password>;;` with the grammar's backslash escapes.
pub fn format_wifi(ssid: &str, encryption: WifiEncryption, password: &str) -> String {
    if ssid.is_empty() {
        return String::new();
    }
    format!(
        "WIFI:T:{};S:{};P:{};;",
        encryption.uri_token(),
        escape_wifi_field(ssid),
        escape_wifi_field(password)
    )
}

/// Inverse of [`format_wifi`]. A missing `T` field means an open network.
pub fn parse_wifi(payload: &str) -> Option<WifiCredential> {
    let body = payload.strip_prefix("WIFI:")?;

    let mut fields: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => current.push(chars.next()?),
            ';' => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        // unterminated field
        return None;
    }

    let mut ssid: Option<String> = None;
    let mut encryption = WifiEncryption::None;
    let mut password = String::new();
    for field in fields.into_iter().filter(|f| !f.is_empty()) {
        let (key, value) = field.split_once(':')?;
        match key {
            "S" => ssid = Some(value.to_string()),
            "T" => encryption = WifiEncryption::parse(value).ok()?,
            "P" => password = value.to_string(),
            _ => {}
        }
    }

    let ssid = ssid.filter(|s| !s.is_empty())?;
    Some(WifiCredential {
        ssid,
        encryption,
        password,
    })
}

fn positive_amount(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    let value: f64 = raw.parse().ok()?;
    (value.is_finite() && value > 0.0).then_some(raw)
}

/// PayPal.me link. The handle is the lower-cased email with `@` and `.`
/// removed; an amount that is not a positive number is dropped.
pub fn format_payment(email: &str, amount: Option<&str>) -> QrResult<String> {
    let email = email.trim();
    if email.is_empty() {
        return Err(QrError::invalid("Payment email required"));
    }
    let handle: String = email
        .to_lowercase()
        .chars()
        .filter(|c| *c != '@' && *c != '.')
        .collect();

    let mut url = format!("{PAYPAL_ME_BASE}{handle}");
    if let Some(amount) = amount.and_then(positive_amount) {
        url.push('/');
        url.push_str(amount);
    }
    Ok(url)
}

/// Splits the raw form value. Newlines take precedence so that URLs with
/// commas in their query survive; a single line is split on commas.
pub fn split_links(raw: &str) -> Vec<String> {
    let parts: Vec<&str> = if raw.contains('\n') {
        raw.split('\n').collect()
    } else {
        raw.split(',').collect()
    };
    format_multi_link(&parts)
}

pub fn format_multi_link<S: AsRef<str>>(links: &[S]) -> Vec<String> {
    links
        .iter()
        .map(|l| l.as_ref().trim())
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct MultiLinkDocument {
    #[serde(rename = "type")]
    kind: String,
    links: Vec<String>,
}

pub fn encode_multi_link_viewer(links: &[String]) -> String {
    let doc = MultiLinkDocument {
        kind: MULTI_LINK_KIND.to_string(),
        links: links.to_vec(),
    };
    // Serializing a struct of strings cannot fail.
    let json = serde_json::to_vec(&doc).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

fn decode_base64_lenient(data: &str) -> Option<Vec<u8>> {
    // `+` arrives as a space when the query string was not percent-encoded.
    let data = data.trim().replace(' ', "+");
    [&URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(data.as_bytes()).ok())
}

pub fn decode_multi_link_viewer(data: &str) -> QrResult<Vec<String>> {
    let raw = decode_base64_lenient(data)
        .ok_or_else(|| QrError::invalid("Invalid multi-link data: not base64"))?;
    let doc: MultiLinkDocument = serde_json::from_slice(&raw)
        .map_err(|_| QrError::invalid("Invalid multi-link data: not a link list"))?;
    if doc.kind != MULTI_LINK_KIND {
        return Err(QrError::invalid("Invalid multi-link data: unexpected type"));
    }
    let links = format_multi_link(&doc.links);
    if links.is_empty() {
        return Err(QrError::invalid("Invalid multi-link data: no links"));
    }
    Ok(links)
}
