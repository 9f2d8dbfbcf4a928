//! Request orchestration: form → content → payload → (cipher) → renderer.

use image::DynamicImage;
use tracing::{info, warn};

use crate::cipher;
use crate::config::Config;
use crate::content::{
    format_payload, split_links, ContentKind, ContentType, FileContent, FileStrategy,
    FormatOptions, PaymentTarget, WifiCredential, WifiEncryption,
};
use crate::error::{QrError, QrResult};
use crate::render::{self, Color, OutputFormat, RenderedQr, Style};
use crate::upload::{GenerateForm, UploadedFile};

#[derive(Debug, Clone)]
pub struct QrRequest {
    pub content: ContentType,
    pub style: Style,
    pub format: OutputFormat,
    pub encryption_password: Option<String>,
}

fn parse_color(raw: &str, default: Color, field: &str) -> QrResult<Color> {
    if raw.trim().is_empty() {
        return Ok(default);
    }
    Color::parse(raw).ok_or_else(|| QrError::invalid(format!("Invalid {field}: {raw}")))
}

pub fn decode_logo(bytes: &[u8]) -> QrResult<DynamicImage> {
    image::load_from_memory(bytes).map_err(|_| QrError::invalid("Logo is not a supported image"))
}

pub fn format_options(config: &Config) -> FormatOptions {
    FormatOptions {
        multi_link_mode: config.multi_link_mode,
        public_base_url: config.public_base_url.clone(),
    }
}

async fn dir_usage(dir: &std::path::Path) -> QrResult<u64> {
    let mut total = 0u64;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if meta.is_file() {
            total = total.saturating_add(meta.len());
        }
    }
    Ok(total)
}

/// Small files go inline as a data URL; larger ones are kept under
/// `files_dir` (content-addressed) and the QR code links to them.
async fn file_content(upload: UploadedFile, config: &Config) -> QrResult<FileContent> {
    let mime = upload.mime.clone();
    if upload.size <= config.inline_file_limit {
        let data = upload.read().await?;
        return Ok(FileContent {
            mime,
            strategy: FileStrategy::Inline(data),
        });
    }

    let name = format!("{}{}", hex::encode(upload.sha256), upload.retained_extension());
    tokio::fs::create_dir_all(&config.files_dir).await?;
    let dest = config.files_dir.join(&name);
    if tokio::fs::try_exists(&dest).await? {
        drop(upload);
    } else {
        let used = dir_usage(&config.files_dir).await?;
        if used.saturating_add(upload.size as u64) > config.files_max_bytes {
            warn!(
                "Rejected upload of {} bytes: file storage at {} of {} bytes",
                upload.size, used, config.files_max_bytes
            );
            return Err(QrError::invalid("File storage is full"));
        }
        upload.temp.persist(&dest).await?;
    }
    info!("Retained uploaded file {} ({} bytes)", name, upload_size_hint(&dest).await);

    Ok(FileContent {
        mime,
        strategy: FileStrategy::Retained {
            url: format!("{}/files/{}", config.public_base_url, name),
        },
    })
}

async fn upload_size_hint(path: &std::path::Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

pub fn field_content(kind: ContentKind, form: &GenerateForm) -> QrResult<ContentType> {
    Ok(match kind {
        ContentKind::Link => ContentType::Link(form.field("text").to_string()),
        ContentKind::Text => ContentType::Text(form.field("text").to_string()),
        ContentKind::Wifi => ContentType::Wifi(WifiCredential {
            ssid: form.field("wifiSsid").to_string(),
            encryption: WifiEncryption::parse(form.field("wifiEncryption"))?,
            password: form.field("wifiPassword").to_string(),
        }),
        ContentKind::Payment => {
            let amount = form.field("paymentAmount").trim();
            ContentType::Payment(PaymentTarget {
                email: form.field("paymentEmail").trim().to_string(),
                amount: (!amount.is_empty()).then(|| amount.to_string()),
            })
        }
        ContentKind::MultiLink => ContentType::MultiLink(split_links(form.field("multiLinks"))),
        ContentKind::File => return Err(QrError::invalid("No file uploaded")),
    })
}

async fn build_content(kind: ContentKind, form: &mut GenerateForm, config: &Config) -> QrResult<ContentType> {
    if kind != ContentKind::File {
        return field_content(kind, form);
    }
    let upload = form
        .file
        .take()
        .ok_or_else(|| QrError::invalid("No file uploaded"))?;
    Ok(ContentType::File(file_content(upload, config).await?))
}

/// Validates the form and turns it into a [`QrRequest`]. Upload temp files
/// still belong to `form` and are removed when it is dropped.
pub async fn build_request(form: &mut GenerateForm, config: &Config) -> QrResult<QrRequest> {
    let kind = ContentKind::from_form(form.field("type"));
    let format = OutputFormat::parse(form.field("outputFormat"))?;
    let foreground = parse_color(form.field("fgColor"), config.default_foreground, "fgColor")?;
    let background = parse_color(form.field("bgColor"), config.default_background, "bgColor")?;

    let label = form.field("label").trim();
    let label = (!label.is_empty()).then(|| label.to_string());
    let password = form.field("encrypt");
    let encryption_password = (!password.is_empty()).then(|| password.to_string());

    let logo = match &form.logo {
        Some(upload) => {
            let bytes = upload.read().await?;
            Some(tokio::task::spawn_blocking(move || decode_logo(&bytes))
                .await
                .map_err(|e| QrError::rendering(format!("logo decode task failed: {e}")))??)
        }
        None => None,
    };

    let content = build_content(kind, form, config).await?;

    Ok(QrRequest {
        content,
        style: Style {
            foreground,
            background,
            label,
            logo,
            width: config.qr_width,
            ec_level: config.ec_level,
        },
        format,
        encryption_password,
    })
}

pub fn encode_payload(
    content: &ContentType,
    opts: &FormatOptions,
    password: Option<&str>,
) -> QrResult<String> {
    let payload = format_payload(content, opts)?;
    if payload.is_empty() {
        return Err(QrError::invalid("No data to encode"));
    }
    match password {
        Some(password) if !password.is_empty() => cipher::encrypt(&payload, password),
        _ => Ok(payload),
    }
}

pub async fn generate_from_request(request: QrRequest, config: &Config) -> QrResult<RenderedQr> {
    let opts = format_options(config);
    let kind = request.content.kind();
    let encrypted = request.encryption_password.is_some();

    // Payload errors (missing email, empty SSID) surface before any heavy work.
    let payload = format_payload(&request.content, &opts)?;
    if payload.is_empty() {
        return Err(QrError::invalid("No data to encode"));
    }

    let QrRequest {
        style,
        format,
        encryption_password,
        ..
    } = request;

    let rendered = tokio::task::spawn_blocking(move || -> QrResult<RenderedQr> {
        let payload = match encryption_password {
            Some(password) => cipher::encrypt(&payload, &password)?,
            None => payload,
        };
        render::render(&payload, &style, format)
    })
    .await
    .map_err(|e| QrError::rendering(format!("render task failed: {e}")))??;

    info!(
        "Generated {} QR code: type={}, encrypted={}, {} bytes",
        format.as_str(),
        kind.as_str(),
        encrypted,
        rendered.bytes.len()
    );
    Ok(rendered)
}

/// Whole pipeline for one `/generate` submission. Temp uploads are removed
/// on every exit path when `form` goes out of scope.
pub async fn generate(mut form: GenerateForm, config: &Config) -> QrResult<RenderedQr> {
    let request = build_request(&mut form, config).await?;
    generate_from_request(request, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MultiLinkMode;
    use crate::upload::write_temp;
    use std::collections::HashMap;
    use std::path::Path;

    fn test_config(root: &Path) -> Config {
        Config {
            upload_dir: root.join("uploads"),
            files_dir: root.join("files"),
            public_base_url: "https://qr.example.com".to_string(),
            ..Config::default()
        }
    }

    fn form(pairs: &[(&str, &str)]) -> GenerateForm {
        GenerateForm::from_fields(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        )
    }

    #[tokio::test]
    async fn link_renders_png_by_default() {
        let tmp = tempfile::tempdir().unwrap();
        let out = generate(
            form(&[("type", "link"), ("text", "https://example.com")]),
            &test_config(tmp.path()),
        )
        .await
        .unwrap();
        assert_eq!(out.format, OutputFormat::Png);
        assert_eq!(out.content_type(), "image/png");
        assert_eq!(out.filename(), "qr-code.png");
        assert!(out.bytes.starts_with(b"\x89PNG"));
    }

    #[tokio::test]
    async fn payment_without_email_is_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let err = generate(
            form(&[("type", "payment"), ("paymentAmount", "10")]),
            &test_config(tmp.path()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, QrError::InvalidInput(ref m) if m.contains("email")));
    }

    #[tokio::test]
    async fn wifi_without_ssid_is_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let err = generate(
            form(&[("type", "wifi"), ("wifiPassword", "secret")]),
            &test_config(tmp.path()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, QrError::InvalidInput(ref m) if m == "No data to encode"));
    }

    #[tokio::test]
    async fn unknown_output_format_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let err = generate(
            form(&[("text", "hello"), ("outputFormat", "bmp")]),
            &test_config(tmp.path()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, QrError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn invalid_colour_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let err = generate(
            form(&[("text", "hello"), ("fgColor", "chartreuse")]),
            &test_config(tmp.path()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, QrError::InvalidInput(ref m) if m.contains("fgColor")));
    }

    #[tokio::test]
    async fn svg_and_pdf_outputs() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let svg = generate(
            form(&[("type", "text"), ("text", "hi"), ("outputFormat", "svg"), ("fgColor", "#ff0000")]),
            &config,
        )
        .await
        .unwrap();
        assert_eq!(svg.content_type(), "image/svg+xml");
        assert!(String::from_utf8(svg.bytes).unwrap().contains("#ff0000"));

        let pdf = generate(
            form(&[("text", "hi"), ("outputFormat", "pdf"), ("label", "Hello")]),
            &config,
        )
        .await
        .unwrap();
        assert_eq!(pdf.content_type(), "application/pdf");
        assert!(pdf.bytes.starts_with(b"%PDF-"));
    }

    #[tokio::test]
    async fn missing_file_is_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let err = generate(form(&[("type", "file")]), &test_config(tmp.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, QrError::InvalidInput(ref m) if m == "No file uploaded"));
    }

    #[tokio::test]
    async fn small_file_is_inlined_and_temp_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let mut f = form(&[("type", "file")]);
        let upload = write_temp(&config.upload_dir, b"hi", "text/plain", Some("a.txt"))
            .await
            .unwrap();
        let temp_path = upload.temp.path().to_path_buf();
        f.file = Some(upload);

        let request = build_request(&mut f, &config).await.unwrap();
        assert_eq!(
            format_payload(&request.content, &format_options(&config)).unwrap(),
            "data:text/plain;base64,aGk="
        );
        assert!(!temp_path.exists());
    }

    #[tokio::test]
    async fn large_file_is_retained_and_linked() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            inline_file_limit: 4,
            ..test_config(tmp.path())
        };
        let mut f = form(&[("type", "file")]);
        f.file = Some(
            write_temp(&config.upload_dir, b"0123456789", "text/plain", Some("notes.txt"))
                .await
                .unwrap(),
        );

        let request = build_request(&mut f, &config).await.unwrap();
        let ContentType::File(FileContent {
            strategy: FileStrategy::Retained { url },
            ..
        }) = &request.content
        else {
            panic!("expected retained file, got {:?}", request.content);
        };
        let name = url.strip_prefix("https://qr.example.com/files/").unwrap();
        assert!(name.ends_with(".txt"));
        assert_eq!(
            std::fs::read(config.files_dir.join(name)).unwrap(),
            b"0123456789"
        );
        drop(f);
        assert!(std::fs::read_dir(&config.upload_dir).unwrap().next().is_none());
    }

    fn retained_url(content: &ContentType) -> &str {
        match content {
            ContentType::File(FileContent {
                strategy: FileStrategy::Retained { url },
                ..
            }) => url,
            other => panic!("expected retained file, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retained_markup_is_stored_as_bin() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            inline_file_limit: 4,
            ..test_config(tmp.path())
        };
        let mut f = form(&[("type", "file")]);
        f.file = Some(
            write_temp(
                &config.upload_dir,
                b"<script>alert(1)</script>",
                "text/html",
                Some("evil.html"),
            )
            .await
            .unwrap(),
        );

        let request = build_request(&mut f, &config).await.unwrap();
        let url = retained_url(&request.content);
        assert!(url.ends_with(".bin"), "{url}");
        assert!(!url.contains(".html"));
    }

    #[tokio::test]
    async fn file_storage_cap_rejects_new_files() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            inline_file_limit: 4,
            files_max_bytes: 15,
            ..test_config(tmp.path())
        };
        let upload = |bytes: &'static [u8]| {
            let dir = config.upload_dir.clone();
            async move {
                write_temp(&dir, bytes, "text/plain", Some("a.txt"))
                    .await
                    .unwrap()
            }
        };

        let mut first = form(&[("type", "file")]);
        first.file = Some(upload(b"0123456789").await);
        build_request(&mut first, &config).await.unwrap();

        let mut second = form(&[("type", "file")]);
        second.file = Some(upload(b"abcdefghij").await);
        let err = build_request(&mut second, &config).await.unwrap_err();
        assert!(matches!(err, QrError::InvalidInput(ref m) if m == "File storage is full"));
        drop(second);

        let mut again = form(&[("type", "file")]);
        again.file = Some(upload(b"0123456789").await);
        let request = build_request(&mut again, &config).await.unwrap();
        assert!(retained_url(&request.content).ends_with(".txt"));
        drop((first, again));

        assert_eq!(std::fs::read_dir(&config.files_dir).unwrap().count(), 1);
        assert!(std::fs::read_dir(&config.upload_dir).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn undecodable_logo_is_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let mut f = form(&[("text", "hello")]);
        f.logo = Some(
            write_temp(&config.upload_dir, b"not an image", "image/png", Some("logo.png"))
                .await
                .unwrap(),
        );
        let err = generate(f, &config).await.unwrap_err();
        assert!(matches!(err, QrError::InvalidInput(ref m) if m.contains("Logo")));
        assert!(std::fs::read_dir(&config.upload_dir).unwrap().next().is_none());
    }

    #[test]
    fn encode_payload_encrypts_when_password_given() {
        let opts = FormatOptions {
            multi_link_mode: MultiLinkMode::Joined,
            public_base_url: String::new(),
        };
        let content = ContentType::Text("secret note".to_string());
        assert_eq!(encode_payload(&content, &opts, None).unwrap(), "secret note");
        assert_eq!(encode_payload(&content, &opts, Some("")).unwrap(), "secret note");

        let token = encode_payload(&content, &opts, Some("pw")).unwrap();
        assert_ne!(token, "secret note");
        assert_eq!(cipher::decrypt(&token, "pw").unwrap(), "secret note");
    }
}
