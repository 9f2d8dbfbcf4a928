//! Form intake for `/generate`: text fields plus the optional `file` and
//! `logo` parts, which are streamed to disk under a hard size cap.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header;
use axum::Form;
use rand::distr::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{QrError, QrResult};

const DEFAULT_MIME: &str = "application/octet-stream";

/// A file under the upload directory that is removed when dropped, unless
/// it was persisted somewhere else first.
#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
    armed: bool,
}

impl TempUpload {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Moves the file to `dest`. Falls back to copy when rename crosses devices.
    pub async fn persist(mut self, dest: &Path) -> QrResult<()> {
        if tokio::fs::rename(&self.path, dest).await.is_ok() {
            self.armed = false;
            return Ok(());
        }
        tokio::fs::copy(&self.path, dest).await?;
        Ok(())
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed temporary upload {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove temporary upload {:?}: {}", self.path, e),
        }
    }
}

#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub mime: String,
    pub size: usize,
    pub sha256: [u8; 32],
    pub temp: TempUpload,
}

impl UploadedFile {
    pub async fn read(&self) -> QrResult<Vec<u8>> {
        Ok(tokio::fs::read(self.temp.path()).await?)
    }

    pub fn extension(&self) -> String {
        extension_for(&self.mime, self.file_name.as_deref())
    }

    pub fn retained_extension(&self) -> String {
        retained_extension(&self.mime, self.file_name.as_deref())
    }
}

#[derive(Debug, Default)]
pub struct GenerateForm {
    fields: HashMap<String, String>,
    pub file: Option<UploadedFile>,
    pub logo: Option<UploadedFile>,
}

impl GenerateForm {
    pub fn from_fields(fields: HashMap<String, String>) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }

    pub fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }
}

#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub dir: PathBuf,
    pub max_bytes: usize,
}

pub fn random_suffix(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// `<unix-millis>-<random>` keeps concurrent uploads from colliding.
pub fn unique_name(extension: &str) -> String {
    format!(
        "{}-{}{}",
        chrono::Utc::now().timestamp_millis(),
        random_suffix(8),
        extension
    )
}

fn normalize_mime(content_type: Option<&str>) -> String {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| DEFAULT_MIME.to_string())
}

fn is_safe_extension(ext: &str) -> bool {
    !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Extensions a retained upload may keep under `/files`. Anything that a
/// browser would run as markup or script is stored as `.bin`.
const RETAINED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "bmp", "pdf", "txt", "csv", "json", "mp3", "wav", "ogg",
    "mp4", "webm", "zip", "gz", "docx", "xlsx", "pptx", "odt", "ods", "epub",
];

fn name_extension(file_name: Option<&str>) -> Option<String> {
    file_name
        .and_then(|n| n.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| is_safe_extension(ext))
}

/// The client's extension wins when it agrees with the declared type.
/// Otherwise the type decides, and only an untyped upload falls back to the
/// name.
pub fn extension_for(mime: &str, file_name: Option<&str>) -> String {
    let from_name = name_extension(file_name);
    if let Some(ext) = &from_name {
        if mime_guess::from_ext(ext)
            .iter()
            .any(|m| m.essence_str() == mime)
        {
            return format!(".{ext}");
        }
    }
    if mime != DEFAULT_MIME {
        if let Some(ext) = mime_guess::get_mime_extensions_str(mime).and_then(|exts| exts.first()) {
            return format!(".{ext}");
        }
    }
    match from_name {
        Some(ext) => format!(".{ext}"),
        None => ".bin".to_string(),
    }
}

pub fn retained_extension(mime: &str, file_name: Option<&str>) -> String {
    let ext = extension_for(mime, file_name);
    if RETAINED_EXTENSIONS.contains(&ext.trim_start_matches('.')) {
        ext
    } else {
        ".bin".to_string()
    }
}

fn too_large(max_bytes: usize) -> QrError {
    QrError::invalid(format!(
        "Uploaded file exceeds the {} KiB limit",
        max_bytes / 1024
    ))
}

async fn stream_to_disk(
    field: &mut axum::extract::multipart::Field<'_>,
    limits: &UploadLimits,
) -> QrResult<UploadedFile> {
    let file_name = field
        .file_name()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);
    let mime = normalize_mime(field.content_type());
    let ext = extension_for(&mime, file_name.as_deref());

    tokio::fs::create_dir_all(&limits.dir).await?;
    let temp = TempUpload::new(limits.dir.join(unique_name(&ext)));
    let mut out = tokio::fs::File::create(temp.path()).await?;

    let mut size = 0usize;
    let mut hasher = Sha256::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| QrError::invalid(format!("Failed to read upload: {}", e.body_text())))?
    {
        size += chunk.len();
        if size > limits.max_bytes {
            return Err(too_large(limits.max_bytes));
        }
        hasher.update(&chunk);
        out.write_all(&chunk).await?;
    }
    out.flush().await?;
    drop(out);

    Ok(UploadedFile {
        file_name,
        mime,
        size,
        sha256: hasher.finalize().into(),
        temp,
    })
}

pub async fn read_multipart(mut multipart: Multipart, limits: &UploadLimits) -> QrResult<GenerateForm> {
    let mut form = GenerateForm::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| QrError::invalid(format!("Failed to read multipart: {}", e.body_text())))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "logo" => {
                let upload = stream_to_disk(&mut field, limits).await?;
                // Browsers send an empty part for an untouched file input.
                if upload.size == 0 && upload.file_name.is_none() {
                    continue;
                }
                let slot = if name == "file" {
                    &mut form.file
                } else {
                    &mut form.logo
                };
                if slot.is_some() {
                    return Err(QrError::invalid(format!(
                        "Multiple '{name}' parts are not allowed"
                    )));
                }
                *slot = Some(upload);
            }
            _ => {
                let value = field.text().await.map_err(|e| {
                    QrError::invalid(format!("Failed to read field {name}: {}", e.body_text()))
                })?;
                form.set(name, value);
            }
        }
    }

    Ok(form)
}

#[cfg(test)]
pub(crate) async fn write_temp(
    dir: &Path,
    data: &[u8],
    mime: &str,
    file_name: Option<&str>,
) -> QrResult<UploadedFile> {
    tokio::fs::create_dir_all(dir).await?;
    let mime = normalize_mime(Some(mime));
    let temp = TempUpload::new(dir.join(unique_name(&extension_for(&mime, file_name))));
    tokio::fs::write(temp.path(), data).await?;
    Ok(UploadedFile {
        file_name: file_name.map(str::to_string),
        mime,
        size: data.len(),
        sha256: Sha256::digest(data).into(),
        temp,
    })
}

fn is_multipart(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.trim().to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false)
}

pub async fn read_generate_form(req: Request, limits: &UploadLimits) -> QrResult<GenerateForm> {
    if is_multipart(&req) {
        let multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| QrError::invalid(e.body_text()))?;
        return read_multipart(multipart, limits).await;
    }

    let Form(fields) = Form::<HashMap<String, String>>::from_request(req, &())
        .await
        .map_err(|e| QrError::invalid(e.body_text()))?;
    Ok(GenerateForm::from_fields(fields))
}
