use axum::extract::{FromRequest, Query, Request, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use axum::{Form, Json};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cipher;
use crate::content::decode_multi_link_viewer;
use crate::error::{QrError, DECRYPTION_FAILED_MESSAGE};
use crate::generate::generate;
use crate::http::{ApiError, ApiResult};
use crate::logs::LogSnapshot;
use crate::models::SharedState;
use crate::upload::read_generate_form;
use crate::utils::{escape_html, is_web_link};

pub async fn generate_handler(State(state): State<SharedState>, req: Request) -> ApiResult<Response> {
    let form = read_generate_form(req, &state.upload_limits()).await?;
    let rendered = generate(form, &state.config).await?;
    let disposition = format!("attachment; filename=\"{}\"", rendered.filename());
    Ok((
        [
            (header::CONTENT_TYPE, rendered.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        rendered.bytes,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct MultiLinksQuery {
    #[serde(default)]
    data: String,
}

fn multi_link_page(links: &[String]) -> String {
    let items: String = links
        .iter()
        .map(|link| {
            let escaped = escape_html(link);
            if is_web_link(link) {
                format!(
                    "      <li><a href=\"{escaped}\" target=\"_blank\" rel=\"noopener noreferrer\">{escaped}</a></li>\n"
                )
            } else {
                format!("      <li>{escaped}</li>\n")
            }
        })
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Links</title>
  </head>
  <body>
    <h1>Links</h1>
    <ul>
{items}    </ul>
  </body>
</html>
"#
    )
}

pub async fn multilinks_handler(Query(query): Query<MultiLinksQuery>) -> ApiResult<Html<String>> {
    let links = decode_multi_link_viewer(&query.data)?;
    Ok(Html(multi_link_page(&links)))
}

const DECRYPT_FORM: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Decrypt QR payload</title>
  </head>
  <body>
    <h1>Decrypt QR payload</h1>
    <form method="post" action="/decrypt">
      <p><label>Encrypted data<br><textarea name="data" rows="4" cols="60" required></textarea></label></p>
      <p><label>Password<br><input type="password" name="password" required></label></p>
      <p><button type="submit">Decrypt</button></p>
    </form>
  </body>
</html>
"#;

pub async fn decrypt_form_handler() -> Html<&'static str> {
    Html(DECRYPT_FORM)
}

#[derive(Debug, Default, Deserialize)]
pub struct DecryptRequest {
    #[serde(default)]
    data: String,
    #[serde(default)]
    password: String,
}

fn is_json(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.trim().to_ascii_lowercase().starts_with("application/json"))
        .unwrap_or(false)
}

async fn read_decrypt_request(req: Request) -> Option<DecryptRequest> {
    if is_json(&req) {
        Json::<DecryptRequest>::from_request(req, &()).await.ok().map(|Json(b)| b)
    } else {
        Form::<DecryptRequest>::from_request(req, &()).await.ok().map(|Form(b)| b)
    }
}

/// Any failure, including an unreadable body, answers with the same message.
pub async fn decrypt_handler(req: Request) -> ApiResult<Response> {
    let Some(body) = read_decrypt_request(req).await else {
        debug!("Unreadable decrypt request body");
        return Err(QrError::Decryption.into());
    };

    let plaintext = tokio::task::spawn_blocking(move || cipher::decrypt(body.data.trim(), &body.password))
        .await
        .map_err(|e| {
            warn!("Decrypt task failed: {}", e);
            ApiError::bad_request(DECRYPTION_FAILED_MESSAGE)
        })??;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        plaintext,
    )
        .into_response())
}

pub async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    cursor: Option<u64>,
    #[serde(default)]
    limit: Option<usize>,
}

pub async fn logs_handler(
    State(state): State<SharedState>,
    Query(query): Query<LogsQuery>,
) -> Json<LogSnapshot> {
    let limit = query.limit.unwrap_or(400);
    Json(state.logs.snapshot(query.cursor, limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_link_page_escapes_and_isolates_links() {
        let page = multi_link_page(&[
            "https://a.example/?q=<b>".to_string(),
            "javascript:alert(1)".to_string(),
        ]);
        assert!(page.contains(
            r#"<a href="https://a.example/?q=&lt;b&gt;" target="_blank" rel="noopener noreferrer">"#
        ));
        assert!(page.contains("<li>javascript:alert(1)</li>"));
        assert!(!page.contains("href=\"javascript"));
    }
}
