use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use qrgen::config::Config;
use qrgen::content::{parse_wifi, ContentKind};
use qrgen::generate::{encode_payload, field_content, format_options};
use qrgen::upload::GenerateForm;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart;
use serde_json::Value;

fn die(msg: &str) -> ! {
    eprintln!("ERROR: {msg}");
    std::process::exit(1);
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn resolve_token(arg: Option<String>) -> Option<String> {
    non_empty(arg).or_else(|| non_empty(std::env::var("QRGEN_ADMIN_TOKEN").ok()))
}

fn resolve_base_url(arg: Option<String>) -> String {
    if let Some(url) = non_empty(arg).or_else(|| non_empty(std::env::var("QRGEN_URL").ok())) {
        return url.trim_end_matches('/').to_string();
    }
    let port = non_empty(std::env::var("QRGEN_PORT").ok())
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(qrgen::config::DEFAULT_PORT);
    format!("http://127.0.0.1:{port}")
}

fn is_local_base_url(url: &str) -> bool {
    let url = url.trim().to_ascii_lowercase();
    ["127.0.0.1", "localhost", "[::1]"].iter().any(|host| {
        url.starts_with(&format!("http://{host}")) || url.starts_with(&format!("https://{host}"))
    })
}

fn build_client(token: Option<&str>, base_url: &str) -> reqwest::Client {
    let mut headers = HeaderMap::new();
    if let Some(token) = token {
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(value) => {
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => die("token contains characters not allowed in a header"),
        }
    }

    let mut builder = reqwest::Client::builder();
    if is_local_base_url(base_url) {
        // A system proxy must not intercept requests to a local server.
        builder = builder.no_proxy();
    }

    builder
        .default_headers(headers)
        .timeout(Duration::from_secs(60))
        .build()
        .unwrap_or_else(|e| die(&format!("failed to build http client: {e}")))
}

/// `key=value` arguments → form fields. Anything else is an error.
fn parse_fields(args: &[String]) -> HashMap<String, String> {
    args.iter()
        .map(|arg| match arg.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => (k.trim().to_string(), v.to_string()),
            _ => die(&format!("expected key=value, got {arg:?}")),
        })
        .collect()
}

fn file_part(path: &str) -> multipart::Part {
    let path = Path::new(path);
    let bytes = std::fs::read(path).unwrap_or_else(|e| die(&format!("cannot read {}: {e}", path.display())));
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    multipart::Part::bytes(bytes)
        .file_name(name)
        .mime_str(mime.essence_str())
        .unwrap_or_else(|e| die(&format!("invalid mime type: {e}")))
}

fn cmd_payload(args: &[String]) {
    let Some(kind) = args.first() else {
        die("usage: payload <link|text|wifi|payment|multiLink> [key=value ...]");
    };
    let kind = ContentKind::from_form(kind);
    let form = GenerateForm::from_fields(parse_fields(&args[1..]));
    let config = Config::from_env();
    let password = Some(form.field("encrypt")).filter(|p| !p.is_empty());
    let payload = field_content(kind, &form)
        .and_then(|content| encode_payload(&content, &format_options(&config), password))
        .unwrap_or_else(|e| die(&e.to_string()));
    println!("{payload}");
}

fn cmd_wifi_parse(args: &[String]) {
    let Some(payload) = args.first() else {
        die("usage: wifi-parse <payload>");
    };
    let Some(cred) = parse_wifi(payload) else {
        die("not a WIFI: payload");
    };
    println!("ssid:       {}", cred.ssid);
    println!("encryption: {}", cred.encryption.uri_token());
    println!("password:   {}", cred.password);
}

async fn cmd_generate(client: &reqwest::Client, base_url: &str, args: &[String]) {
    let mut fields: Vec<String> = Vec::new();
    let mut file: Option<String> = None;
    let mut logo: Option<String> = None;
    let mut out: Option<String> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--file" => {
                i += 1;
                file = args.get(i).cloned();
            }
            "--logo" => {
                i += 1;
                logo = args.get(i).cloned();
            }
            "-o" | "--out" => {
                i += 1;
                out = args.get(i).cloned();
            }
            _ => fields.push(args[i].clone()),
        }
        i += 1;
    }
    let Some(out) = out else {
        die("usage: generate [key=value ...] [--file path] [--logo path] -o <out>");
    };

    let mut form = multipart::Form::new();
    for (k, v) in parse_fields(&fields) {
        form = form.text(k, v);
    }
    if let Some(path) = file {
        form = form.part("file", file_part(&path));
    }
    if let Some(path) = logo {
        form = form.part("logo", file_part(&path));
    }

    let resp = client
        .post(format!("{base_url}/generate"))
        .multipart(form)
        .send()
        .await
        .unwrap_or_else(|e| die(&format!("request failed: {e}")));
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        die(&format!("HTTP {status}: {text}"));
    }
    let bytes = resp
        .bytes()
        .await
        .unwrap_or_else(|e| die(&format!("failed to read response: {e}")));
    std::fs::write(&out, &bytes).unwrap_or_else(|e| die(&format!("cannot write {out}: {e}")));
    println!("wrote {} bytes to {out}", bytes.len());
}

async fn fetch_logs(client: &reqwest::Client, url: &str) -> Result<Value, String> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    if status == 401 || status == 403 {
        return Err("unauthorized (token invalid)".to_string());
    }
    if status == 404 {
        return Err("log API disabled (server has no QRGEN_ADMIN_TOKEN)".to_string());
    }
    if !status.is_success() {
        return Err(format!("HTTP {status}: {text}"));
    }
    serde_json::from_str(&text).map_err(|e| format!("invalid json: {e}: {text}"))
}

async fn cmd_logs(client: &reqwest::Client, base_url: &str, args: &[String]) {
    let follow = args.iter().any(|a| a == "-f" || a == "--follow");
    let mut cursor: Option<u64> = None;
    loop {
        let url = match cursor {
            Some(c) => format!("{base_url}/api/logs?cursor={c}&limit=500"),
            None => format!("{base_url}/api/logs?limit=200"),
        };
        let v = fetch_logs(client, &url).await.unwrap_or_else(|e| die(&e));
        if v.get("truncated").and_then(Value::as_bool).unwrap_or(false) {
            eprintln!("... (older lines dropped)");
        }
        for line in v.get("lines").and_then(Value::as_array).into_iter().flatten() {
            if let Some(text) = line.get("line").and_then(Value::as_str) {
                println!("{text}");
            }
        }
        if !follow {
            return;
        }
        cursor = v.get("next_cursor").and_then(Value::as_u64).or(cursor);
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}

fn usage() -> ! {
    eprintln!(
        r#"qrgenctl - qrgen CLI

Usage:
  qrgenctl [--url <base_url>] [--token <token>] <command> [args...]

Config resolution (if omitted):
  - token: --token > QRGEN_ADMIN_TOKEN env
  - url:   --url > QRGEN_URL env > http://127.0.0.1:<QRGEN_PORT|3000>

Offline commands:
  encrypt <password> <text>      Print an encrypted token
  decrypt <password> <token>     Print the plaintext
  payload <type> [key=value ...] Print the QR payload (fields as in /generate,
                                 encrypt=<password> encrypts it)
  wifi-parse <payload>           Decode a WIFI: payload

Server commands:
  generate [key=value ...] [--file path] [--logo path] -o <out>
  logs [-f|--follow]             Tail /api/logs (needs admin token)
"#
    );
    std::process::exit(2);
}

#[tokio::main]
async fn main() {
    let mut args: Vec<String> = std::env::args().collect();
    let _exe = args.remove(0);

    let mut base_url: Option<String> = None;
    let mut token: Option<String> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => usage(),
            "--url" => {
                i += 1;
                base_url = args.get(i).cloned();
            }
            "--token" => {
                i += 1;
                token = args.get(i).cloned();
            }
            _ => break,
        }
        i += 1;
    }

    let args = args[i..].to_vec();
    let Some(command) = args.first() else {
        usage();
    };
    let rest = &args[1..];

    match command.as_str() {
        "encrypt" => {
            let [password, text] = rest else {
                die("usage: encrypt <password> <text>");
            };
            let token = qrgen::cipher::encrypt(text, password).unwrap_or_else(|e| die(&e.to_string()));
            println!("{token}");
        }
        "decrypt" => {
            let [password, token] = rest else {
                die("usage: decrypt <password> <token>");
            };
            let text = qrgen::cipher::decrypt(token.trim(), password).unwrap_or_else(|e| die(&e.to_string()));
            println!("{text}");
        }
        "payload" => cmd_payload(rest),
        "wifi-parse" => cmd_wifi_parse(rest),
        "generate" | "logs" => {
            let base_url = resolve_base_url(base_url);
            let token = resolve_token(token);
            let client = build_client(token.as_deref(), &base_url);
            if command == "generate" {
                cmd_generate(&client, &base_url, rest).await;
            } else {
                cmd_logs(&client, &base_url, rest).await;
            }
        }
        _ => usage(),
    }
}
