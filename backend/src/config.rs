use std::path::PathBuf;
use std::str::FromStr;

use qrcode::EcLevel;
use tracing::warn;

use crate::content::MultiLinkMode;
use crate::render::Color;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_INLINE_FILE_LIMIT: usize = 2 * 1024;
pub const DEFAULT_FILES_MAX_BYTES: u64 = 512 * 1024 * 1024;
pub const DEFAULT_QR_WIDTH: u32 = 300;
pub const DEFAULT_LOG_LINES: usize = 5000;

/// Every field can be overridden through a `QRGEN_*` environment variable.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub public_base_url: String,
    pub static_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub files_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub inline_file_limit: usize,
    pub files_max_bytes: u64,
    pub default_foreground: Color,
    pub default_background: Color,
    pub qr_width: u32,
    pub ec_level: EcLevel,
    pub multi_link_mode: MultiLinkMode,
    pub admin_token: Option<String>,
    pub log_lines: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            public_base_url: format!("http://127.0.0.1:{DEFAULT_PORT}"),
            static_dir: PathBuf::from("public"),
            upload_dir: PathBuf::from("data/uploads"),
            files_dir: PathBuf::from("data/files"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            inline_file_limit: DEFAULT_INLINE_FILE_LIMIT,
            files_max_bytes: DEFAULT_FILES_MAX_BYTES,
            default_foreground: Color::BLACK,
            default_background: Color::WHITE,
            qr_width: DEFAULT_QR_WIDTH,
            ec_level: EcLevel::H,
            multi_link_mode: MultiLinkMode::Joined,
            admin_token: None,
            log_lines: DEFAULT_LOG_LINES,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T, warnings: &mut Vec<String>) -> T {
    match raw {
        None => default,
        Some(raw) => match raw.parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warnings.push(format!("Ignoring invalid {key}={raw:?}, using default"));
                default
            }
        },
    }
}

pub fn parse_ec_level(raw: &str) -> Option<EcLevel> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "L" | "LOW" => Some(EcLevel::L),
        "M" | "MEDIUM" => Some(EcLevel::M),
        "Q" | "QUARTILE" => Some(EcLevel::Q),
        "H" | "HIGH" => Some(EcLevel::H),
        _ => None,
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Config::from_env`], but hands back the warnings instead of logging
    /// them, for callers that read the config before tracing is up.
    pub fn from_env_deferred() -> (Self, Vec<String>) {
        Self::load(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let (config, warnings) = Self::load(lookup);
        for w in warnings {
            warn!("{}", w);
        }
        config
    }

    pub fn load(lookup: impl Fn(&str) -> Option<String>) -> (Self, Vec<String>) {
        let get = |key: &str| non_empty(lookup(key));
        let defaults = Config::default();
        let mut warnings: Vec<String> = Vec::new();

        let port = parse_or("QRGEN_PORT", get("QRGEN_PORT"), defaults.port, &mut warnings);
        let public_base_url = get("QRGEN_PUBLIC_BASE_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://127.0.0.1:{port}"));

        let mut color = |key: &str, default: Color| match get(key) {
            None => default,
            Some(raw) => Color::parse(&raw).unwrap_or_else(|| {
                warnings.push(format!("Ignoring invalid {key}={raw:?}, using default"));
                default
            }),
        };
        let default_foreground = color("QRGEN_DEFAULT_FG", defaults.default_foreground);
        let default_background = color("QRGEN_DEFAULT_BG", defaults.default_background);

        let ec_level = match get("QRGEN_EC_LEVEL") {
            None => defaults.ec_level,
            Some(raw) => parse_ec_level(&raw).unwrap_or_else(|| {
                warnings.push(format!("Ignoring invalid QRGEN_EC_LEVEL={raw:?}, using H"));
                defaults.ec_level
            }),
        };

        let multi_link_mode = match get("QRGEN_MULTILINK_MODE") {
            None => defaults.multi_link_mode,
            Some(raw) => MultiLinkMode::parse(&raw).unwrap_or_else(|| {
                warnings.push(format!("Ignoring invalid QRGEN_MULTILINK_MODE={raw:?}"));
                defaults.multi_link_mode
            }),
        };

        let qr_width = parse_or("QRGEN_QR_WIDTH", get("QRGEN_QR_WIDTH"), defaults.qr_width, &mut warnings)
            .clamp(64, 4096);

        let config = Self {
            host: get("QRGEN_HOST").unwrap_or(defaults.host),
            port,
            public_base_url,
            static_dir: get("QRGEN_STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
            upload_dir: get("QRGEN_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            files_dir: get("QRGEN_FILES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.files_dir),
            max_upload_bytes: parse_or(
                "QRGEN_MAX_UPLOAD_BYTES",
                get("QRGEN_MAX_UPLOAD_BYTES"),
                defaults.max_upload_bytes,
                &mut warnings,
            ),
            inline_file_limit: parse_or(
                "QRGEN_INLINE_FILE_LIMIT",
                get("QRGEN_INLINE_FILE_LIMIT"),
                defaults.inline_file_limit,
                &mut warnings,
            ),
            files_max_bytes: parse_or(
                "QRGEN_FILES_MAX_BYTES",
                get("QRGEN_FILES_MAX_BYTES"),
                defaults.files_max_bytes,
                &mut warnings,
            ),
            default_foreground,
            default_background,
            qr_width,
            ec_level,
            multi_link_mode,
            admin_token: get("QRGEN_ADMIN_TOKEN"),
            log_lines: parse_or(
                "QRGEN_LOG_LINES",
                get("QRGEN_LOG_LINES"),
                defaults.log_lines,
                &mut warnings,
            ),
        };
        (config, warnings)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let cfg = config_from(&[]);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.max_upload_bytes, 5 * 1024 * 1024);
        assert_eq!(cfg.inline_file_limit, 2048);
        assert_eq!(cfg.files_max_bytes, DEFAULT_FILES_MAX_BYTES);
        assert_eq!(cfg.ec_level, EcLevel::H);
        assert_eq!(cfg.public_base_url, "http://127.0.0.1:3000");
        assert!(cfg.admin_token.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = config_from(&[
            ("QRGEN_PORT", "8080"),
            ("QRGEN_PUBLIC_BASE_URL", "https://qr.example.com/"),
            ("QRGEN_EC_LEVEL", "m"),
            ("QRGEN_DEFAULT_FG", "#123456"),
            ("QRGEN_MULTILINK_MODE", "viewer"),
            ("QRGEN_ADMIN_TOKEN", "  s3cret  "),
            ("QRGEN_FILES_MAX_BYTES", "1048576"),
        ]);
        assert_eq!(cfg.files_max_bytes, 1_048_576);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.public_base_url, "https://qr.example.com");
        assert_eq!(cfg.ec_level, EcLevel::M);
        assert_eq!(cfg.default_foreground, Color::new(0x12, 0x34, 0x56));
        assert_eq!(cfg.multi_link_mode, MultiLinkMode::Viewer);
        assert_eq!(cfg.admin_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn invalid_values_fall_back() {
        let cfg = config_from(&[
            ("QRGEN_PORT", "not-a-port"),
            ("QRGEN_EC_LEVEL", "X"),
            ("QRGEN_DEFAULT_BG", "blue"),
            ("QRGEN_QR_WIDTH", "10"),
        ]);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.ec_level, EcLevel::H);
        assert_eq!(cfg.default_background, Color::WHITE);
        assert_eq!(cfg.qr_width, 64);
    }

    #[test]
    fn load_collects_warnings_without_logging() {
        let map: HashMap<&str, &str> = [("QRGEN_LOG_LINES", "lots"), ("QRGEN_DEFAULT_FG", "blue")]
            .into_iter()
            .collect();
        let (cfg, warnings) = Config::load(|key| map.get(key).map(|v| v.to_string()));
        assert_eq!(cfg.log_lines, DEFAULT_LOG_LINES);
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.contains("QRGEN_LOG_LINES")));

        let (cfg, warnings) = Config::load(|key| (key == "QRGEN_LOG_LINES").then(|| "250".to_string()));
        assert_eq!(cfg.log_lines, 250);
        assert!(warnings.is_empty());
    }
}
