use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use tracing::warn;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_dir: PathBuf,
    pub gemini_api_key: String,
    pub gemini_api_base: String,
    pub gemini_image_model: String,
    pub gemini_safety_settings: String,
    pub gemini_request_timeout_seconds: u64,
    pub output_dir: PathBuf,
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn normalize_gemini_safety_settings(value: String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "permissive".to_string();
    }

    let lowered = trimmed.to_lowercase();
    match lowered.as_str() {
        "permissive" | "off" | "none" => "permissive".to_string(),
        "standard" => "standard".to_string(),
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}'; defaulting to permissive.",
                value
            );
            "permissive".to_string()
        }
    }
}

fn normalize_api_base(value: String) -> String {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_GEMINI_API_BASE.to_string()
    } else {
        trimmed.to_string()
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let gemini_api_key = env_non_empty("GEMINI_API_KEY")
            .or_else(|| env_non_empty("API_KEY"))
            .ok_or_else(|| anyhow!("GEMINI_API_KEY (or API_KEY) must be set"))?;

        Ok(Config {
            log_level: env_string("LOG_LEVEL", "info"),
            log_dir: PathBuf::from(env_string("LOG_DIR", "logs")),
            gemini_api_key,
            gemini_api_base: normalize_api_base(env_string(
                "GEMINI_API_BASE",
                DEFAULT_GEMINI_API_BASE,
            )),
            gemini_image_model: env_non_empty("GEMINI_IMAGE_MODEL")
                .unwrap_or_else(|| DEFAULT_GEMINI_IMAGE_MODEL.to_string()),
            gemini_safety_settings: normalize_gemini_safety_settings(env_string(
                "GEMINI_SAFETY_SETTINGS",
                "permissive",
            )),
            gemini_request_timeout_seconds: env_u64("GEMINI_REQUEST_TIMEOUT_SECONDS", 120).max(1),
            output_dir: PathBuf::from(env_string("OUTPUT_DIR", ".")),
        })
    }
}
