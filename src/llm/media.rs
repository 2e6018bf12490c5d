use std::path::Path;

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use tracing::debug;

pub const DEFAULT_IMAGE_MIME: &str = "image/png";

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    if data.len() > 12 {
        let ftyp = &data[4..12];
        if ftyp.starts_with(b"ftyp") {
            let brand = &ftyp[4..8];
            if brand == b"heic" || brand == b"heif" || brand == b"hevc" {
                return Some("image/heic".to_string());
            }
        }
    }

    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" | "image/heif" => "heic",
        _ => "png",
    }
}

pub fn to_data_url(mime_type: &str, base64_data: &str) -> String {
    format!("data:{mime_type};base64,{base64_data}")
}

/// The base64 portion of a data URL; empty when the value has no comma.
pub fn data_url_payload(data_url: &str) -> &str {
    match data_url.split_once(',') {
        Some((_, payload)) => payload,
        None => "",
    }
}

/// MIME type declared in the data URL header, if any.
pub fn data_url_mime(data_url: &str) -> Option<&str> {
    let (header, _) = data_url.split_once(',')?;
    let header = header.strip_prefix("data:")?;
    let mime = header.split(';').next()?.trim();
    if mime.is_empty() {
        None
    } else {
        Some(mime)
    }
}

pub fn decode_data_url(data_url: &str) -> Result<(String, Vec<u8>)> {
    if !data_url.starts_with("data:") || !data_url.contains(',') {
        return Err(anyhow!("Value is not a data URL"));
    }
    let mime_type = data_url_mime(data_url)
        .unwrap_or(DEFAULT_IMAGE_MIME)
        .to_string();
    let bytes = general_purpose::STANDARD
        .decode(data_url_payload(data_url).trim())
        .context("Data URL payload is not valid base64")?;
    Ok((mime_type, bytes))
}

/// Reads a local image and returns it as `(data_url, mime_type)`.
pub async fn file_to_data_url(path: &Path) -> Result<(String, String)> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if bytes.is_empty() {
        return Err(anyhow!("{} is empty", path.display()));
    }

    let mime_type = detect_mime_type(&bytes)
        .ok_or_else(|| anyhow!("Could not detect the file type of {}", path.display()))?;
    if !mime_type.starts_with("image/") {
        return Err(anyhow!(
            "{} is not an image (detected {})",
            path.display(),
            mime_type
        ));
    }

    debug!(
        "Loaded {} ({} bytes, {})",
        path.display(),
        bytes.len(),
        mime_type
    );
    let encoded = general_purpose::STANDARD.encode(&bytes);
    Ok((to_data_url(&mime_type, &encoded), mime_type))
}
