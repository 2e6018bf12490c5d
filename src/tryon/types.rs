use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::llm::media::{data_url_mime, DEFAULT_IMAGE_MIME};
use crate::tryon::error::TryOnError;

/// The person the outfits are rendered on. `photo` is a data URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub photo: String,
    pub photo_mime_type: String,
    pub age: u32,
    pub height: u32,
    pub weight: u32,
}

impl UserProfile {
    pub fn is_complete(&self) -> bool {
        !self.photo.trim().is_empty()
            && !self.photo_mime_type.trim().is_empty()
            && self.age > 0
            && self.height > 0
            && self.weight > 0
    }

    pub fn validate(&self) -> Result<(), TryOnError> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(TryOnError::ProfileIncomplete)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutfitSize {
    XS,
    S,
    #[default]
    M,
    L,
    XL,
    XXL,
}

impl OutfitSize {
    pub const ALL: [OutfitSize; 6] = [
        OutfitSize::XS,
        OutfitSize::S,
        OutfitSize::M,
        OutfitSize::L,
        OutfitSize::XL,
        OutfitSize::XXL,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutfitSize::XS => "XS",
            OutfitSize::S => "S",
            OutfitSize::M => "M",
            OutfitSize::L => "L",
            OutfitSize::XL => "XL",
            OutfitSize::XXL => "XXL",
        }
    }
}

impl fmt::Display for OutfitSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutfitSize {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let upper = value.trim().to_ascii_uppercase();
        OutfitSize::ALL
            .into_iter()
            .find(|size| size.as_str() == upper)
            .ok_or_else(|| format!("Unknown size '{value}' (expected XS, S, M, L, XL or XXL)"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Background {
    #[default]
    Original,
    White,
}

impl fmt::Display for Background {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Background::Original => f.write_str("original"),
            Background::White => f.write_str("white"),
        }
    }
}

impl FromStr for Background {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "original" => Ok(Background::Original),
            "white" => Ok(Background::White),
            _ => Err(format!(
                "Unknown background '{value}' (expected original or white)"
            )),
        }
    }
}

/// What the user asked to try on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutfitRequest {
    pub description: Option<String>,
    pub photo: Option<String>,
    pub photo_mime_type: Option<String>,
    pub size: OutfitSize,
    pub background: Background,
}

impl OutfitRequest {
    /// The description as entered; blank counts as absent.
    pub fn description(&self) -> Option<&str> {
        self.description
            .as_deref()
            .filter(|value| !value.trim().is_empty())
    }

    pub fn photo(&self) -> Option<&str> {
        self.photo
            .as_deref()
            .filter(|value| !value.trim().is_empty())
    }

    /// Declared MIME type of the outfit photo, falling back to the data URL
    /// header and then to PNG.
    pub fn photo_mime_type(&self) -> Option<&str> {
        let photo = self.photo()?;
        let declared = self
            .photo_mime_type
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());
        Some(
            declared
                .or_else(|| data_url_mime(photo))
                .unwrap_or(DEFAULT_IMAGE_MIME),
        )
    }

    pub fn validate(&self) -> Result<(), TryOnError> {
        if self.description().is_none() && self.photo().is_none() {
            return Err(TryOnError::RequestInvalid);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutfitStatus {
    Pending,
    Succeeded { images: Vec<String> },
    Failed { reason: String },
}

impl OutfitStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, OutfitStatus::Pending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            OutfitStatus::Pending => "pending",
            OutfitStatus::Succeeded { .. } => "succeeded",
            OutfitStatus::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutfitRecord {
    pub id: String,
    pub request: OutfitRequest,
    pub status: OutfitStatus,
    pub created_at: DateTime<Utc>,
}

impl OutfitRecord {
    pub fn pending(request: OutfitRequest) -> Self {
        Self {
            id: new_outfit_id(),
            request,
            status: OutfitStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn images(&self) -> &[String] {
        match &self.status {
            OutfitStatus::Succeeded { images } => images,
            _ => &[],
        }
    }
}

/// Millisecond timestamp plus a short random suffix. Unique enough for one
/// session, not collision-proof.
pub fn new_outfit_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect();
    format!("{}-{}", Utc::now().timestamp_millis(), suffix)
}
