use async_trait::async_trait;

/// One unit of a multimodal message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSegment {
    /// Base64 payload tagged with its MIME type.
    InlineImage { mime_type: String, data: String },
    Text(String),
}

impl ContentSegment {
    pub fn is_image(&self) -> bool {
        matches!(self, ContentSegment::InlineImage { .. })
    }
}

/// A segment returned by the model. The MIME type is optional because the
/// service does not always declare it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSegment {
    InlineImage {
        mime_type: Option<String>,
        data: String,
    },
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationCandidate {
    pub segments: Vec<ResponseSegment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationResponse {
    pub candidates: Vec<GenerationCandidate>,
}

impl GenerationResponse {
    pub fn first_candidate(&self) -> Option<&GenerationCandidate> {
        self.candidates.first()
    }

    /// Concatenated text of the first candidate, `None` when it carries no text.
    pub fn text(&self) -> Option<String> {
        let candidate = self.first_candidate()?;
        let text: String = candidate
            .segments
            .iter()
            .filter_map(|segment| match segment {
                ResponseSegment::Text(text) => Some(text.as_str()),
                ResponseSegment::InlineImage { .. } => None,
            })
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// The external image-generation capability.
///
/// Implementations must request both image and text response modalities and
/// send the segments in the order given.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    fn model(&self) -> &str;

    async fn generate(&self, segments: Vec<ContentSegment>) -> anyhow::Result<GenerationResponse>;
}
