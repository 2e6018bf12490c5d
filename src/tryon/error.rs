pub const UNKNOWN_GENERATION_FAILURE: &str = "An unknown error occurred during image generation.";

pub const NO_IMAGES_RETURNED: &str = "The AI model did not return any images. This might be due to a content policy or an issue with the request.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TryOnError {
    #[error("Please save a complete profile (photo, age, height, weight) before generating outfits.")]
    ProfileIncomplete,
    #[error("Please provide an outfit description or upload a photo.")]
    RequestInvalid,
    #[error("Image generation failed: {0}")]
    GenerationEmpty(String),
    #[error("{}", generation_failed_message(.0))]
    GenerationFailed(Option<String>),
}

fn generation_failed_message(detail: &Option<String>) -> String {
    match detail {
        Some(detail) => format!("Image generation failed: {detail}"),
        None => UNKNOWN_GENERATION_FAILURE.to_string(),
    }
}

impl TryOnError {
    /// Builds the empty-result error, appending the model's own explanation when present.
    pub fn empty_result(model_text: Option<&str>) -> Self {
        let mut reason = NO_IMAGES_RETURNED.to_string();
        if let Some(text) = model_text.map(str::trim).filter(|text| !text.is_empty()) {
            reason.push_str(&format!(" Model response: \"{text}\""));
        }
        TryOnError::GenerationEmpty(reason)
    }

    pub fn call_failed(err: &anyhow::Error) -> Self {
        let message = err.to_string();
        if message.trim().is_empty() {
            TryOnError::GenerationFailed(None)
        } else {
            TryOnError::GenerationFailed(Some(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn empty_result_appends_trimmed_model_text() {
        let err = TryOnError::empty_result(Some("  policy violation \n"));
        let message = err.to_string();
        assert!(message.starts_with("Image generation failed: The AI model did not return any images."));
        assert!(message.ends_with("Model response: \"policy violation\""));
    }

    #[test]
    fn empty_result_without_text_has_no_model_clause() {
        let message = TryOnError::empty_result(Some("   ")).to_string();
        assert!(!message.contains("Model response"));
    }

    #[test]
    fn call_failures_wrap_message_or_fall_back() {
        let err = TryOnError::call_failed(&anyhow!("connection reset"));
        assert_eq!(err.to_string(), "Image generation failed: connection reset");
        assert_eq!(
            TryOnError::GenerationFailed(None).to_string(),
            UNKNOWN_GENERATION_FAILURE
        );
    }
}
