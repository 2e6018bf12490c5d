use tracing::{debug, error, info};

use crate::llm::media::{to_data_url, DEFAULT_IMAGE_MIME};
use crate::llm::types::{GenerationResponse, ImageGenerator, ResponseSegment};
use crate::tryon::error::TryOnError;
use crate::tryon::prompt::build_content_segments;
use crate::tryon::types::{OutfitRequest, UserProfile};

/// Data URLs for every inline image of the first candidate, in response order.
pub fn collect_images(response: &GenerationResponse) -> Vec<String> {
    let Some(candidate) = response.first_candidate() else {
        return Vec::new();
    };

    candidate
        .segments
        .iter()
        .filter_map(|segment| match segment {
            ResponseSegment::InlineImage { mime_type, data } => {
                let mime_type = mime_type.as_deref().unwrap_or(DEFAULT_IMAGE_MIME);
                Some(to_data_url(mime_type, data))
            }
            ResponseSegment::Text(_) => None,
        })
        .collect()
}

/// Runs one generation call for `request` and maps the outcome.
///
/// Any number of images from one upwards is a success; three are requested but
/// fewer are accepted.
pub async fn generate_outfit_images(
    generator: &dyn ImageGenerator,
    profile: &UserProfile,
    request: &OutfitRequest,
) -> Result<Vec<String>, TryOnError> {
    profile.validate()?;
    request.validate()?;

    let segments = build_content_segments(profile, request);
    debug!(
        "Requesting try-on images from {} with {} segment(s)",
        generator.model(),
        segments.len()
    );

    let response = generator.generate(segments).await.map_err(|err| {
        error!("Error calling image generation API: {err:#}");
        TryOnError::call_failed(&err)
    })?;

    let images = collect_images(&response);
    if images.is_empty() {
        let model_text = response.text();
        info!(
            "Model {} returned no images (text present: {})",
            generator.model(),
            model_text.is_some()
        );
        return Err(TryOnError::empty_result(model_text.as_deref()));
    }

    Ok(images)
}
