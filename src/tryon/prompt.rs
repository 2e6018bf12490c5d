use crate::llm::media::data_url_payload;
use crate::llm::types::ContentSegment;
use crate::tryon::types::{Background, OutfitRequest, UserProfile};

pub const ROLE_STATEMENT: &str = "You are a virtual try-on fashion assistant.";
pub const OUTFIT_PHOTO_STATEMENT: &str = "The second image provided is the outfit to be worn.";
pub const WHITE_BACKGROUND_CLAUSE: &str =
    "The background of the generated images must be plain white.";
pub const ORIGINAL_BACKGROUND_CLAUSE: &str =
    "Preserve the original background from the user's photo as much as possible.";
pub const VIEWS_INSTRUCTION: &str = "Generate 3 realistic, high-quality virtual try-on images showing the person wearing the outfit from the front, side, and back views.";
pub const IMAGES_ONLY_INSTRUCTION: &str = "Return only the generated images.";

/// Composes the text instruction. Clause order is fixed; optional clauses are
/// skipped when their input is absent.
pub fn compose_instruction(profile: &UserProfile, request: &OutfitRequest) -> String {
    let mut clauses = vec![
        ROLE_STATEMENT.to_string(),
        format!(
            "The first image provided is the person to model the clothes. The person's details are: Age: {}, Height: {} cm, Weight: {} kg.",
            profile.age, profile.height, profile.weight
        ),
    ];

    if request.photo().is_some() {
        clauses.push(OUTFIT_PHOTO_STATEMENT.to_string());
    }

    if let Some(description) = request.description() {
        clauses.push(format!("Outfit Description: {description}."));
    }

    clauses.push(format!("The requested outfit is in size {}.", request.size));

    clauses.push(
        match request.background {
            Background::White => WHITE_BACKGROUND_CLAUSE,
            Background::Original => ORIGINAL_BACKGROUND_CLAUSE,
        }
        .to_string(),
    );

    clauses.push(VIEWS_INSTRUCTION.to_string());
    clauses.push(IMAGES_ONLY_INSTRUCTION.to_string());

    clauses.join(" ")
}

/// Builds the ordered segments: profile photo, optional outfit photo, then the
/// instruction text.
pub fn build_content_segments(profile: &UserProfile, request: &OutfitRequest) -> Vec<ContentSegment> {
    let mut segments = Vec::with_capacity(3);

    segments.push(ContentSegment::InlineImage {
        mime_type: profile.photo_mime_type.clone(),
        data: data_url_payload(&profile.photo).to_string(),
    });

    if let (Some(photo), Some(mime_type)) = (request.photo(), request.photo_mime_type()) {
        segments.push(ContentSegment::InlineImage {
            mime_type: mime_type.to_string(),
            data: data_url_payload(photo).to_string(),
        });
    }

    segments.push(ContentSegment::Text(compose_instruction(profile, request)));
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tryon::types::OutfitSize;

    fn profile() -> UserProfile {
        UserProfile {
            photo: "data:image/png;base64,UFJPRklMRQ==".into(),
            photo_mime_type: "image/png".into(),
            age: 30,
            height: 180,
            weight: 75,
        }
    }

    fn described(background: Background) -> OutfitRequest {
        OutfitRequest {
            description: Some("red dress".into()),
            size: OutfitSize::M,
            background,
            ..Default::default()
        }
    }

    fn photographed() -> OutfitRequest {
        OutfitRequest {
            description: Some(String::new()),
            photo: Some("data:image/jpeg;base64,T1VURklU".into()),
            photo_mime_type: Some("image/jpeg".into()),
            size: OutfitSize::L,
            background: Background::Original,
        }
    }

    fn text_of(segments: &[ContentSegment]) -> &str {
        match segments.last() {
            Some(ContentSegment::Text(text)) => text,
            other => panic!("expected trailing text segment, got {other:?}"),
        }
    }

    #[test]
    fn assembly_is_deterministic() {
        let request = photographed();
        assert_eq!(
            build_content_segments(&profile(), &request),
            build_content_segments(&profile(), &request)
        );
    }

    #[test]
    fn description_request_sends_one_image_then_text() {
        let segments = build_content_segments(&profile(), &described(Background::White));
        assert_eq!(segments.len(), 2);
        assert_eq!(
            segments[0],
            ContentSegment::InlineImage {
                mime_type: "image/png".into(),
                data: "UFJPRklMRQ==".into()
            }
        );

        let text = text_of(&segments);
        assert!(text.contains("red dress"));
        assert!(text.contains("size M"));
        assert!(text.contains("plain white"));
        assert!(text.contains("Age: 30, Height: 180 cm, Weight: 75 kg"));
        assert!(!text.contains(OUTFIT_PHOTO_STATEMENT));
    }

    #[test]
    fn photo_request_sends_profile_then_outfit_photo() {
        let segments = build_content_segments(&profile(), &photographed());
        assert_eq!(segments.len(), 3);
        assert_eq!(segments.iter().filter(|segment| segment.is_image()).count(), 2);
        assert_eq!(
            segments[1],
            ContentSegment::InlineImage {
                mime_type: "image/jpeg".into(),
                data: "T1VURklU".into()
            }
        );

        let text = text_of(&segments);
        assert!(!text.contains("Outfit Description"));
        assert!(text.contains("Preserve the original background"));
        assert!(text.contains(OUTFIT_PHOTO_STATEMENT));
    }

    #[test]
    fn background_clauses_are_mutually_exclusive() {
        let white = compose_instruction(&profile(), &described(Background::White));
        assert!(white.contains(WHITE_BACKGROUND_CLAUSE));
        assert!(!white.contains(ORIGINAL_BACKGROUND_CLAUSE));

        let original = compose_instruction(&profile(), &described(Background::Original));
        assert!(original.contains(ORIGINAL_BACKGROUND_CLAUSE));
        assert!(!original.contains(WHITE_BACKGROUND_CLAUSE));
    }

    #[test]
    fn clauses_follow_fixed_order() {
        let mut request = photographed();
        request.description = Some("linen suit".into());
        let text = compose_instruction(&profile(), &request);

        let positions: Vec<usize> = [
            ROLE_STATEMENT,
            "The first image provided",
            OUTFIT_PHOTO_STATEMENT,
            "Outfit Description: linen suit.",
            "size L",
            ORIGINAL_BACKGROUND_CLAUSE,
            VIEWS_INSTRUCTION,
            IMAGES_ONLY_INSTRUCTION,
        ]
        .iter()
        .map(|clause| text.find(clause).unwrap_or_else(|| panic!("missing {clause}")))
        .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(text.starts_with(ROLE_STATEMENT));
        assert!(text.ends_with(IMAGES_ONLY_INSTRUCTION));
    }
}
