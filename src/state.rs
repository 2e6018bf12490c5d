use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::llm::media::{decode_data_url, extension_for_mime};
use crate::llm::types::ImageGenerator;
use crate::tryon::orchestrator::generate_outfit_images;
use crate::tryon::{
    OutfitCollection, OutfitRecord, OutfitRequest, OutfitStatus, ProfileStore, TryOnError,
    UserProfile,
};
use crate::utils::timing::log_outfit_resolution;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutfitEvent {
    Resolved { id: String, status: OutfitStatus },
}

/// Counts one outstanding generation for as long as it lives.
struct BusyGuard(Arc<AtomicUsize>);

impl BusyGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        BusyGuard(counter)
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Session state: the profile, the outfit records and the generations still
/// running for them.
#[derive(Clone)]
pub struct AppState {
    generator: Arc<dyn ImageGenerator>,
    profile: Arc<Mutex<ProfileStore>>,
    outfits: Arc<Mutex<OutfitCollection>>,
    busy: Arc<AtomicUsize>,
    events: broadcast::Sender<OutfitEvent>,
}

impl AppState {
    pub fn new(generator: Arc<dyn ImageGenerator>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        AppState {
            generator,
            profile: Arc::new(Mutex::new(ProfileStore::new())),
            outfits: Arc::new(Mutex::new(OutfitCollection::new())),
            busy: Arc::new(AtomicUsize::new(0)),
            events,
        }
    }

    pub fn set_profile(&self, profile: UserProfile) {
        self.profile.lock().set(profile);
        info!("Profile updated");
    }

    pub fn clear_profile(&self) -> Option<UserProfile> {
        self.profile.lock().clear()
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.profile.lock().get().cloned()
    }

    pub fn outfits(&self) -> Vec<OutfitRecord> {
        self.outfits.lock().records().to_vec()
    }

    pub fn outfit(&self, id: &str) -> Option<OutfitRecord> {
        self.outfits.lock().get(id).cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.outfits.lock().pending_count()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight_count() > 0
    }

    pub fn in_flight_count(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutfitEvent> {
        self.events.subscribe()
    }

    /// Validates the request, records it as pending and starts generation in
    /// the background. Returns the new record's id. Must be called from within
    /// a tokio runtime.
    pub fn submit(&self, request: OutfitRequest) -> Result<String, TryOnError> {
        let profile = self.profile().ok_or(TryOnError::ProfileIncomplete)?;
        profile.validate()?;
        request.validate()?;

        let record = OutfitRecord::pending(request.clone());
        let id = record.id.clone();
        self.outfits.lock().insert_front(record);
        info!(
            "Outfit {} submitted (size={}, background={}, photo={}, description={})",
            id,
            request.size,
            request.background,
            request.photo().is_some(),
            request.description().is_some()
        );

        let guard = BusyGuard::new(self.busy.clone());
        let generator = self.generator.clone();
        let work = tokio::spawn(async move {
            generate_outfit_images(generator.as_ref(), &profile, &request).await
        });

        let state = self.clone();
        let outfit_id = id.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let started = Instant::now();
            let outcome = work.await;

            let status = match outcome {
                Ok(Ok(images)) => OutfitStatus::Succeeded { images },
                Ok(Err(err)) => OutfitStatus::Failed {
                    reason: err.to_string(),
                },
                Err(join_err) if join_err.is_cancelled() => {
                    debug!("Generation for outfit {} stopped with the runtime", outfit_id);
                    return;
                }
                Err(join_err) => {
                    error!("Generation task for outfit {} panicked: {}", outfit_id, join_err);
                    OutfitStatus::Failed {
                        reason: TryOnError::GenerationFailed(None).to_string(),
                    }
                }
            };

            state.apply_resolution(&outfit_id, status, started.elapsed().as_secs_f64());
        });

        Ok(id)
    }

    fn apply_resolution(&self, id: &str, status: OutfitStatus, duration_s: f64) {
        let label = status.label();
        let image_count = match &status {
            OutfitStatus::Succeeded { images } => images.len(),
            _ => 0,
        };

        if !self.outfits.lock().resolve(id, status.clone()) {
            debug!("Discarding late result for removed outfit {}", id);
            return;
        }

        log_outfit_resolution(id, label, image_count, duration_s);
        if let OutfitStatus::Failed { reason } = &status {
            info!("Outfit {} failed: {}", id, reason);
        }
        // No subscribers is fine.
        let _ = self.events.send(OutfitEvent::Resolved {
            id: id.to_string(),
            status,
        });
    }

    /// Deletes the record in any state. A generation still running for it
    /// carries on, and its result is dropped when it arrives.
    pub fn remove(&self, id: &str) -> Option<OutfitRecord> {
        let removed = self.outfits.lock().remove(id)?;
        if removed.status.is_pending() {
            debug!("Outfit {} removed while its generation is still running", id);
        }
        Some(removed)
    }

    /// Writes image `position` (1-based) of a finished outfit into `dir`.
    pub async fn save_image(&self, id: &str, position: usize, dir: &Path) -> anyhow::Result<PathBuf> {
        let record = self
            .outfit(id)
            .ok_or_else(|| anyhow!("No outfit with id {id}"))?;
        let images = record.images();
        if images.is_empty() {
            return Err(anyhow!(
                "Outfit {id} has no images ({})",
                record.status.label()
            ));
        }
        let image = position
            .checked_sub(1)
            .and_then(|index| images.get(index))
            .ok_or_else(|| anyhow!("Outfit {id} has {} image(s); got {position}", images.len()))?;

        let (mime_type, bytes) = decode_data_url(image)?;
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(format!(
            "virtual-try-on-{}.{}",
            position,
            extension_for_mime(&mime_type)
        ));
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Saved image {} of outfit {} to {}", position, id, path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{
        ContentSegment, GenerationCandidate, GenerationResponse, ResponseSegment,
    };
    use crate::tryon::error::UNKNOWN_GENERATION_FAILURE;
    use crate::tryon::{Background, OutfitSize};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use base64::{engine::general_purpose, Engine as _};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Returns `images` inline images unless the prompt mentions "cursed".
    struct MockGenerator {
        images: usize,
        gate: Option<Arc<Semaphore>>,
        calls: Mutex<Vec<Vec<ContentSegment>>>,
        finished: AtomicUsize,
    }

    impl MockGenerator {
        fn new(images: usize) -> Self {
            Self {
                images,
                gate: None,
                calls: Mutex::new(Vec::new()),
                finished: AtomicUsize::new(0),
            }
        }

        fn gated(images: usize, gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(images)
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }

        fn finished_count(&self) -> usize {
            self.finished.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ImageGenerator for MockGenerator {
        fn model(&self) -> &str {
            "mock-image"
        }

        async fn generate(
            &self,
            segments: Vec<ContentSegment>,
        ) -> anyhow::Result<GenerationResponse> {
            let cursed = segments
                .iter()
                .any(|segment| matches!(segment, ContentSegment::Text(text) if text.contains("cursed")));
            self.calls.lock().push(segments);

            if let Some(gate) = &self.gate {
                gate.acquire().await?.forget();
            }
            self.finished.fetch_add(1, Ordering::SeqCst);
            if cursed {
                return Err(anyhow!("upstream rejected the request"));
            }

            let segments = (0..self.images)
                .map(|index| ResponseSegment::InlineImage {
                    mime_type: Some("image/png".into()),
                    data: mock_image(index),
                })
                .chain(std::iter::once(ResponseSegment::Text("policy violation".into())))
                .collect();
            Ok(GenerationResponse {
                candidates: vec![GenerationCandidate { segments }],
            })
        }
    }

    fn mock_image(index: usize) -> String {
        general_purpose::STANDARD.encode(format!("img{index}"))
    }

    struct PanickingGenerator;

    #[async_trait]
    impl ImageGenerator for PanickingGenerator {
        fn model(&self) -> &str {
            "panicking"
        }

        async fn generate(&self, _segments: Vec<ContentSegment>) -> anyhow::Result<GenerationResponse> {
            panic!("generator exploded");
        }
    }

    fn profile() -> UserProfile {
        UserProfile {
            photo: "data:image/png;base64,UFJPRklMRQ==".into(),
            photo_mime_type: "image/png".into(),
            age: 30,
            height: 180,
            weight: 75,
        }
    }

    fn red_dress() -> OutfitRequest {
        OutfitRequest {
            description: Some("red dress".into()),
            size: OutfitSize::M,
            background: Background::White,
            ..Default::default()
        }
    }

    fn state_with(generator: Arc<MockGenerator>) -> AppState {
        let state = AppState::new(generator);
        state.set_profile(profile());
        state
    }

    /// Waits until no more than `remaining` generations are outstanding.
    async fn wait_for_in_flight(state: &AppState, remaining: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while state.in_flight_count() > remaining {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    async fn settle(state: &AppState) {
        wait_for_in_flight(state, 0).await;
    }

    #[tokio::test]
    async fn end_to_end_success_keeps_image_order() {
        let generator = Arc::new(MockGenerator::new(3));
        let state = state_with(generator.clone());

        let id = state.submit(red_dress()).unwrap();
        assert!(state.outfit(&id).unwrap().status.is_pending());
        settle(&state).await;

        assert_eq!(generator.call_count(), 1);
        {
            let calls = generator.calls.lock();
            let segments = &calls[0];
            assert_eq!(segments.len(), 2);
            assert!(segments[0].is_image());
            let ContentSegment::Text(text) = &segments[1] else {
                panic!("expected text segment last");
            };
            assert!(text.contains("red dress"));
            assert!(text.contains("size M"));
            assert!(text.contains("plain white"));
        }

        let record = state.outfit(&id).unwrap();
        let expected: Vec<String> = (0..3)
            .map(|index| format!("data:image/png;base64,{}", mock_image(index)))
            .collect();
        assert_eq!(record.images(), expected.as_slice());
        assert!(!state.is_busy());
    }

    #[tokio::test]
    async fn photo_only_request_sends_both_images_before_text() {
        let generator = Arc::new(MockGenerator::new(1));
        let state = state_with(generator.clone());

        let id = state
            .submit(OutfitRequest {
                description: Some(String::new()),
                photo: Some("data:image/jpeg;base64,T1VURklU".into()),
                photo_mime_type: Some("image/jpeg".into()),
                ..Default::default()
            })
            .unwrap();
        settle(&state).await;

        let calls = generator.calls.lock();
        let segments = &calls[0];
        assert_eq!(segments.len(), 3);
        assert!(segments[0].is_image());
        assert!(segments[1].is_image());
        assert!(matches!(segments[2], ContentSegment::Text(_)));
        drop(calls);
        assert_eq!(state.outfit(&id).unwrap().images().len(), 1);
    }

    #[tokio::test]
    async fn empty_result_records_model_text() {
        let state = state_with(Arc::new(MockGenerator::new(0)));
        let id = state.submit(red_dress()).unwrap();
        settle(&state).await;

        match state.outfit(&id).unwrap().status {
            OutfitStatus::Failed { reason } => assert!(reason.contains("policy violation")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_submissions_create_nothing() {
        let generator = Arc::new(MockGenerator::new(3));
        let state = AppState::new(generator.clone());

        assert_eq!(
            state.submit(red_dress()).unwrap_err(),
            TryOnError::ProfileIncomplete
        );

        let mut partial = profile();
        partial.photo.clear();
        state.set_profile(partial);
        assert_eq!(
            state.submit(red_dress()).unwrap_err(),
            TryOnError::ProfileIncomplete
        );

        state.set_profile(profile());
        let blank = OutfitRequest {
            description: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(state.submit(blank).unwrap_err(), TryOnError::RequestInvalid);

        tokio::task::yield_now().await;
        assert!(state.outfits().is_empty());
        assert_eq!(generator.call_count(), 0);
        assert!(!state.is_busy());
    }

    #[tokio::test]
    async fn one_failure_does_not_affect_other_records() {
        let state = state_with(Arc::new(MockGenerator::new(2)));
        let good = state.submit(red_dress()).unwrap();
        let bad = state
            .submit(OutfitRequest {
                description: Some("cursed cape".into()),
                ..Default::default()
            })
            .unwrap();
        settle(&state).await;

        let outfits = state.outfits();
        assert_eq!(outfits.len(), 2);
        assert_eq!(outfits[0].id, bad);
        match &outfits[0].status {
            OutfitStatus::Failed { reason } => {
                assert_eq!(reason, "Image generation failed: upstream rejected the request")
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(outfits[1].id, good);
        assert_eq!(outfits[1].images().len(), 2);
    }

    #[tokio::test]
    async fn panics_become_unknown_failures() {
        let state = AppState::new(Arc::new(PanickingGenerator));
        state.set_profile(profile());

        let id = state.submit(red_dress()).unwrap();
        settle(&state).await;

        assert_eq!(
            state.outfit(&id).unwrap().status,
            OutfitStatus::Failed {
                reason: UNKNOWN_GENERATION_FAILURE.to_string()
            }
        );
        assert!(!state.is_busy());
    }

    #[tokio::test]
    async fn removed_record_stays_removed() {
        let gate = Arc::new(Semaphore::new(0));
        let state = state_with(Arc::new(MockGenerator::gated(3, gate.clone())));

        let keep = state.submit(red_dress()).unwrap();
        let drop_me = state.submit(red_dress()).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(state.outfits().len(), 2);

        assert!(state.remove(&drop_me).is_some());
        assert_eq!(state.outfits().len(), 1);

        gate.add_permits(2);
        settle(&state).await;

        let outfits = state.outfits();
        assert_eq!(outfits.len(), 1);
        assert_eq!(outfits[0].id, keep);
        assert_eq!(outfits[0].images().len(), 3);
        assert!(state.outfit(&drop_me).is_none());
        assert!(!state.is_busy());
    }

    #[tokio::test]
    async fn remove_lets_the_running_call_finish() {
        let gate = Arc::new(Semaphore::new(0));
        let generator = Arc::new(MockGenerator::gated(2, gate.clone()));
        let state = state_with(generator.clone());
        let mut events = state.subscribe();

        let id = state.submit(red_dress()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while generator.call_count() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert!(state.remove(&id).is_some());
        assert!(state.is_busy());
        assert_eq!(generator.finished_count(), 0);

        gate.add_permits(1);
        settle(&state).await;

        assert_eq!(generator.finished_count(), 1);
        assert!(state.outfit(&id).is_none());
        assert!(state.outfits().is_empty());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn busy_until_last_generation_resolves() {
        let gate = Arc::new(Semaphore::new(0));
        let state = state_with(Arc::new(MockGenerator::gated(1, gate.clone())));

        state.submit(red_dress()).unwrap();
        state.submit(red_dress()).unwrap();
        assert!(state.is_busy());
        assert_eq!(state.in_flight_count(), 2);

        gate.add_permits(1);
        wait_for_in_flight(&state, 1).await;
        assert!(state.is_busy());
        assert_eq!(state.pending_count(), 1);

        gate.add_permits(1);
        settle(&state).await;
        assert!(!state.is_busy());
        assert_eq!(state.pending_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_see_resolutions() {
        let state = state_with(Arc::new(MockGenerator::new(1)));
        let mut events = state.subscribe();

        let submitted = state.submit(red_dress()).unwrap();
        settle(&state).await;

        let OutfitEvent::Resolved { id, status } = events.recv().await.unwrap();
        assert_eq!(id, submitted);
        assert_eq!(status.label(), "succeeded");
    }

    #[tokio::test]
    async fn clearing_profile_blocks_new_submissions() {
        let state = state_with(Arc::new(MockGenerator::new(1)));
        assert!(state.clear_profile().is_some());
        assert!(state.profile().is_none());
        assert_eq!(
            state.submit(red_dress()).unwrap_err(),
            TryOnError::ProfileIncomplete
        );
    }

    #[tokio::test]
    async fn save_image_writes_decoded_bytes() {
        let state = state_with(Arc::new(MockGenerator::new(2)));
        let id = state.submit(red_dress()).unwrap();
        settle(&state).await;

        let dir = tempfile::tempdir().unwrap();
        let path = state.save_image(&id, 2, dir.path()).await.unwrap();
        assert_eq!(path.file_name().unwrap(), "virtual-try-on-2.png");
        assert_eq!(std::fs::read(&path).unwrap(), b"img1");

        assert!(state.save_image(&id, 0, dir.path()).await.is_err());
        assert!(state.save_image(&id, 3, dir.path()).await.is_err());
        assert!(state.save_image("missing", 1, dir.path()).await.is_err());
    }
}
