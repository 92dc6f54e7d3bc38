use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{BottleRecord, ImagePayload, Inventory, InventoryEntry, ScanMode, MULTI_ANGLE_STEPS};
use crate::services::{AnalysisError, BottleAnalyzer, ConnectivityMonitor};

/// Everything the shell tracks for one session; nothing outlives the process.
#[derive(Debug, Default)]
pub struct AppState {
    pub mode: ScanMode,
    pub single_image: Option<ImagePayload>,
    pub multi_images: Vec<ImagePayload>,
    pub scan_step: usize,
    pub current_results: Vec<BottleRecord>,
    pub inventory: Inventory,
    pub last_error: Option<String>,
    pub analyzing: bool,
    /// Bumped on reset so results from a superseded request can be dropped
    pub generation: u64,
}

impl AppState {
    /// Images that the next analysis would send, in capture order
    pub fn pending_images(&self) -> Vec<ImagePayload> {
        match self.mode {
            ScanMode::Single => self.single_image.iter().cloned().collect(),
            ScanMode::MultiAngle => self.multi_images.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// Single-shot image set (any previous image was replaced)
    Replaced,
    /// Multi-angle image stored; `step` is the number captured so far
    AngleCaptured { step: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzeOutcome {
    NothingToAnalyze,
    /// Multi-angle scan has not captured every angle yet
    ScanIncomplete { captured: usize },
    Busy,
    Completed(Vec<BottleRecord>),
    Failed(AnalysisError),
    /// The session was reset while the request was in flight
    Discarded,
}

#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub mode: ScanMode,
    pub scan_step: usize,
    pub has_image: bool,
    pub analyzing: bool,
    pub online: bool,
    pub result_count: usize,
    pub inventory_count: usize,
    pub total_pours: f64,
    pub last_error: Option<String>,
}

pub struct ScanSession {
    analyzer: Arc<dyn BottleAnalyzer>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    state: Mutex<AppState>,
}

impl ScanSession {
    pub fn new(analyzer: Arc<dyn BottleAnalyzer>, connectivity: Arc<dyn ConnectivityMonitor>) -> Self {
        Self {
            analyzer,
            connectivity,
            state: Mutex::new(AppState::default()),
        }
    }

    pub async fn capture(&self, image: ImagePayload) -> Result<CaptureOutcome> {
        let mut state = self.state.lock().await;

        match state.mode {
            ScanMode::Single => {
                state.single_image = Some(image);
                state.current_results.clear();
                state.last_error = None;
                log::info!("📸 Image captured ({} bytes encoded)", state.single_image.as_ref().map_or(0, ImagePayload::encoded_len));
                Ok(CaptureOutcome::Replaced)
            }
            ScanMode::MultiAngle => {
                if state.multi_images.len() >= MULTI_ANGLE_STEPS {
                    anyhow::bail!("All {} angles are already captured", MULTI_ANGLE_STEPS);
                }
                state.multi_images.push(image);
                state.scan_step += 1;
                log::info!("📸 Angle {}/{} captured", state.scan_step, MULTI_ANGLE_STEPS);
                Ok(CaptureOutcome::AngleCaptured {
                    step: state.scan_step,
                })
            }
        }
    }

    pub async fn start_multi_angle(&self) {
        let mut state = self.state.lock().await;
        state.mode = ScanMode::MultiAngle;
        state.scan_step = 0;
        state.multi_images.clear();
        state.single_image = None;
        state.current_results.clear();
        log::info!("🔄 360° scan started");
    }

    pub async fn cancel_multi_angle(&self) {
        let mut state = self.state.lock().await;
        state.mode = ScanMode::Single;
        state.scan_step = 0;
        state.multi_images.clear();
        log::info!("↩️ 360° scan cancelled");
    }

    /// Starts over with a fresh capture; the inventory is kept.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.mode = ScanMode::Single;
        state.single_image = None;
        state.multi_images.clear();
        state.scan_step = 0;
        state.current_results.clear();
        state.last_error = None;
        state.generation += 1;
        log::debug!("🧹 Session reset (generation {})", state.generation);
    }

    pub async fn analyze(&self) -> AnalyzeOutcome {
        let (images, generation) = {
            let mut state = self.state.lock().await;
            if state.analyzing {
                log::warn!("⏳ Analysis already in progress, ignoring request");
                return AnalyzeOutcome::Busy;
            }

            let images = state.pending_images();
            if images.is_empty() {
                return AnalyzeOutcome::NothingToAnalyze;
            }
            if state.mode == ScanMode::MultiAngle && images.len() < MULTI_ANGLE_STEPS {
                return AnalyzeOutcome::ScanIncomplete {
                    captured: images.len(),
                };
            }

            state.analyzing = true;
            state.last_error = None;
            (images, state.generation)
        };

        let result = if !self.connectivity.is_online().await {
            Err(AnalysisError::Offline)
        } else if let [image] = images.as_slice() {
            self.analyzer.analyze_image(image.clone()).await
        } else {
            self.analyzer.analyze(&images).await
        };

        let mut state = self.state.lock().await;
        state.analyzing = false;

        if state.generation != generation {
            log::info!("🗑️ Discarding analysis result for a session that was reset");
            return AnalyzeOutcome::Discarded;
        }

        match result {
            Ok(records) => {
                state.current_results = records.clone();
                AnalyzeOutcome::Completed(records)
            }
            Err(e) => {
                match &e {
                    AnalysisError::Offline => log::warn!("📴 Analysis blocked: offline"),
                    other => log::error!("❌ Bottle analysis failed: {}", other),
                }
                state.current_results.clear();
                state.last_error = Some(e.user_message().to_string());
                AnalyzeOutcome::Failed(e)
            }
        }
    }

    /// Adds the displayed result at `index` (0-based) to the inventory.
    pub async fn add_to_inventory(&self, index: usize) -> Result<InventoryEntry> {
        let mut state = self.state.lock().await;
        let record = state
            .current_results
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No result #{} to add", index + 1))?;

        let entry = state.inventory.add(record).clone();
        log::info!("➕ Added {} to inventory ({})", entry.record.brand, entry.id);
        Ok(entry)
    }

    pub async fn remove_from_inventory(&self, id: Uuid) -> Option<InventoryEntry> {
        let removed = self.state.lock().await.inventory.remove(id);
        if let Some(entry) = &removed {
            log::info!("➖ Removed {} from inventory ({})", entry.record.brand, entry.id);
        }
        removed
    }

    pub async fn clear_inventory(&self) -> usize {
        let removed = self.state.lock().await.inventory.clear();
        log::info!("🧹 Inventory cleared ({} entries)", removed);
        removed
    }

    pub async fn inventory_snapshot(&self) -> Inventory {
        self.state.lock().await.inventory.clone()
    }

    pub async fn current_results(&self) -> Vec<BottleRecord> {
        self.state.lock().await.current_results.clone()
    }

    pub async fn status(&self) -> SessionStatus {
        let online = self.connectivity.is_online().await;
        let state = self.state.lock().await;

        SessionStatus {
            mode: state.mode,
            scan_step: state.scan_step,
            has_image: state.single_image.is_some(),
            analyzing: state.analyzing,
            online,
            result_count: state.current_results.len(),
            inventory_count: state.inventory.len(),
            total_pours: state.inventory.total_pours(),
            last_error: state.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{ConnectivityOverride, OverridableConnectivity, StaticConnectivity};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct MockAnalyzer {
        response: Result<Vec<BottleRecord>, AnalysisError>,
        calls: AtomicUsize,
        last_image_count: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl MockAnalyzer {
        fn returning(response: Result<Vec<BottleRecord>, AnalysisError>) -> Self {
            Self {
                response,
                calls: AtomicUsize::new(0),
                last_image_count: AtomicUsize::new(0),
                gate: None,
            }
        }

        fn gated(response: Result<Vec<BottleRecord>, AnalysisError>, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::returning(response)
            }
        }
    }

    #[async_trait::async_trait]
    impl BottleAnalyzer for MockAnalyzer {
        async fn analyze(&self, images: &[ImagePayload]) -> Result<Vec<BottleRecord>, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.last_image_count.store(images.len(), Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.response.clone()
        }
    }

    fn bottle(brand: &str, full_volume_ml: f64, fill_percentage: f64) -> BottleRecord {
        BottleRecord {
            id: Uuid::new_v4(),
            brand: brand.to_string(),
            full_volume_ml,
            fill_percentage,
            explanation: "test".to_string(),
        }
    }

    fn image() -> ImagePayload {
        ImagePayload::from_bytes(&[0xFF, 0xD8, 0xFF, 0xE0]).unwrap()
    }

    fn session_with(analyzer: Arc<MockAnalyzer>, online: bool) -> ScanSession {
        ScanSession::new(analyzer, Arc::new(StaticConnectivity::new(online)))
    }

    async fn wait_until_analyzing(session: &ScanSession) {
        while !session.status().await.analyzing {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_nothing_to_analyze_without_capture() {
        let analyzer = Arc::new(MockAnalyzer::returning(Ok(Vec::new())));
        let session = session_with(analyzer.clone(), true);

        assert_eq!(session.analyze().await, AnalyzeOutcome::NothingToAnalyze);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_single_shot_analysis_stores_results() {
        let records = vec![bottle("Jameson", 700.0, 50.0), bottle("Campari", 1000.0, 30.0)];
        let analyzer = Arc::new(MockAnalyzer::returning(Ok(records.clone())));
        let session = session_with(analyzer.clone(), true);

        assert_eq!(session.capture(image()).await.unwrap(), CaptureOutcome::Replaced);
        assert_eq!(session.analyze().await, AnalyzeOutcome::Completed(records.clone()));
        assert_eq!(session.current_results().await, records);
        assert_eq!(analyzer.last_image_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_offline_analysis_makes_no_call() {
        let analyzer = Arc::new(MockAnalyzer::returning(Ok(Vec::new())));
        let session = session_with(analyzer.clone(), false);
        session.capture(image()).await.unwrap();

        assert_eq!(session.analyze().await, AnalyzeOutcome::Failed(AnalysisError::Offline));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);

        let status = session.status().await;
        assert!(!status.online);
        assert!(!status.analyzing);
        assert!(status.last_error.unwrap().contains("offline"));
    }

    #[tokio::test]
    async fn test_forced_online_analyzes_despite_failing_monitor() {
        let analyzer = Arc::new(MockAnalyzer::returning(Ok(Vec::new())));
        let connectivity = Arc::new(OverridableConnectivity::new(Arc::new(StaticConnectivity::new(false))));
        let session = ScanSession::new(analyzer.clone(), connectivity.clone());
        session.capture(image()).await.unwrap();

        assert_eq!(session.analyze().await, AnalyzeOutcome::Failed(AnalysisError::Offline));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);

        connectivity.set_override(ConnectivityOverride::ForcedOnline);
        assert_eq!(session.analyze().await, AnalyzeOutcome::Completed(Vec::new()));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
        assert!(session.status().await.online);
    }

    #[tokio::test]
    async fn test_failure_yields_no_results_and_generic_message() {
        let analyzer = Arc::new(MockAnalyzer::returning(Err(AnalysisError::EmptyResponse)));
        let session = session_with(analyzer, true);
        session.capture(image()).await.unwrap();

        assert_eq!(session.analyze().await, AnalyzeOutcome::Failed(AnalysisError::EmptyResponse));
        assert!(session.current_results().await.is_empty());
        assert_eq!(
            session.status().await.last_error.as_deref(),
            Some("Failed to analyze image. Please try again.")
        );
    }

    #[tokio::test]
    async fn test_multi_angle_sends_all_four_images() {
        let analyzer = Arc::new(MockAnalyzer::returning(Ok(vec![bottle("Tanqueray", 750.0, 80.0)])));
        let session = session_with(analyzer.clone(), true);
        session.start_multi_angle().await;

        for step in 1..=MULTI_ANGLE_STEPS {
            assert_eq!(
                session.capture(image()).await.unwrap(),
                CaptureOutcome::AngleCaptured { step }
            );
            if step < MULTI_ANGLE_STEPS {
                assert_eq!(
                    session.analyze().await,
                    AnalyzeOutcome::ScanIncomplete { captured: step }
                );
            }
        }
        assert!(session.capture(image()).await.is_err());

        assert!(matches!(session.analyze().await, AnalyzeOutcome::Completed(r) if r.len() == 1));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(analyzer.last_image_count.load(Ordering::SeqCst), MULTI_ANGLE_STEPS);
    }

    #[tokio::test]
    async fn test_cancel_multi_angle_returns_to_single() {
        let analyzer = Arc::new(MockAnalyzer::returning(Ok(Vec::new())));
        let session = session_with(analyzer, true);
        session.start_multi_angle().await;
        session.capture(image()).await.unwrap();
        session.cancel_multi_angle().await;

        let status = session.status().await;
        assert_eq!(status.mode, ScanMode::Single);
        assert_eq!(status.scan_step, 0);
        assert_eq!(session.analyze().await, AnalyzeOutcome::NothingToAnalyze);
    }

    #[tokio::test]
    async fn test_overlapping_analysis_is_rejected() {
        let gate = Arc::new(Notify::new());
        let analyzer = Arc::new(MockAnalyzer::gated(Ok(vec![bottle("Aperol", 700.0, 20.0)]), gate.clone()));
        let session = Arc::new(session_with(analyzer.clone(), true));
        session.capture(image()).await.unwrap();

        let in_flight = {
            let session = session.clone();
            tokio::spawn(async move { session.analyze().await })
        };
        wait_until_analyzing(&session).await;

        assert_eq!(session.analyze().await, AnalyzeOutcome::Busy);

        gate.notify_one();
        assert!(matches!(in_flight.await.unwrap(), AnalyzeOutcome::Completed(_)));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
        assert!(!session.status().await.analyzing);
    }

    #[tokio::test]
    async fn test_late_result_after_reset_is_discarded() {
        let gate = Arc::new(Notify::new());
        let analyzer = Arc::new(MockAnalyzer::gated(Ok(vec![bottle("Aperol", 700.0, 20.0)]), gate.clone()));
        let session = Arc::new(session_with(analyzer, true));
        session.capture(image()).await.unwrap();

        let in_flight = {
            let session = session.clone();
            tokio::spawn(async move { session.analyze().await })
        };
        wait_until_analyzing(&session).await;
        session.reset().await;

        gate.notify_one();
        assert_eq!(in_flight.await.unwrap(), AnalyzeOutcome::Discarded);
        assert!(session.current_results().await.is_empty());
    }

    #[tokio::test]
    async fn test_inventory_add_remove_round_trip() {
        let records = vec![bottle("Jameson", 700.0, 50.0), bottle("Campari", 1000.0, 30.0)];
        let analyzer = Arc::new(MockAnalyzer::returning(Ok(records)));
        let session = session_with(analyzer, true);
        session.capture(image()).await.unwrap();
        session.analyze().await;

        session.add_to_inventory(1).await.unwrap();
        let before = session.inventory_snapshot().await;

        let entry = session.add_to_inventory(0).await.unwrap();
        assert_eq!(entry.record.brand, "Jameson");
        assert_eq!(session.status().await.total_pours, 21.7);

        assert!(session.remove_from_inventory(entry.id).await.is_some());
        assert_eq!(session.inventory_snapshot().await, before);

        assert!(session.add_to_inventory(5).await.is_err());
        assert_eq!(session.clear_inventory().await, 1);
    }

    #[tokio::test]
    async fn test_reset_keeps_inventory() {
        let analyzer = Arc::new(MockAnalyzer::returning(Ok(vec![bottle("Jameson", 700.0, 50.0)])));
        let session = session_with(analyzer, true);
        session.capture(image()).await.unwrap();
        session.analyze().await;
        session.add_to_inventory(0).await.unwrap();

        session.reset().await;

        let status = session.status().await;
        assert!(!status.has_image);
        assert_eq!(status.result_count, 0);
        assert_eq!(status.inventory_count, 1);
    }
}
