//! The detection main loop: consume frame contracts, validate, drop stale,
//! read pixels from the ring, run inference and tracking, match detections
//! to tracks one-to-one, publish the result contract.
//!
//! Everything runs on one thread; the detector and tracker are invoked
//! synchronously. Per-frame problems increment a reason-keyed counter and
//! skip the frame. A result contract that fails its own validation is a
//! programming error and fatal, as is an inference watchdog timeout (the
//! launcher restarts the process; tracker state is never recovered
//! in-process).

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use detect_config::DetectConfig;
use detect_core::{
    Detector, DetectorError, FrameDecoder, Tracker, assign_track_ids,
};
use ivis_bus::{BusError, BusPublisher, BusSubscriber, Publish, TcpBusPublisher, TcpBusSubscriber};
use ivis_contracts::{
    ContractValidationError, Detection, FrameContractV1, ModelInfo, ResultContractV1, Timing,
    validate_frame_contract_v1, validate_result_contract_v1,
};
use ivis_core::{Counters, Runtime, latency_ms, monotonic_ms, wall_clock_ms};
use ivis_ring::{RingOptions, ShmRing};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration rejected")]
    Config(#[from] detect_config::ConfigError),

    #[error("bus failed")]
    Bus(#[from] BusError),

    #[error("inference watchdog fired")]
    InferenceTimeout(#[source] DetectorError),

    /// A result this process built failed its own validator.
    #[error("result contract invalid at publish time")]
    ResultContract(#[from] ContractValidationError),
}

pub struct DetectEngine {
    config: DetectConfig,
    subscriber: Box<dyn BusSubscriber>,
    publisher: Box<dyn BusPublisher>,
    ring: Option<ShmRing>,
    decoder: FrameDecoder,
    detector: Box<dyn Detector>,
    tracker: Box<dyn Tracker>,
    model: ModelInfo,
    counters: Arc<Counters>,
    results_addr: String,
    processed: u64,
}

impl DetectEngine {
    /// Connects the frame subscription and binds the results topic; both
    /// are fatal when they fail at startup.
    pub fn new(
        config: DetectConfig,
        detector: Box<dyn Detector>,
        tracker: Box<dyn Tracker>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let subscriber = TcpBusSubscriber::connect(&config.frames_endpoint)?;
        info!(endpoint = %config.frames_endpoint, "frames bus connected");

        let publisher = TcpBusPublisher::bind(&config.results_endpoint)?;
        let results_addr = publisher
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| config.results_endpoint.clone());
        info!(endpoint = %results_addr, "results bus bound");

        let decoder = FrameDecoder::new(config.frame_width, config.frame_height);
        let model = detector.model().clone();

        Ok(Self {
            config,
            subscriber: Box::new(subscriber),
            publisher: Box::new(publisher),
            ring: None,
            decoder,
            detector,
            tracker,
            model,
            counters: Arc::new(Counters::new()),
            results_addr,
            processed: 0,
        })
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    /// Endpoint the results publisher actually bound (resolves `:0`).
    pub fn results_addr(&self) -> &str {
        &self.results_addr
    }

    /// The ring usually appears after this process starts; attach lazily
    /// and keep trying, counting frames that arrive before it is up.
    fn ensure_ring(&mut self) -> bool {
        if self.ring.is_some() {
            return true;
        }
        match ShmRing::open_or_create(RingOptions {
            data_name: self.config.shm_name.clone(),
            meta_name: self.config.shm_meta_name.clone(),
            slot_size: self.config.slot_size(),
            slot_count: self.config.slot_count(),
            owner: false,
            recreate_on_mismatch: false,
        }) {
            Ok(ring) => {
                info!(
                    slot_size = ring.slot_size(),
                    slot_count = ring.slot_count(),
                    "shared memory ring attached"
                );
                self.ring = Some(ring);
                true
            }
            Err(err) => {
                debug!(%err, "shared memory not ready");
                false
            }
        }
    }

    /// Runs the consume loop until stop or a fatal error.
    pub fn run(&mut self, runtime: &Runtime) -> Result<(), EngineError> {
        info!(model = %self.model.name, "detection running");
        let mut last_stats = monotonic_ms();

        while runtime.should_continue() {
            let payload = match self.subscriber.recv(Duration::from_millis(200)) {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                // The bus never reconnects implicitly; restart is the policy.
                Err(err) => return Err(err.into()),
            };
            self.handle_payload(&payload)?;

            let now = monotonic_ms();
            if now - last_stats >= 5_000 {
                info!(
                    processed = self.processed,
                    drops = ?self.counters.snapshot(),
                    "detection stats"
                );
                last_stats = now;
            }
        }

        info!("detection stopped");
        Ok(())
    }

    /// Processes one raw bus payload. Per-frame failures count and return
    /// `Ok`; only fatal conditions error.
    pub fn handle_payload(&mut self, payload: &[u8]) -> Result<(), EngineError> {
        let mut value: serde_json::Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(err) => {
                self.counters.inc("bad_json");
                debug!(%err, "undecodable frame payload");
                return Ok(());
            }
        };

        if let Err(err) = validate_frame_contract_v1(&mut value) {
            self.counters.inc(err.reason_code.as_str());
            debug!(reason = %err.reason_code, "frame contract rejected");
            return Ok(());
        }
        let contract = match FrameContractV1::from_value(value) {
            Ok(contract) => contract,
            Err(err) => {
                self.counters.inc("bad_json");
                debug!(%err, "validated contract failed to decode");
                return Ok(());
            }
        };

        if self.config.max_frame_age_ms > 0 {
            let age_ms = latency_ms(wall_clock_ms(), contract.timestamp_ms);
            if age_ms > self.config.max_frame_age_ms {
                self.counters.inc("stale");
                debug!(age_ms, "stale frame dropped");
                return Ok(());
            }
        }

        if !self.ensure_ring() {
            self.counters.inc("shm_not_ready");
            return Ok(());
        }
        let Ok(slot) = contract.memory.key.parse::<u32>() else {
            self.counters.inc("bad_memory_key");
            return Ok(());
        };

        let read_start = Instant::now();
        let Some(ring) = self.ring.as_ref() else {
            self.counters.inc("shm_not_ready");
            return Ok(());
        };
        let Some(bytes) = ring.read(slot, contract.memory.generation) else {
            self.counters.inc("shm_miss");
            return Ok(());
        };
        debug!(
            slot,
            generation = contract.memory.generation,
            read_us = read_start.elapsed().as_micros() as u64,
            "ring read"
        );

        let frame = match self.decoder.decode(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                self.counters.inc("nonfatal");
                debug!(%err, "frame decode failed");
                return Ok(());
            }
        };

        let infer_start = Instant::now();
        let raw_detections = match self.detector.infer(&frame) {
            Ok(detections) => detections,
            Err(err @ DetectorError::Timeout { .. }) => {
                return Err(EngineError::InferenceTimeout(err));
            }
            Err(err) => {
                self.counters.inc("unhandled_exception");
                warn!(%err, "inference failed, frame dropped");
                return Ok(());
            }
        };
        let model_ms = infer_start.elapsed().as_secs_f64() * 1000.0;

        let track_start = Instant::now();
        let tracks = self.tracker.update(&raw_detections, &frame);
        let track_ms = track_start.elapsed().as_secs_f64() * 1000.0;

        let live_tracks: Vec<_> = tracks
            .into_iter()
            .filter(|t| t.confirmed && t.time_since_update <= 1)
            .collect();

        let mut detections: Vec<Detection> = raw_detections
            .iter()
            .map(|raw| Detection {
                bbox: raw.bbox_xyxy,
                conf: raw.conf,
                class_id: raw.class_id,
                class_name: None,
                track_id: None,
            })
            .collect();
        assign_track_ids(&mut detections, &live_tracks);

        let result = ResultContractV1 {
            contract_version: 1,
            frame_id: contract.frame_id.clone(),
            stream_id: contract.stream_id.clone(),
            camera_id: contract.camera_id.clone(),
            timestamp_ms: wall_clock_ms(),
            mono_ms: monotonic_ms(),
            detections,
            model: self.model.clone(),
            timing: Timing {
                inference_ms: model_ms + track_ms,
                model_ms: Some(model_ms),
                track_ms: Some(track_ms),
            },
        };

        // Publishing an invalid result would mean this code built it wrong.
        let mut result_value = result.to_value();
        validate_result_contract_v1(&mut result_value)?;

        let out = serde_json::to_vec(&result_value).expect("result serializes");
        match self.publisher.publish(&out)? {
            Publish::Sent => {}
            Publish::Dropped => {
                self.counters.inc("lag");
            }
        }

        let e2e_ms = latency_ms(wall_clock_ms(), contract.timestamp_ms);
        debug!(frame_id = %contract.frame_id, e2e_ms, "result published");
        self.processed += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use detect_core::{IouTracker, NullDetector, RawDetection, Track};
    use ivis_contracts::FrameMemoryRef;
    use ivis_core::BgrFrame;
    use std::sync::atomic::{AtomicU64, Ordering};

    const W: u32 = 64;
    const H: u32 = 48;

    fn unique(tag: &str) -> String {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        format!(
            "ivis_detect_{tag}_{}_{}",
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn test_config(tag: &str) -> DetectConfig {
        let mut config = DetectConfig::defaults();
        config.frame_width = W;
        config.frame_height = H;
        config.shm_name = unique(&format!("{tag}_data"));
        config.shm_meta_name = unique(&format!("{tag}_meta"));
        config.shm_cache_seconds = 1.0;
        config.shm_cache_fps = 4.0;
        config.results_endpoint = "127.0.0.1:0".into();
        config
    }

    fn model() -> ModelInfo {
        ModelInfo {
            name: "null".into(),
            version: "0".into(),
            threshold: Some(0.25),
            input_size: Some(vec![H, W]),
        }
    }

    /// Detector returning a fixed script and counting invocations.
    struct ScriptedDetector {
        model: ModelInfo,
        detections: Vec<RawDetection>,
        calls: Arc<AtomicU64>,
    }

    impl Detector for ScriptedDetector {
        fn model(&self) -> &ModelInfo {
            &self.model
        }

        fn infer(&mut self, _frame: &BgrFrame) -> Result<Vec<RawDetection>, DetectorError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(self.detections.clone())
        }
    }

    /// Tracker replaying fixed tracks.
    struct ScriptedTracker {
        tracks: Vec<Track>,
    }

    impl Tracker for ScriptedTracker {
        fn update(&mut self, _d: &[RawDetection], _f: &BgrFrame) -> Vec<Track> {
            self.tracks.clone()
        }
    }

    /// Engine under test plus the frames-side publisher that backs its
    /// subscription and an owned ring writer.
    fn engine_fixture(
        tag: &str,
        detector: Box<dyn Detector>,
        tracker: Box<dyn Tracker>,
    ) -> (DetectEngine, TcpBusPublisher, ShmRing) {
        let mut config = test_config(tag);
        let frames_pub = TcpBusPublisher::bind("127.0.0.1:0").unwrap();
        config.frames_endpoint = frames_pub.local_addr().unwrap().to_string();

        let ring = ShmRing::open_or_create(RingOptions {
            data_name: config.shm_name.clone(),
            meta_name: config.shm_meta_name.clone(),
            slot_size: config.slot_size(),
            slot_count: config.slot_count(),
            owner: true,
            recreate_on_mismatch: true,
        })
        .unwrap();

        let engine = DetectEngine::new(config, detector, tracker).unwrap();
        (engine, frames_pub, ring)
    }

    fn contract_for(ring_write: (u32, u32), timestamp_ms: i64) -> FrameContractV1 {
        FrameContractV1 {
            contract_version: 1,
            frame_id: "f-test".into(),
            stream_id: "s-test".into(),
            camera_id: "c-test".into(),
            pts: 40.0,
            timestamp_ms,
            mono_ms: monotonic_ms(),
            memory: FrameMemoryRef {
                backend: "shm_ring_v1".into(),
                key: ring_write.0.to_string(),
                size: (W * H * 3) as u64,
                generation: ring_write.1,
            },
            frame_width: W,
            frame_height: H,
            frame_channels: 3,
            frame_dtype: "uint8".into(),
            frame_color_space: "bgr".into(),
        }
    }

    #[test]
    fn full_frame_to_result_path() {
        let calls = Arc::new(AtomicU64::new(0));
        let detector = ScriptedDetector {
            model: model(),
            detections: vec![
                RawDetection {
                    bbox_xyxy: [10.0, 10.0, 20.0, 20.0],
                    conf: 0.8,
                    class_id: 1,
                },
                RawDetection {
                    bbox_xyxy: [11.0, 11.0, 21.0, 21.0],
                    conf: 0.9,
                    class_id: 1,
                },
            ],
            calls: Arc::clone(&calls),
        };
        let tracker = ScriptedTracker {
            tracks: vec![
                Track {
                    track_id: 7,
                    bbox_xyxy: [11.0, 11.0, 21.0, 21.0],
                    confidence: 0.9,
                    class_id: 1,
                    appearance_hash: None,
                    confirmed: true,
                    time_since_update: 0,
                },
                // Unconfirmed and aged tracks must not receive matches.
                Track {
                    track_id: 8,
                    bbox_xyxy: [10.0, 10.0, 20.0, 20.0],
                    confidence: 0.9,
                    class_id: 1,
                    appearance_hash: None,
                    confirmed: false,
                    time_since_update: 0,
                },
                Track {
                    track_id: 9,
                    bbox_xyxy: [10.0, 10.0, 20.0, 20.0],
                    confidence: 0.9,
                    class_id: 1,
                    appearance_hash: None,
                    confirmed: true,
                    time_since_update: 2,
                },
            ],
        };

        let (mut engine, _frames_pub, mut ring) =
            engine_fixture("full", Box::new(detector), Box::new(tracker));

        let mut results_sub =
            TcpBusSubscriber::connect(engine.results_addr()).unwrap();

        let frame = BgrFrame::filled(W, H, 0x42);
        let written = ring.write(frame.as_bytes()).unwrap();
        let contract = contract_for(written, wall_clock_ms());

        engine
            .handle_payload(&serde_json::to_vec(&contract).unwrap())
            .unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        let mut raw = None;
        let deadline = Instant::now() + Duration::from_secs(2);
        while raw.is_none() && Instant::now() < deadline {
            raw = results_sub.recv(Duration::from_millis(50)).unwrap();
        }
        let mut value: serde_json::Value =
            serde_json::from_slice(&raw.expect("no result arrived")).unwrap();
        validate_result_contract_v1(&mut value).unwrap();
        let result = ResultContractV1::from_value(value).unwrap();

        assert_eq!(result.frame_id, "f-test");
        assert_eq!(result.detections.len(), 2);
        // One-to-one: only the exact-overlap detection carries track 7.
        assert_eq!(result.detections[0].track_id, None);
        assert_eq!(result.detections[1].track_id, Some(7));
        assert!(result.timing.inference_ms >= 0.0);
    }

    #[test]
    fn stale_frames_drop_before_ring_and_inference() {
        let calls = Arc::new(AtomicU64::new(0));
        let detector = ScriptedDetector {
            model: model(),
            detections: vec![],
            calls: Arc::clone(&calls),
        };
        let (mut engine, _frames_pub, mut ring) = engine_fixture(
            "stale",
            Box::new(detector),
            Box::new(IouTracker::new(5, 1, 0.3)),
        );

        let frame = BgrFrame::filled(W, H, 1);
        let written = ring.write(frame.as_bytes()).unwrap();
        // 1.5 s old against a 1 s limit
        let contract = contract_for(written, wall_clock_ms() - 1_500);

        engine
            .handle_payload(&serde_json::to_vec(&contract).unwrap())
            .unwrap();

        assert_eq!(engine.counters().get("stale"), 1);
        assert_eq!(calls.load(Ordering::Relaxed), 0, "inference ran on stale frame");
    }

    #[test]
    fn overwritten_generation_counts_shm_miss() {
        let (mut engine, _frames_pub, mut ring) = engine_fixture(
            "miss",
            Box::new(NullDetector::new(model())),
            Box::new(IouTracker::new(5, 1, 0.3)),
        );

        let frame = BgrFrame::filled(W, H, 1);
        let written = ring.write(frame.as_bytes()).unwrap();
        // Lap the slot so the recorded generation is gone.
        for _ in 0..(engine.config.slot_count() + 1) {
            ring.write(frame.as_bytes()).unwrap();
        }
        let contract = contract_for(written, wall_clock_ms());
        engine
            .handle_payload(&serde_json::to_vec(&contract).unwrap())
            .unwrap();
        assert_eq!(engine.counters().get("shm_miss"), 1);
    }

    #[test]
    fn invalid_contract_counts_its_reason_code() {
        let (mut engine, _frames_pub, _ring) = engine_fixture(
            "invalid",
            Box::new(NullDetector::new(model())),
            Box::new(IouTracker::new(5, 1, 0.3)),
        );

        engine.handle_payload(b"not json at all").unwrap();
        assert_eq!(engine.counters().get("bad_json"), 1);

        let mut value = serde_json::to_value(contract_for((0, 1), wall_clock_ms())).unwrap();
        value["frame_dtype"] = serde_json::json!("float32");
        engine
            .handle_payload(&serde_json::to_vec(&value).unwrap())
            .unwrap();
        assert_eq!(engine.counters().get("unsupported_dtype"), 1);
    }

    #[test]
    fn empty_detection_set_publishes_valid_result() {
        let (mut engine, _frames_pub, mut ring) = engine_fixture(
            "empty",
            Box::new(NullDetector::new(model())),
            Box::new(IouTracker::new(5, 1, 0.3)),
        );
        let mut results_sub = TcpBusSubscriber::connect(engine.results_addr()).unwrap();

        let frame = BgrFrame::filled(W, H, 0x42);
        let written = ring.write(frame.as_bytes()).unwrap();
        engine
            .handle_payload(&serde_json::to_vec(&contract_for(written, wall_clock_ms())).unwrap())
            .unwrap();

        let mut raw = None;
        let deadline = Instant::now() + Duration::from_secs(2);
        while raw.is_none() && Instant::now() < deadline {
            raw = results_sub.recv(Duration::from_millis(50)).unwrap();
        }
        let result =
            ResultContractV1::from_value(serde_json::from_slice(&raw.unwrap()).unwrap()).unwrap();
        assert!(result.detections.is_empty());
    }
}
