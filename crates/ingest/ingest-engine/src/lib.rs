//! The ingestion main loop: capture, select, normalize, mask, fingerprint,
//! ring write, publish; with reconnect, frozen detection and adaptive rate
//! feedback around it.
//!
//! One OS thread runs [`IngestEngine::run`]; the optional adaptive feedback
//! loop runs on its own thread and only ever touches the shared selector.
//! Non-fatal conditions are counted per reason and the frame skipped; fatal
//! ones (config, ring write, bus bind, reconnect exhaustion) bubble out of
//! `run` for the launcher to handle with a restart.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use ingest_config::{IngestConfig, SelectorMode, SourceColor};
use ingest_core::adaptive::{AdaptiveRateController, LagBasedRateController};
use ingest_core::normalize::{self, Normalizer};
use ingest_core::selector::{Mode, Selector, SharedSelector};
use ingest_core::{
    FrameIdentity, FramePacket, FrozenStreamDetector, ReconnectController, RecordingBuffer,
    RoiMask, SourceError, VideoSource, fingerprint_bgr, open_source, roi,
};
use ivis_bus::{BusError, BusPublisher, BusSubscriber, Publish, TcpBusPublisher, TcpBusSubscriber};
use ivis_contracts::{FrameContractV1, FrameMemoryRef};
use ivis_core::{Counters, Runtime, WarnOnce, latency_ms, monotonic_ms, wall_clock_ms};
use ivis_ring::{RingError, RingOptions, ShmRing};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration rejected")]
    Config(#[from] ingest_config::ConfigError),

    #[error("capture source failed")]
    Source(#[from] SourceError),

    #[error("shared memory ring failed")]
    Ring(#[from] RingError),

    #[error("bus failed")]
    Bus(#[from] BusError),

    #[error("source reconnect retries exhausted")]
    ReconnectExhausted,

    #[error("source reached end of stream")]
    EndOfStream,
}

pub struct IngestEngine {
    config: IngestConfig,
    source: Box<dyn VideoSource>,
    selector: SharedSelector,
    normalizer: Normalizer,
    roi_mask: Option<RoiMask>,
    frozen: FrozenStreamDetector,
    reconnect: ReconnectController,
    record: Option<RecordingBuffer>,
    lag_controller: LagBasedRateController,
    ring: ShmRing,
    publisher: Box<dyn BusPublisher>,
    counters: Arc<Counters>,
    warn_once: WarnOnce,
    frames_addr: String,
    recent_lag: u64,
}

impl IngestEngine {
    pub fn new(config: IngestConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let source = open_source(
            &config.source_url,
            config.frame_width,
            config.frame_height,
            config.target_fps,
        )?;

        let mode = match config.selector_mode {
            SelectorMode::Clock => Mode::Clock,
            SelectorMode::Pts => Mode::Pts,
        };
        let selector = Selector::shared(config.target_fps, mode);

        let source_color = match config.source_color {
            SourceColor::Bgr => normalize::SourceColor::Bgr,
            SourceColor::Rgb => normalize::SourceColor::Rgb,
        };
        let normalizer = Normalizer::new(config.frame_width, config.frame_height, source_color);

        let counters = Arc::new(Counters::new());
        let roi_mask = Self::build_roi(&config, &counters);

        let frozen = FrozenStreamDetector::new(
            config.frozen_timeout_sec,
            config.frozen_hash_count,
            config.frozen_pts_count,
            config.frozen_timestamp_count,
        );
        let reconnect = ReconnectController::new(
            config.reconnect_min_sec,
            config.reconnect_max_sec,
            config.reconnect_factor,
            config.reconnect_jitter,
            config.reconnect_max_retries,
        );

        let record = (config.record_buffer_seconds > 0.0).then(|| {
            let max_frames = config.record_buffer_max_frames.unwrap_or_else(|| {
                ((config.record_buffer_seconds * config.adaptive_max_fps * 1.2) as u32).max(1)
            });
            info!(
                seconds = config.record_buffer_seconds,
                max_frames, "recording buffer enabled"
            );
            RecordingBuffer::new(
                config.record_buffer_seconds,
                max_frames,
                config.record_jpeg_quality,
            )
        });

        let lag_controller = LagBasedRateController::new(
            selector.clone(),
            config.adaptive_min_fps,
            config.adaptive_lag_threshold,
            config.adaptive_lag_hysteresis,
        );

        let ring = ShmRing::open_or_create(RingOptions {
            data_name: config.shm_name.clone(),
            meta_name: config.shm_meta_name.clone(),
            slot_size: config.slot_size(),
            slot_count: config.slot_count(),
            owner: true,
            recreate_on_mismatch: true,
        })?;
        info!(
            slot_size = ring.slot_size(),
            slot_count = ring.slot_count(),
            "shared memory ring ready"
        );

        let publisher = TcpBusPublisher::bind(&config.frames_endpoint)?;
        let frames_addr = publisher
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| config.frames_endpoint.clone());
        info!(endpoint = %frames_addr, "frames bus bound");

        Ok(Self {
            config,
            source,
            selector,
            normalizer,
            roi_mask,
            frozen,
            reconnect,
            record,
            lag_controller,
            ring,
            publisher: Box::new(publisher),
            counters,
            warn_once: WarnOnce::new(),
            frames_addr,
            recent_lag: 0,
        })
    }

    fn build_roi(config: &IngestConfig, counters: &Counters) -> Option<RoiMask> {
        let (boxes, box_skips) = config
            .roi_boxes
            .as_deref()
            .map(roi::parse_boxes)
            .unwrap_or_default();
        let (polygons, poly_skips) = config
            .roi_polygons
            .as_deref()
            .map(roi::parse_polygons)
            .unwrap_or_default();
        let skipped = box_skips + poly_skips;
        if skipped > 0 {
            counters.add("roi_region_skipped", skipped as u64);
            warn!(skipped, "skipped malformed roi regions");
        }
        let mask = RoiMask::build(config.frame_width, config.frame_height, &boxes, &polygons);
        if mask.is_some() {
            info!(
                boxes = boxes.len(),
                polygons = polygons.len(),
                "roi masking enabled"
            );
        }
        mask
    }

    /// Endpoint the frames publisher actually bound (resolves `:0`).
    pub fn frames_addr(&self) -> &str {
        &self.frames_addr
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    /// Spawns the adaptive-rate feedback thread when enabled: it subscribes
    /// to the results topic and steers the shared selector from observed
    /// inference latencies. Keeps retrying the subscription while the
    /// consumer is not up yet.
    pub fn start_adaptive_feedback(&self, runtime: Runtime) -> Option<JoinHandle<()>> {
        if !self.config.adaptive_fps {
            return None;
        }
        let endpoint = self.config.results_endpoint.clone();
        let mut controller = AdaptiveRateController::new(
            self.selector.clone(),
            self.config.adaptive_min_fps,
            self.config.adaptive_max_fps,
            self.config.adaptive_safety,
        );
        info!(endpoint = %endpoint, "adaptive fps feedback enabled");
        Some(std::thread::spawn(move || {
            let mut subscriber: Option<TcpBusSubscriber> = None;
            while runtime.should_continue() {
                let Some(sub) = subscriber.as_mut() else {
                    match TcpBusSubscriber::connect(&endpoint) {
                        Ok(sub) => subscriber = Some(sub),
                        Err(_) => std::thread::sleep(Duration::from_millis(500)),
                    }
                    continue;
                };
                match sub.recv(Duration::from_millis(200)) {
                    Ok(Some(payload)) => {
                        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&payload)
                            && let Some(inference_ms) =
                                value["timing"]["inference_ms"].as_f64()
                        {
                            controller.observe_inference(inference_ms);
                        }
                    }
                    Ok(None) => {}
                    Err(_) => subscriber = None,
                }
            }
        }))
    }

    /// Runs the capture loop until stop or a fatal error.
    pub fn run(&mut self, runtime: &Runtime) -> Result<(), EngineError> {
        info!(stream_id = %self.config.stream_id, "ingestion running");
        let mut fps_in = 0u64;
        let mut fps_out = 0u64;
        let mut last_stats = monotonic_ms();

        while runtime.should_continue() {
            let packet = match self.source.next_packet() {
                Ok(packet) => packet,
                Err(err) if self.source.is_file() => return Err(err.into()),
                Err(err) => {
                    warn!(%err, "capture read failed on live source");
                    self.attempt_reconnect("read_error", runtime)?;
                    continue;
                }
            };

            let Some(mut packet) = packet else {
                if self.source.is_file() {
                    if self.config.video_loop {
                        warn!("source EOF, rewinding file input");
                        self.source.rewind();
                        // settle after the seek before polling again
                        std::thread::sleep(Duration::from_millis(50));
                        continue;
                    }
                    return Err(EngineError::EndOfStream);
                }
                if let Some(reason) = self.frozen.check(monotonic_ms()) {
                    self.attempt_reconnect(reason.as_str(), runtime)?;
                } else {
                    std::thread::sleep(Duration::from_millis(50));
                }
                continue;
            };
            self.reconnect.reset();

            if packet.pts_ms <= 0.0 {
                self.counters.inc("dropped_pts");
                continue;
            }
            if packet.payload.is_empty() {
                self.counters.inc("dropped_corrupt");
                continue;
            }
            fps_in += 1;

            if !self.selector.lock().allow(packet.pts_ms) {
                self.counters.inc("dropped_fps");
                continue;
            }

            let (src_w, src_h) = self.source.frame_size();
            let payload = std::mem::take(&mut packet.payload);
            let mut frame = match self.normalizer.process(payload, src_w, src_h) {
                Ok(frame) => frame,
                Err(err) => {
                    self.counters.inc("dropped_corrupt");
                    debug!(%err, "normalize failed");
                    continue;
                }
            };
            if let Some(mask) = &self.roi_mask {
                mask.apply(&mut frame);
            }

            let fingerprint = fingerprint_bgr(&frame);
            self.frozen.note_frame(
                Some(packet.pts_ms),
                Some(packet.wall_ms),
                Some(&fingerprint),
                packet.mono_ms,
            );
            if let Some(reason) = self.frozen.check(packet.mono_ms)
                && !self.source.is_file()
            {
                self.attempt_reconnect(reason.as_str(), runtime)?;
                continue;
            }

            let identity = FrameIdentity::new(&self.config.stream_id, packet.pts_ms, &fingerprint);

            // Ring write failures are fatal: the transport substrate is gone.
            let (slot, generation) = self.ring.write(frame.as_bytes())?;

            if let Some(record) = &mut self.record
                && !record.add_frame(&frame, packet.wall_ms)
            {
                // Sideband: never escalates, logged once, counted always.
                self.counters.inc("record_encode_failed");
                self.warn_once
                    .warn("record_encode_failed", "record buffer JPEG encode failed");
            }

            let contract = self.build_contract(&identity, &packet, slot, generation);
            let payload = serde_json::to_vec(&contract).expect("contract serializes");
            match self.publisher.publish(&payload)? {
                Publish::Sent => fps_out += 1,
                Publish::Dropped => {
                    self.counters.inc("lag");
                    self.recent_lag += 1;
                    debug!("frame dropped under bus backpressure");
                }
            }
            self.lag_controller.update(self.recent_lag);

            let now = monotonic_ms();
            if now - last_stats >= 1_000 {
                let e2e_ms = latency_ms(wall_clock_ms(), packet.wall_ms);
                info!(
                    fps_in,
                    fps_out,
                    target_fps = self.selector.lock().target_fps(),
                    e2e_ms,
                    lag = self.recent_lag,
                    "ingestion stats"
                );
                fps_in = 0;
                fps_out = 0;
                self.recent_lag = 0;
                last_stats = now;
            }
        }

        info!("ingestion stopped");
        Ok(())
    }

    fn build_contract(
        &self,
        identity: &FrameIdentity,
        packet: &FramePacket,
        slot: u32,
        generation: u32,
    ) -> FrameContractV1 {
        FrameContractV1 {
            contract_version: 1,
            frame_id: identity.frame_id.clone(),
            stream_id: self.config.stream_id.clone(),
            camera_id: self.config.camera_id.clone(),
            pts: packet.pts_ms,
            timestamp_ms: packet.wall_ms,
            mono_ms: packet.mono_ms,
            memory: FrameMemoryRef {
                backend: "shm_ring_v1".into(),
                key: slot.to_string(),
                size: self.config.slot_size() as u64,
                generation,
            },
            frame_width: self.config.frame_width,
            frame_height: self.config.frame_height,
            frame_channels: 3,
            frame_dtype: "uint8".into(),
            frame_color_space: "bgr".into(),
        }
    }

    fn attempt_reconnect(&mut self, reason: &str, runtime: &Runtime) -> Result<(), EngineError> {
        self.counters.inc(&format!("reconnect_{reason}"));
        warn!(reason, "source reconnect triggered");
        while runtime.should_continue() {
            let Some(delay) = self.reconnect.next_delay() else {
                return Err(EngineError::ReconnectExhausted);
            };
            warn!(
                delay_ms = delay.as_millis() as u64,
                attempt = self.reconnect.attempts(),
                reason,
                "attempting reconnect"
            );
            sleep_responsive(delay, runtime);
            if !runtime.should_continue() {
                break;
            }
            if self.source.reconnect() {
                self.reconnect.reset();
                self.frozen.reset();
                info!(reason, "source reconnected");
                return Ok(());
            }
        }
        Ok(())
    }
}

fn sleep_responsive(total: Duration, runtime: &Runtime) {
    let mut remaining = total;
    let step = Duration::from_millis(50);
    while !remaining.is_zero() && runtime.should_continue() {
        let chunk = remaining.min(step);
        std::thread::sleep(chunk);
        remaining -= chunk;
    }
}
