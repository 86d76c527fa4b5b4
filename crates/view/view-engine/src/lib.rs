//! The live-view process core.
//!
//! Three worker threads feed one mutex-guarded shared state: a frames
//! subscriber (validate, ring read, correlate, render), a results
//! subscriber (validate, cache), and a ring-fallback poller that keeps the
//! picture moving when contracts stop flowing. A fourth thread serves the
//! rendered JPEGs as an MJPEG stream over a plain TCP listener.
//!
//! Correlation is by `frame_id` through the LRU+TTL cache; the last seen
//! result is only ever used as a short-lived fallback (500 ms by default)
//! so stale tracks never linger on screen.

use std::io::Write as IoWrite;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use ivis_bus::{BusError, BusSubscriber, TcpBusSubscriber};
use ivis_contracts::{
    FrameContractV1, ResultContractV1, validate_frame_contract_v1, validate_result_contract_v1,
};
use ivis_core::{BgrFrame, Counters, Runtime, WarnOnce, encode_jpeg, monotonic_ms};
use ivis_ring::{RingOptions, ShmRing};
use view_config::ViewConfig;
use view_core::{ResultsCache, render_overlay};

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("mjpeg listener failed to bind {bind}")]
    Bind {
        bind: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Default)]
struct SharedState {
    latest_jpeg: Option<Vec<u8>>,
    last_result: Option<(Instant, ResultContractV1)>,
    last_contract_mono: i64,
    fps_ema: f64,
    last_frame_at: Option<Instant>,
}

pub struct LiveView {
    config: ViewConfig,
    state: Arc<Mutex<SharedState>>,
    cache: Arc<Mutex<ResultsCache<ResultContractV1>>>,
    counters: Arc<Counters>,
    warn_once: Arc<WarnOnce>,
}

impl LiveView {
    pub fn new(config: ViewConfig) -> Self {
        let cache = ResultsCache::new(config.cache_max_entries, config.cache_ttl_seconds);
        Self {
            config,
            state: Arc::new(Mutex::new(SharedState::default())),
            cache: Arc::new(Mutex::new(cache)),
            counters: Arc::new(Counters::new()),
            warn_once: Arc::new(WarnOnce::new()),
        }
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    /// Most recent rendered JPEG, if any frame has arrived yet.
    pub fn snapshot_jpeg(&self) -> Option<Vec<u8>> {
        self.state.lock().latest_jpeg.clone()
    }

    /// Spawns the worker threads and the MJPEG listener; returns their
    /// handles for joining at shutdown.
    pub fn start(&self, runtime: &Runtime) -> Result<Vec<JoinHandle<()>>, ViewError> {
        info!(config = %self.config.summary(), "live view starting");
        let mut handles = Vec::new();

        {
            let config = self.config.clone();
            let cache = Arc::clone(&self.cache);
            let state = Arc::clone(&self.state);
            let counters = Arc::clone(&self.counters);
            let rt = runtime.clone();
            handles.push(std::thread::spawn(move || {
                results_loop(&config, &cache, &state, &counters, &rt);
            }));
        }
        {
            let config = self.config.clone();
            let cache = Arc::clone(&self.cache);
            let state = Arc::clone(&self.state);
            let counters = Arc::clone(&self.counters);
            let warn_once = Arc::clone(&self.warn_once);
            let rt = runtime.clone();
            handles.push(std::thread::spawn(move || {
                frames_loop(&config, &cache, &state, &counters, &warn_once, &rt);
            }));
        }
        {
            let config = self.config.clone();
            let state = Arc::clone(&self.state);
            let rt = runtime.clone();
            handles.push(std::thread::spawn(move || {
                fallback_loop(&config, &state, &rt);
            }));
        }

        let listener =
            TcpListener::bind(&self.config.mjpeg_bind).map_err(|source| ViewError::Bind {
                bind: self.config.mjpeg_bind.clone(),
                source,
            })?;
        listener.set_nonblocking(true).ok();
        info!(bind = %self.config.mjpeg_bind, "mjpeg stream listening");
        {
            let state = Arc::clone(&self.state);
            let rt = runtime.clone();
            handles.push(std::thread::spawn(move || {
                mjpeg_accept_loop(listener, state, rt);
            }));
        }

        Ok(handles)
    }

    /// Blocks until stop, then joins the workers.
    pub fn run(&self, runtime: &Runtime) -> Result<(), ViewError> {
        let handles = self.start(runtime)?;
        for handle in handles {
            let _ = handle.join();
        }
        info!("live view stopped");
        Ok(())
    }
}

fn attach_ring(config: &ViewConfig) -> Option<ShmRing> {
    ShmRing::open_or_create(RingOptions {
        data_name: config.shm_name.clone(),
        meta_name: config.shm_meta_name.clone(),
        slot_size: config.slot_size(),
        slot_count: config.slot_count(),
        owner: false,
        recreate_on_mismatch: false,
    })
    .ok()
}

fn connect(endpoint: &str) -> Result<TcpBusSubscriber, BusError> {
    TcpBusSubscriber::connect(endpoint)
}

/// Picks the result to overlay for `contract`: the per-frame cached result
/// when it is fresh enough, else the recent global fallback, else nothing.
fn pick_result(
    cache: &mut ResultsCache<ResultContractV1>,
    last_result: Option<&(Instant, ResultContractV1)>,
    contract: &FrameContractV1,
    max_age_ms: i64,
    counters: &Counters,
) -> Option<ResultContractV1> {
    if let Some(result) = cache.get(&contract.frame_id) {
        if result.timestamp_ms <= 0 {
            counters.inc("result_malformed_timestamp");
            return None;
        }
        if (result.timestamp_ms - contract.timestamp_ms).abs() <= max_age_ms {
            return Some(result.clone());
        }
        counters.inc("result_lag");
        return None;
    }
    if let Some((inserted, result)) = last_result
        && inserted.elapsed() <= Duration::from_millis(max_age_ms.max(0) as u64)
    {
        return Some(result.clone());
    }
    None
}

fn results_loop(
    config: &ViewConfig,
    cache: &Mutex<ResultsCache<ResultContractV1>>,
    state: &Mutex<SharedState>,
    counters: &Counters,
    runtime: &Runtime,
) {
    let mut subscriber: Option<TcpBusSubscriber> = None;
    while runtime.should_continue() {
        let Some(sub) = subscriber.as_mut() else {
            match connect(&config.results_endpoint) {
                Ok(sub) => subscriber = Some(sub),
                Err(_) => std::thread::sleep(Duration::from_millis(500)),
            }
            continue;
        };
        let payload = match sub.recv(Duration::from_millis(200)) {
            Ok(Some(payload)) => payload,
            Ok(None) => continue,
            Err(_) => {
                subscriber = None;
                continue;
            }
        };
        let Ok(mut value) = serde_json::from_slice::<serde_json::Value>(&payload) else {
            counters.inc("bad_json");
            continue;
        };
        if let Err(err) = validate_result_contract_v1(&mut value) {
            counters.inc(err.reason_code.as_str());
            continue;
        }
        let Ok(result) = ResultContractV1::from_value(value) else {
            counters.inc("bad_json");
            continue;
        };
        cache.lock().put(&result.frame_id, result.clone());
        state.lock().last_result = Some((Instant::now(), result));
    }
}

fn frames_loop(
    config: &ViewConfig,
    cache: &Mutex<ResultsCache<ResultContractV1>>,
    state: &Mutex<SharedState>,
    counters: &Counters,
    warn_once: &WarnOnce,
    runtime: &Runtime,
) {
    let mut subscriber: Option<TcpBusSubscriber> = None;
    let mut ring: Option<ShmRing> = None;
    while runtime.should_continue() {
        let Some(sub) = subscriber.as_mut() else {
            match connect(&config.frames_endpoint) {
                Ok(sub) => subscriber = Some(sub),
                Err(_) => std::thread::sleep(Duration::from_millis(500)),
            }
            continue;
        };
        let payload = match sub.recv(Duration::from_millis(200)) {
            Ok(Some(payload)) => payload,
            Ok(None) => continue,
            Err(_) => {
                subscriber = None;
                continue;
            }
        };
        let Ok(mut value) = serde_json::from_slice::<serde_json::Value>(&payload) else {
            counters.inc("bad_json");
            continue;
        };
        if let Err(err) = validate_frame_contract_v1(&mut value) {
            counters.inc(err.reason_code.as_str());
            continue;
        }
        let Ok(contract) = FrameContractV1::from_value(value) else {
            counters.inc("bad_json");
            continue;
        };
        state.lock().last_contract_mono = monotonic_ms();

        if ring.is_none() {
            ring = attach_ring(config);
        }
        let Some(r) = ring.as_ref() else {
            counters.inc("shm_not_ready");
            continue;
        };
        let Ok(slot) = contract.memory.key.parse::<u32>() else {
            counters.inc("bad_memory_key");
            continue;
        };
        let Some(bytes) = r.read(slot, contract.memory.generation) else {
            counters.inc("shm_miss");
            continue;
        };
        let Ok(mut frame) = BgrFrame::from_vec(bytes, config.frame_width, config.frame_height)
        else {
            counters.inc("nonfatal");
            continue;
        };

        let result = {
            let mut cache = cache.lock();
            let st = state.lock();
            pick_result(
                &mut cache,
                st.last_result.as_ref(),
                &contract,
                config.max_result_age_ms,
                counters,
            )
        };

        let fps = {
            let mut st = state.lock();
            let now = Instant::now();
            if let Some(prev) = st.last_frame_at {
                let dt = now.duration_since(prev).as_secs_f64();
                if dt > 0.0 {
                    st.fps_ema = 0.9 * st.fps_ema + 0.1 * (1.0 / dt);
                }
            }
            st.last_frame_at = Some(now);
            st.fps_ema
        };

        render_overlay(&mut frame, result.as_ref(), fps);
        match encode_jpeg(&frame, config.jpeg_quality) {
            Ok(jpeg) => state.lock().latest_jpeg = Some(jpeg),
            Err(_) => {
                // Sideband: counted every time, logged once.
                counters.inc("jpeg_encode_failed");
                warn_once.warn("jpeg_encode_failed", "overlay JPEG encode failed");
            }
        }
    }
}

/// Keeps rendering from the ring when contracts stop arriving, pairing the
/// pixels with the most recent known result while it is still fresh.
fn fallback_loop(config: &ViewConfig, state: &Mutex<SharedState>, runtime: &Runtime) {
    let mut ring: Option<ShmRing> = None;
    while runtime.should_continue() {
        std::thread::sleep(Duration::from_millis(100));

        let idle_ms = {
            let st = state.lock();
            monotonic_ms() - st.last_contract_mono
        };
        if idle_ms <= config.fallback_after_ms {
            continue;
        }
        if ring.is_none() {
            ring = attach_ring(config);
        }
        let Some(r) = ring.as_ref() else { continue };
        let Some((bytes, _, _)) = r.read_latest() else {
            continue;
        };
        let Ok(mut frame) = BgrFrame::from_vec(bytes, config.frame_width, config.frame_height)
        else {
            continue;
        };

        let (result, fps) = {
            let st = state.lock();
            let result = st.last_result.as_ref().and_then(|(inserted, result)| {
                (inserted.elapsed()
                    <= Duration::from_millis(config.max_result_age_ms.max(0) as u64))
                .then(|| result.clone())
            });
            (result, st.fps_ema)
        };
        render_overlay(&mut frame, result.as_ref(), fps);
        if let Ok(jpeg) = encode_jpeg(&frame, config.jpeg_quality) {
            state.lock().latest_jpeg = Some(jpeg);
        }
    }
}

fn mjpeg_accept_loop(listener: TcpListener, state: Arc<Mutex<SharedState>>, runtime: Runtime) {
    while runtime.should_continue() {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "mjpeg viewer connected");
                let state = Arc::clone(&state);
                let rt = runtime.clone();
                std::thread::spawn(move || {
                    if let Err(err) = serve_mjpeg(stream, &state, &rt) {
                        debug!(%err, "mjpeg viewer disconnected");
                    }
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                warn!(%e, "mjpeg accept failed");
                std::thread::sleep(Duration::from_millis(500));
            }
        }
    }
}

fn serve_mjpeg(
    mut stream: TcpStream,
    state: &Mutex<SharedState>,
    runtime: &Runtime,
) -> std::io::Result<()> {
    stream.write_all(
        b"HTTP/1.1 200 OK\r\n\
          Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\
          Cache-Control: no-cache\r\n\
          Connection: close\r\n\r\n",
    )?;
    while runtime.should_continue() {
        let jpeg = state.lock().latest_jpeg.clone();
        if let Some(jpeg) = jpeg {
            write!(
                stream,
                "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                jpeg.len()
            )?;
            stream.write_all(&jpeg)?;
            stream.write_all(b"\r\n")?;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivis_contracts::{Detection, FrameMemoryRef, ModelInfo, Timing};

    fn contract(frame_id: &str, timestamp_ms: i64) -> FrameContractV1 {
        FrameContractV1 {
            contract_version: 1,
            frame_id: frame_id.into(),
            stream_id: "s".into(),
            camera_id: "c".into(),
            pts: 1.0,
            timestamp_ms,
            mono_ms: 0,
            memory: FrameMemoryRef {
                backend: "shm_ring_v1".into(),
                key: "0".into(),
                size: 640 * 480 * 3,
                generation: 1,
            },
            frame_width: 640,
            frame_height: 480,
            frame_channels: 3,
            frame_dtype: "uint8".into(),
            frame_color_space: "bgr".into(),
        }
    }

    fn result(frame_id: &str, timestamp_ms: i64) -> ResultContractV1 {
        ResultContractV1 {
            contract_version: 1,
            frame_id: frame_id.into(),
            stream_id: "s".into(),
            camera_id: "c".into(),
            timestamp_ms,
            mono_ms: 0,
            detections: vec![Detection {
                bbox: [1.0, 1.0, 2.0, 2.0],
                conf: 0.5,
                class_id: 0,
                class_name: None,
                track_id: None,
            }],
            model: ModelInfo {
                name: "null".into(),
                version: "0".into(),
                threshold: None,
                input_size: None,
            },
            timing: Timing {
                inference_ms: 1.0,
                model_ms: None,
                track_ms: None,
            },
        }
    }

    #[test]
    fn cached_result_within_age_is_used() {
        let counters = Counters::new();
        let mut cache = ResultsCache::new(10, 60.0);
        cache.put("f1", result("f1", 1_000_400));
        let picked = pick_result(&mut cache, None, &contract("f1", 1_000_000), 500, &counters);
        assert!(picked.is_some());
    }

    #[test]
    fn lagging_result_is_rejected_and_counted() {
        let counters = Counters::new();
        let mut cache = ResultsCache::new(10, 60.0);
        cache.put("f1", result("f1", 1_002_000));
        let picked = pick_result(&mut cache, None, &contract("f1", 1_000_000), 500, &counters);
        assert!(picked.is_none());
        assert_eq!(counters.get("result_lag"), 1);
    }

    #[test]
    fn malformed_result_timestamp_is_counted() {
        let counters = Counters::new();
        let mut cache = ResultsCache::new(10, 60.0);
        cache.put("f1", result("f1", 0));
        let picked = pick_result(&mut cache, None, &contract("f1", 1_000_000), 500, &counters);
        assert!(picked.is_none());
        assert_eq!(counters.get("result_malformed_timestamp"), 1);
    }

    #[test]
    fn recent_global_fallback_fills_cache_misses() {
        let counters = Counters::new();
        let mut cache = ResultsCache::new(10, 60.0);
        let last = (Instant::now(), result("other", 1_000_000));
        let picked = pick_result(
            &mut cache,
            Some(&last),
            &contract("f1", 1_000_000),
            500,
            &counters,
        );
        assert!(picked.is_some());
    }

    #[test]
    fn stale_global_fallback_is_ignored() {
        let counters = Counters::new();
        let mut cache = ResultsCache::new(10, 60.0);
        let last = (
            Instant::now() - Duration::from_millis(800),
            result("other", 1_000_000),
        );
        let picked = pick_result(
            &mut cache,
            Some(&last),
            &contract("f1", 1_000_000),
            500,
            &counters,
        );
        assert!(picked.is_none());
    }
}
