//! The detector seam and its watchdog.
//!
//! Real models plug in behind [`Detector`]; the pipeline only sees raw
//! `(bbox, conf, class_id)` triples. [`TimedDetector`] bounds inference
//! time by running the inner detector on a dedicated worker thread: when
//! the deadline passes the wrapper reports a timeout, which the consumer
//! treats as fatal. The stalled worker is abandoned; the process restart is
//! the recovery path, never in-process unwinding of tracker state.

use std::sync::mpsc;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use ivis_contracts::ModelInfo;
use ivis_core::BgrFrame;

/// One raw detection before matching: `[x1, y1, x2, y2]`, confidence,
/// class id.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub bbox_xyxy: [f64; 4],
    pub conf: f64,
    pub class_id: i64,
}

#[derive(Debug, Error)]
pub enum DetectorError {
    /// Inference exceeded the watchdog deadline. Fatal to the loop.
    #[error("inference exceeded {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("inference worker is gone")]
    WorkerGone,

    #[error("inference failed: {message}")]
    Failed { message: String },
}

pub trait Detector: Send {
    fn model(&self) -> &ModelInfo;

    fn infer(&mut self, frame: &BgrFrame) -> Result<Vec<RawDetection>, DetectorError>;
}

/// Detector producing no detections; stands in where no model is deployed
/// and keeps the full transport path exercised.
pub struct NullDetector {
    model: ModelInfo,
}

impl NullDetector {
    pub fn new(model: ModelInfo) -> Self {
        Self { model }
    }
}

impl Detector for NullDetector {
    fn model(&self) -> &ModelInfo {
        &self.model
    }

    fn infer(&mut self, _frame: &BgrFrame) -> Result<Vec<RawDetection>, DetectorError> {
        Ok(Vec::new())
    }
}

enum WorkerReply {
    Done(Result<Vec<RawDetection>, DetectorError>),
}

/// Watchdog wrapper enforcing an inference deadline.
pub struct TimedDetector {
    model: ModelInfo,
    timeout: Duration,
    frame_tx: mpsc::Sender<BgrFrame>,
    reply_rx: mpsc::Receiver<WorkerReply>,
    poisoned: bool,
}

impl TimedDetector {
    pub fn new(mut inner: Box<dyn Detector>, timeout: Duration) -> Self {
        let model = inner.model().clone();
        let (frame_tx, frame_rx) = mpsc::channel::<BgrFrame>();
        let (reply_tx, reply_rx) = mpsc::channel::<WorkerReply>();
        std::thread::spawn(move || {
            while let Ok(frame) = frame_rx.recv() {
                let result = inner.infer(&frame);
                if reply_tx.send(WorkerReply::Done(result)).is_err() {
                    break;
                }
            }
        });
        Self {
            model,
            timeout,
            frame_tx,
            reply_rx,
            poisoned: false,
        }
    }
}

impl Detector for TimedDetector {
    fn model(&self) -> &ModelInfo {
        &self.model
    }

    fn infer(&mut self, frame: &BgrFrame) -> Result<Vec<RawDetection>, DetectorError> {
        if self.poisoned {
            return Err(DetectorError::WorkerGone);
        }
        self.frame_tx
            .send(frame.clone())
            .map_err(|_| DetectorError::WorkerGone)?;
        match self.reply_rx.recv_timeout(self.timeout) {
            Ok(WorkerReply::Done(result)) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // The worker may still be stuck inside the model; this
                // wrapper must not be reused after a timeout.
                self.poisoned = true;
                warn!(timeout_ms = self.timeout.as_millis() as u64, "inference watchdog fired");
                Err(DetectorError::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(DetectorError::WorkerGone),
        }
    }
}
