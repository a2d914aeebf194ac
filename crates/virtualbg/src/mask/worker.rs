//! Off-thread variant of [`crate::mask::adapter::MaskAdapter`]. Runs the
//! identical segmentation algorithm on a dedicated thread and exchanges
//! work with the caller through a pair of `crossbeam_channel::bounded(1)`
//! channels, enforcing "at most one in-flight request" by construction
//! rather than by a separate counter.

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::data::centroid::MotionVector;
use crate::data::frame::FrameSource;
use crate::data::mask::MaskBuffer;
use crate::data::motion::MotionMap;
use crate::data::roi::CropRegion;
use crate::error::{Error, Result};
use crate::mask::adapter::{MaskAdapter, SegmentOutcome};
use crate::mask::producer::MaskProducer;

/// Default bound on how long [`MaskWorker::init`] waits for the worker
/// thread's readiness reply before falling back to the in-thread adapter.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// An owned copy of one frame's RGBA bytes, transferred (not borrowed)
/// across the worker-thread boundary. The processor constructs one of
/// these per dispatched request; everything downstream of that single
/// copy — the mask, motion map and bbox the worker computes — moves back
/// by ownership with no further copying.
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
    pub timestamp_ms: i64,
}

impl FrameSource for CapturedFrame {
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn rgba_bytes(&self) -> &[u8] {
        &self.bytes
    }
    fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }
}

enum WorkerRequest {
    Segment {
        frame: CapturedFrame,
        crop: Option<CropRegion>,
    },
    Resize {
        mask_width: usize,
        mask_height: usize,
    },
    Shutdown,
}

enum WorkerReply {
    Ready,
    Mask(WorkerMaskResult),
    ProducerFailed,
}

/// One completed off-thread segmentation, transferred back whole.
pub struct WorkerMaskResult {
    pub full_mask: MaskBuffer,
    pub motion_map: Option<MotionMap>,
    pub bbox: Option<CropRegion>,
    pub motion_vector: MotionVector,
    pub inference_ms: f32,
}

pub struct MaskWorker {
    request_tx: Sender<WorkerRequest>,
    reply_rx: Receiver<WorkerReply>,
    busy: bool,
    thread: Option<thread::JoinHandle<()>>,
}

impl MaskWorker {
    /// Spawn the worker thread and block (bounded by `init_timeout`)
    /// until it reports ready. A timeout or spawn failure is
    /// `WorkerInitFailure`, which the processor treats as a transparent
    /// fallback to the in-thread adapter rather than a fatal error.
    pub fn init(
        producer: Box<dyn MaskProducer>,
        mask_width: usize,
        mask_height: usize,
        init_timeout: Duration,
    ) -> Result<Self> {
        let (request_tx, request_rx) = bounded::<WorkerRequest>(1);
        let (reply_tx, reply_rx) = bounded::<WorkerReply>(1);

        let handle = thread::Builder::new()
            .name("virtualbg-mask-worker".to_string())
            .spawn(move || worker_loop(producer, mask_width, mask_height, request_rx, reply_tx))
            .map_err(|e| Error::WorkerInitFailure(format!("thread spawn failed: {e}")))?;

        match reply_rx.recv_timeout(init_timeout) {
            Ok(WorkerReply::Ready) => {
                tracing::info!("mask worker thread ready");
                Ok(Self {
                    request_tx,
                    reply_rx,
                    busy: false,
                    thread: Some(handle),
                })
            }
            _ => Err(Error::WorkerInitFailure(
                "worker did not report ready within timeout".to_string(),
            )),
        }
    }

    /// Non-blocking: `false` if a request is already in flight (the
    /// caller must fall back to interpolation for this frame), `true` if
    /// the request was handed off.
    pub fn try_submit(&mut self, frame: CapturedFrame, crop: Option<CropRegion>) -> bool {
        if self.busy {
            return false;
        }
        let sent = self
            .request_tx
            .try_send(WorkerRequest::Segment { frame, crop })
            .is_ok();
        self.busy = sent;
        sent
    }

    /// Non-blocking poll for a completed request. `Ok(None)` covers both
    /// "nothing in flight" and "still working"; a producer failure on
    /// the worker's side is absorbed the same way the in-thread adapter
    /// absorbs it, and simply clears the busy flag.
    pub fn try_recv(&mut self) -> Option<WorkerMaskResult> {
        match self.reply_rx.try_recv() {
            Ok(WorkerReply::Mask(result)) => {
                self.busy = false;
                Some(result)
            }
            Ok(WorkerReply::ProducerFailed) => {
                self.busy = false;
                None
            }
            Ok(WorkerReply::Ready) | Err(_) => None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Propagate a tier change's model resolution to the worker thread.
    /// Non-blocking and best-effort: if a segment request currently
    /// occupies the single-slot channel this does nothing, and the
    /// caller (the processor, on the next tier-sync check) retries once
    /// the worker is no longer busy.
    pub fn try_resize(&mut self, mask_width: usize, mask_height: usize) -> bool {
        if self.busy {
            return false;
        }
        self.request_tx
            .try_send(WorkerRequest::Resize { mask_width, mask_height })
            .is_ok()
    }
}

impl Drop for MaskWorker {
    fn drop(&mut self) {
        let _ = self.request_tx.send(WorkerRequest::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    producer: Box<dyn MaskProducer>,
    mask_width: usize,
    mask_height: usize,
    request_rx: Receiver<WorkerRequest>,
    reply_tx: Sender<WorkerReply>,
) {
    let mut adapter = MaskAdapter::new(producer, mask_width, mask_height);
    if reply_tx.send(WorkerReply::Ready).is_err() {
        return;
    }

    while let Ok(request) = request_rx.recv() {
        let (frame, crop) = match request {
            WorkerRequest::Shutdown => break,
            WorkerRequest::Resize { mask_width, mask_height } => {
                adapter.resize(mask_width, mask_height);
                continue;
            }
            WorkerRequest::Segment { frame, crop } => (frame, crop),
        };

        let started = Instant::now();
        let outcome = adapter.segment(&frame, frame.timestamp_ms(), crop);
        let inference_ms = started.elapsed().as_secs_f32() * 1000.0;

        let reply = match outcome {
            SegmentOutcome::Fresh => WorkerReply::Mask(WorkerMaskResult {
                full_mask: adapter.full_mask().clone(),
                motion_map: adapter.get_motion_map().cloned(),
                bbox: adapter.get_person_bbox(0.0),
                motion_vector: adapter.get_mask_motion_vector(),
                inference_ms,
            }),
            SegmentOutcome::ProducerFailed => WorkerReply::ProducerFailed,
        };
        if reply_tx.send(reply).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::producer::{ConfidenceMap, ScratchSurface};

    struct ConstantProducer;
    impl MaskProducer for ConstantProducer {
        fn produce(&mut self, input: &ScratchSurface, _timestamp_ms: i64) -> Option<Vec<ConfidenceMap>> {
            Some(vec![ConfidenceMap::new(
                input.width(),
                input.height(),
                vec![1.0; input.width() * input.height()],
            )])
        }
    }

    #[test]
    fn init_reports_ready_and_round_trips_one_segment() {
        let mut worker = MaskWorker::init(Box::new(ConstantProducer), 8, 8, Duration::from_secs(5))
            .expect("worker should initialize");

        let frame = CapturedFrame {
            width: 32,
            height: 32,
            bytes: vec![128u8; 32 * 32 * 4],
            timestamp_ms: 0,
        };
        assert!(worker.try_submit(frame, None));
        assert!(worker.is_busy());

        let mut result = None;
        for _ in 0..1000 {
            if let Some(r) = worker.try_recv() {
                result = Some(r);
                break;
            }
            thread::yield_now();
        }
        let result = result.expect("worker should eventually reply");
        assert_eq!(result.full_mask.width(), 8);
        assert!(!worker.is_busy());
    }

    #[test]
    fn second_submit_rejected_while_busy() {
        let mut worker = MaskWorker::init(Box::new(ConstantProducer), 8, 8, Duration::from_secs(5))
            .expect("worker should initialize");
        let make_frame = || CapturedFrame {
            width: 32,
            height: 32,
            bytes: vec![0u8; 32 * 32 * 4],
            timestamp_ms: 0,
        };
        assert!(worker.try_submit(make_frame(), None));
        assert!(!worker.try_submit(make_frame(), None));
    }
}
