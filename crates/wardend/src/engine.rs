use crate::config::Config;
use crate::display::DaemonDisplay;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::watch;
use warden_core::{
    AccessDecision, AnalyzeError, DecisionPolicy, EuclideanMatcher, FaceAnalyzer,
    FaceObservation, FaceRegion, FrameReadFailure, FrameSource, Gallery, Pipeline,
    PipelineStats, RateLimitedLogger, RunSummary, SqliteAuditLog,
};
use warden_hw::{Camera, CameraStream, Frame};
use warden_vision::{FaceDetector, FaceEncoder, ENCODING_DIM};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] warden_hw::CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] warden_vision::DetectorError),
    #[error("encoder error: {0}")]
    Encoder(#[from] warden_vision::EncoderError),
    #[error("gallery dimension {actual:?} does not match the {expected}-d encoder output")]
    GalleryDimension {
        expected: usize,
        actual: Option<usize>,
    },
    #[error("invalid thresholds: {0}")]
    Thresholds(#[from] warden_core::policy::ThresholdError),
    #[error("failed to spawn pipeline thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Starting,
    Running,
    Stopped,
    Failed,
}

impl EngineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

/// Snapshot published by the pipeline thread after every frame.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub stats: PipelineStats,
    pub last_decision: Option<AccessDecision>,
    pub summary: Option<RunSummary>,
    pub error: Option<String>,
}

impl EngineStatus {
    fn starting() -> Self {
        Self {
            state: EngineState::Starting,
            stats: PipelineStats::default(),
            last_decision: None,
            summary: None,
            error: None,
        }
    }
}

/// Clone-safe control surface for the running pipeline.
#[derive(Clone)]
pub struct EngineControl {
    stop: Arc<AtomicBool>,
    status: watch::Receiver<EngineStatus>,
}

impl EngineControl {
    /// Ask the loop to exit after the current frame. Returns `false` if a stop
    /// was already pending.
    pub fn stop(&self) -> bool {
        !self.stop.swap(true, Ordering::AcqRel)
    }

    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    /// Resolve once the pipeline has stopped or failed.
    pub async fn finished(&self) -> EngineStatus {
        let mut rx = self.status.clone();
        let terminal = rx
            .wait_for(|s| s.state.is_terminal())
            .await
            .map(|status| status.clone());
        match terminal {
            Ok(status) => status,
            // Sender dropped without a terminal state: the thread panicked.
            Err(_) => {
                let mut status = rx.borrow().clone();
                status.state = EngineState::Failed;
                status.error.get_or_insert_with(|| "pipeline thread exited".into());
                status
            }
        }
    }
}

pub struct EngineHandle {
    control: EngineControl,
    thread: JoinHandle<()>,
}

impl EngineHandle {
    pub fn control(&self) -> EngineControl {
        self.control.clone()
    }

    /// Signal stop and wait for the pipeline thread to release the camera.
    pub fn shutdown(self) {
        self.control.stop();
        if self.thread.join().is_err() {
            tracing::error!("pipeline thread panicked");
        }
    }
}

/// Adapts a live camera stream to the pipeline's frame source.
struct CameraSource<'a> {
    stream: Option<CameraStream<'a>>,
}

impl FrameSource for CameraSource<'_> {
    type Frame = Frame;

    fn read_frame(&mut self) -> Result<Option<Frame>, FrameReadFailure> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        stream
            .next_frame()
            .map(Some)
            .map_err(|e| FrameReadFailure(e.to_string()))
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!("camera stream released");
        }
    }
}

/// SCRFD detection plus ArcFace encoding on a downscaled RGB copy of each frame.
pub struct VisionAnalyzer {
    detector: FaceDetector,
    encoder: FaceEncoder,
    downscale: f32,
}

impl FaceAnalyzer<Frame> for VisionAnalyzer {
    fn analyze(&mut self, frame: &Frame) -> Result<Vec<FaceObservation>, AnalyzeError> {
        let image = frame.normalized(self.downscale);
        let detections = self.detector.detect(&image).map_err(AnalyzeError::new)?;

        detections
            .iter()
            .map(|det| {
                let values = self
                    .encoder
                    .encode(&image, det.landmarks.as_ref())
                    .map_err(AnalyzeError::new)?;
                Ok(FaceObservation {
                    region: FaceRegion::new(det.y1, det.x2, det.y2, det.x1),
                    encoding: values.into(),
                })
            })
            .collect()
    }
}

/// Reject a gallery the encoder's output can never be matched against.
fn check_gallery(gallery: &Gallery, expected: usize) -> Result<(), EngineError> {
    match gallery.dimension() {
        Some(actual) if actual == expected => Ok(()),
        actual => Err(EngineError::GalleryDimension { expected, actual }),
    }
}

/// Spawn the access-control pipeline on a dedicated OS thread.
///
/// Opens the camera and loads both ONNX models synchronously so startup fails
/// fast if any resource is unavailable. The thread discards warmup frames,
/// then runs until stopped or the camera stops delivering frames.
pub fn spawn_engine(
    config: &Config,
    gallery: Arc<Gallery>,
    audit: SqliteAuditLog,
) -> Result<EngineHandle, EngineError> {
    check_gallery(&gallery, ENCODING_DIM)?;
    let policy = DecisionPolicy::new(config.thresholds()?);

    let camera = Camera::open(
        &config.camera_device,
        config.camera_width,
        config.camera_height,
    )?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        format = ?camera.pixel_format(),
        "camera opened"
    );

    let detector_path = config.detector_model_path();
    let detector = FaceDetector::load(&detector_path)?;
    tracing::info!(path = %detector_path, "SCRFD detector loaded");

    let encoder_path = config.encoder_model_path();
    let encoder = FaceEncoder::load(&encoder_path)?;
    tracing::info!(path = %encoder_path, "ArcFace encoder loaded");

    let downscale = config.effective_downscale();
    let mut analyzer = VisionAnalyzer {
        detector,
        encoder,
        downscale,
    };

    let logger = RateLimitedLogger::with_interval(audit, config.log_interval());
    let mut pipeline = Pipeline::new(gallery, policy, EuclideanMatcher, logger)
        .with_region_scale(1.0 / downscale);

    let stop = Arc::new(AtomicBool::new(false));
    let (status_tx, status_rx) = watch::channel(EngineStatus::starting());
    let mut display = DaemonDisplay::new(
        status_tx,
        config.snapshot_path.clone(),
        config.snapshot_every,
    );
    let warmup_frames = config.warmup_frames;
    let thread_stop = Arc::clone(&stop);

    let thread = std::thread::Builder::new()
        .name("warden-pipeline".into())
        .spawn(move || {
            tracing::info!("pipeline thread started");

            let stream = match camera.stream() {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!(error = %e, "failed to start camera stream");
                    display.fail(e.to_string());
                    return;
                }
            };
            let mut source = CameraSource {
                stream: Some(stream),
            };

            // Discard warmup frames while auto exposure settles.
            if warmup_frames > 0 {
                tracing::info!(count = warmup_frames, "discarding warmup frames");
                for _ in 0..warmup_frames {
                    let _ = source.read_frame();
                }
            }

            display.running();
            match pipeline.run(&mut source, &mut analyzer, &mut display, &thread_stop) {
                Ok(summary) => display.finish(summary),
                Err(e) => display.fail(e.to_string()),
            }
            tracing::info!("pipeline thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        control: EngineControl {
            stop,
            status: status_rx,
        },
        thread,
    })
}
