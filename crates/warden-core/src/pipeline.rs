//! Frame pipeline: one blocking iteration per frame.
//!
//! read frame → analyze (detect + encode) → decide → rate-limited audit →
//! display. Single-threaded; a stop flag is checked between iterations only.

use crate::audit::AuditSink;
use crate::gallery::Gallery;
use crate::matcher::{MatchError, Matcher};
use crate::policy::{AccessDecision, AccessStatus, DecisionPolicy};
use crate::rate_limit::RateLimitedLogger;
use crate::types::{FaceObservation, FaceRegion};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Mid-stream read failure. Ends the loop without being treated as a crash.
#[derive(Error, Debug)]
#[error("frame read failed: {0}")]
pub struct FrameReadFailure(pub String);

/// Detection/encoding failure reported by a [`FaceAnalyzer`].
#[derive(Error, Debug)]
#[error("face analysis failed: {0}")]
pub struct AnalyzeError(#[source] pub Box<dyn std::error::Error + Send + Sync>);

impl AnalyzeError {
    pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self(err.into())
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
    #[error("matching failed: {0}")]
    Match(#[from] MatchError),
}

/// Source of frames. `Ok(None)` signals end of stream.
pub trait FrameSource {
    type Frame;

    fn read_frame(&mut self) -> Result<Option<Self::Frame>, FrameReadFailure>;

    /// Give the underlying device back. Called once on every exit path.
    fn release(&mut self) {}
}

/// External detection + encoding capability.
///
/// Implementations normalise the frame (colour order, downscale) themselves;
/// regions are reported in the coordinates of the frame they analysed.
pub trait FaceAnalyzer<F> {
    fn analyze(&mut self, frame: &F) -> Result<Vec<FaceObservation>, AnalyzeError>;
}

/// Observational output. Never feeds back into decisions.
pub trait DisplaySink<F> {
    fn show(&mut self, frame: &F, outcome: &FrameOutcome);

    fn close(&mut self) {}
}

/// A box to draw on the source frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub region: FaceRegion,
    pub label: String,
    /// RGB.
    pub color: [u8; 3],
}

/// Everything the pipeline concluded about one frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameOutcome {
    pub decision: AccessDecision,
    pub annotations: Vec<Annotation>,
    /// Whether this frame produced an audit row.
    pub logged: bool,
    /// Pipeline counters after this frame.
    pub stats: PipelineStats,
}

/// Running counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub frames: u64,
    pub no_face: u64,
    pub multi_face: u64,
    pub granted: u64,
    pub warning: u64,
    pub denied: u64,
    pub audit_written: u64,
    pub audit_suppressed: u64,
    pub audit_failed: u64,
}

impl PipelineStats {
    fn record(&mut self, status: AccessStatus) {
        self.frames += 1;
        match status {
            AccessStatus::NoFace => self.no_face += 1,
            AccessStatus::MultiFaceBlocked => self.multi_face += 1,
            AccessStatus::Granted => self.granted += 1,
            AccessStatus::WarningLowConfidence => self.warning += 1,
            AccessStatus::Denied => self.denied += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// External stop signal observed between iterations.
    Stopped,
    EndOfStream,
    ReadFailure(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub reason: StopReason,
    pub stats: PipelineStats,
}

pub struct Pipeline<M, S> {
    gallery: Arc<Gallery>,
    policy: DecisionPolicy,
    matcher: M,
    logger: RateLimitedLogger<S>,
    /// Multiplier from analysed-frame coordinates back to source-frame coordinates.
    region_scale: f32,
    stats: PipelineStats,
}

impl<M: Matcher, S: AuditSink> Pipeline<M, S> {
    pub fn new(
        gallery: Arc<Gallery>,
        policy: DecisionPolicy,
        matcher: M,
        logger: RateLimitedLogger<S>,
    ) -> Self {
        Self {
            gallery,
            policy,
            matcher,
            logger,
            region_scale: 1.0,
            stats: PipelineStats::default(),
        }
    }

    /// Set the factor applied to regions before annotation, e.g. `2.0` when
    /// the analyzer works on a half-size frame.
    pub fn with_region_scale(mut self, scale: f32) -> Self {
        self.region_scale = scale;
        self
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn logger(&self) -> &RateLimitedLogger<S> {
        &self.logger
    }

    /// Run one iteration on an already-read frame.
    pub fn process<F, A>(
        &mut self,
        frame: &F,
        analyzer: &mut A,
        now: Instant,
    ) -> Result<FrameOutcome, PipelineError>
    where
        A: FaceAnalyzer<F> + ?Sized,
    {
        let observations = analyzer.analyze(frame)?;
        let decision = self
            .policy
            .decide(&observations, &self.gallery, &self.matcher)?;
        self.stats.record(decision.status);

        tracing::debug!(
            status = %decision.status,
            faces = decision.faces,
            name = ?decision.name,
            confidence = ?decision.confidence,
            "frame decided"
        );

        if !decision.status.is_match_outcome() {
            return Ok(FrameOutcome {
                decision,
                annotations: Vec::new(),
                logged: false,
                stats: self.stats,
            });
        }

        let logged = match self.logger.maybe_log(&decision, now) {
            Ok(true) => {
                self.stats.audit_written += 1;
                true
            }
            Ok(false) => {
                self.stats.audit_suppressed += 1;
                false
            }
            Err(e) => {
                self.stats.audit_failed += 1;
                tracing::warn!(error = %e, "audit write failed; continuing");
                false
            }
        };

        let annotations = match (&observations[..], decision.label(), decision.status.color()) {
            ([face], Some(label), Some(color)) => vec![Annotation {
                region: face.region.scaled(self.region_scale),
                label,
                color,
            }],
            _ => Vec::new(),
        };

        Ok(FrameOutcome {
            decision,
            annotations,
            logged,
            stats: self.stats,
        })
    }

    /// Drive the loop until stopped, end of stream, or a read failure.
    ///
    /// The source is released and the display closed on every exit path,
    /// including errors.
    pub fn run<Src, A, D>(
        &mut self,
        source: &mut Src,
        analyzer: &mut A,
        display: &mut D,
        stop: &AtomicBool,
    ) -> Result<RunSummary, PipelineError>
    where
        Src: FrameSource + ?Sized,
        A: FaceAnalyzer<Src::Frame> + ?Sized,
        D: DisplaySink<Src::Frame> + ?Sized,
    {
        tracing::info!(gallery = self.gallery.len(), "pipeline started");

        let result = self.drive(source, analyzer, display, stop);
        source.release();
        display.close();

        match &result {
            Ok(reason) => tracing::info!(reason = ?reason, frames = self.stats.frames, "pipeline stopped"),
            Err(e) => tracing::error!(error = %e, frames = self.stats.frames, "pipeline aborted"),
        }

        result.map(|reason| RunSummary {
            reason,
            stats: self.stats,
        })
    }

    fn drive<Src, A, D>(
        &mut self,
        source: &mut Src,
        analyzer: &mut A,
        display: &mut D,
        stop: &AtomicBool,
    ) -> Result<StopReason, PipelineError>
    where
        Src: FrameSource + ?Sized,
        A: FaceAnalyzer<Src::Frame> + ?Sized,
        D: DisplaySink<Src::Frame> + ?Sized,
    {
        loop {
            if stop.load(Ordering::Acquire) {
                return Ok(StopReason::Stopped);
            }

            let frame = match source.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(StopReason::EndOfStream),
                Err(e) => {
                    tracing::warn!(error = %e, "frame source failed; stopping pipeline");
                    return Ok(StopReason::ReadFailure(e.0));
                }
            };

            let outcome = self.process(&frame, analyzer, Instant::now())?;
            display.show(&frame, &outcome);
        }
    }
}
