//! warden-core: Access decision engine.
//!
//! Matches face encodings against a known-identity gallery, turns match
//! distance into an access decision, and writes decisions to an audit log
//! behind a global rate limit. Detection, encoding and capture are supplied
//! by callers through the [`pipeline`] traits.

pub mod audit;
pub mod gallery;
pub mod matcher;
pub mod pipeline;
pub mod policy;
pub mod rate_limit;
pub mod types;

pub use audit::{
    AuditEntry, AuditRecord, AuditSink, AuditStoreError, AuditSummary, AuditWriteError,
    SqliteAuditLog,
};
pub use gallery::{Gallery, GalleryError};
pub use matcher::{EuclideanMatcher, MatchError, MatchResult, Matcher};
pub use pipeline::{
    AnalyzeError, Annotation, DisplaySink, FaceAnalyzer, FrameOutcome, FrameReadFailure,
    FrameSource, Pipeline, PipelineError, PipelineStats, RunSummary, StopReason,
};
pub use policy::{AccessDecision, AccessStatus, DecisionPolicy, Thresholds};
pub use rate_limit::RateLimitedLogger;
pub use types::{Encoding, FaceObservation, FaceRegion};
