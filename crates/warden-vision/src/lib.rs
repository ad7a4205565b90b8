//! warden-vision: Face detection (SCRFD) and encoding (ArcFace) on RGB
//! frames, both running via ONNX Runtime for CPU inference.

pub mod alignment;
pub mod detector;
pub mod encoder;

pub use detector::{Detection, DetectorError, FaceDetector};
pub use encoder::{EncoderError, FaceEncoder, ENCODING_DIM};

/// SCRFD detection model file name inside a model directory.
pub const DETECTOR_MODEL: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside a model directory.
pub const ENCODER_MODEL: &str = "w600k_r50.onnx";
