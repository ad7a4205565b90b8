//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB image into the 640×640 model input, decodes the three
//! anchor-free stride levels and removes overlapping boxes with NMS.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU: f32 = 0.4;
const STRIDES: [u32; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("model has {0} outputs; SCRFD with keypoints needs 9")]
    UnexpectedOutputs(usize),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// One detected face in the coordinates of the image passed to [`FaceDetector::detect`].
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    /// Five-point landmarks: left eye, right eye, nose, left mouth, right mouth.
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl Detection {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection-over-union with another detection.
    pub fn iou(&self, other: &Detection) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Scale and padding applied when fitting an image into the square input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((target as f32 - new_w) / 2.0).floor(),
            pad_y: ((target as f32 - new_h) / 2.0).floor(),
        }
    }

    /// Model-input point back to source-image point.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Tensor positions of (scores, boxes, keypoints) for each stride.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OutputLayout([(usize, usize, usize); 3]);

impl OutputLayout {
    /// Prefer `score_8`/`bbox_16`/`kps_32`-style names; otherwise assume the
    /// stock export order (all scores, then all boxes, then all keypoints).
    fn resolve(names: &[String]) -> Self {
        let position = |kind: &str, stride: u32| {
            let wanted = format!("{kind}_{stride}");
            names.iter().position(|n| *n == wanted)
        };

        let mut slots = [(0, 0, 0); 3];
        for (slot, &stride) in slots.iter_mut().zip(STRIDES.iter()) {
            match (
                position("score", stride),
                position("bbox", stride),
                position("kps", stride),
            ) {
                (Some(s), Some(b), Some(k)) => *slot = (s, b, k),
                _ => {
                    tracing::debug!(?names, "SCRFD outputs unnamed; using export order");
                    return Self([(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
                }
            }
        }
        Self(slots)
    }
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    layout: OutputLayout,
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if names.len() < 9 {
            return Err(DetectorError::UnexpectedOutputs(names.len()));
        }
        let layout = OutputLayout::resolve(&names);

        tracing::info!(path = model_path, outputs = ?names, "loaded SCRFD model");

        Ok(Self { session, layout })
    }

    /// Detect faces in an RGB image, highest score first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let (input, letterbox) = preprocess(image);
        let layout = self.layout;

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx, kps_idx)) in STRIDES.iter().zip(layout.0.iter()) {
            let extract = |idx: usize, what: &'static str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };
            let level = LevelOutputs {
                scores: extract(score_idx, "scores")?,
                boxes: extract(bbox_idx, "boxes")?,
                keypoints: extract(kps_idx, "keypoints")?,
            };
            candidates.extend(decode_level(&level, stride, &letterbox, SCORE_THRESHOLD));
        }

        Ok(non_max_suppression(candidates, NMS_IOU))
    }
}

/// Letterbox into a 1×3×640×640 tensor normalised for SCRFD.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height(), INPUT_SIZE);
    let new_w = ((image.width() as f32 * letterbox.scale).round() as u32).clamp(1, INPUT_SIZE);
    let new_h = ((image.height() as f32 * letterbox.scale).round() as u32).clamp(1, INPUT_SIZE);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    // Padding normalises to 0.0.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let (ox, oy) = (letterbox.pad_x as u32, letterbox.pad_y as u32);

    for (x, y, px) in resized.enumerate_pixels() {
        let (tx, ty) = ((x + ox) as usize, (y + oy) as usize);
        if tx >= size || ty >= size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (px.0[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }

    (tensor, letterbox)
}

struct LevelOutputs<'a> {
    scores: &'a [f32],
    boxes: &'a [f32],
    keypoints: &'a [f32],
}

/// Decode anchors for one stride. Box offsets are distances from the anchor
/// centre to each edge, in units of the stride.
fn decode_level(
    level: &LevelOutputs<'_>,
    stride: u32,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Detection> {
    let cells = INPUT_SIZE / stride;
    let s = stride as f32;
    let mut out = Vec::new();

    for (anchor, &score) in level.scores.iter().enumerate() {
        if score <= threshold {
            continue;
        }
        let Some(d) = level.boxes.get(anchor * 4..anchor * 4 + 4) else {
            continue;
        };

        let cell = (anchor / ANCHORS_PER_CELL) as u32;
        let cx = (cell % cells) as f32 * s;
        let cy = (cell / cells) as f32 * s;

        let (x1, y1) = letterbox.unmap(cx - d[0] * s, cy - d[1] * s);
        let (x2, y2) = letterbox.unmap(cx + d[2] * s, cy + d[3] * s);

        let landmarks: Option<[(f32, f32); 5]> =
            level.keypoints.get(anchor * 10..anchor * 10 + 10).map(|k| {
                std::array::from_fn(|i| letterbox.unmap(cx + k[2 * i] * s, cy + k[2 * i + 1] * s))
            });

        out.push(Detection {
            x1,
            y1,
            x2,
            y2,
            score,
            landmarks,
        });
    }

    out
}

/// Greedy NMS. Returns survivors sorted by descending score.
fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, w: f32, h: f32, score: f32) -> Detection {
        Detection {
            x1: x,
            y1: y,
            x2: x + w,
            y2: y + h,
            score,
            landmarks: None,
        }
    }

    #[test]
    fn test_iou() {
        let a = det(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&det(20.0, 20.0, 10.0, 10.0, 1.0)), 0.0);
        // 5x10 overlap over a 150 union.
        let b = det(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping_pair() {
        let kept = non_max_suppression(
            vec![
                det(5.0, 5.0, 100.0, 100.0, 0.8),
                det(200.0, 200.0, 50.0, 50.0, 0.7),
                det(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            NMS_IOU,
        );
        let scores: Vec<f32> = kept.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(non_max_suppression(Vec::new(), NMS_IOU).is_empty());
    }

    #[test]
    fn test_letterbox_unmap_recovers_source_point() {
        let lb = Letterbox::fit(320, 240, INPUT_SIZE);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);

        let (x, y) = lb.unmap(100.0 * lb.scale + lb.pad_x, 50.0 * lb.scale + lb.pad_y);
        assert!((x - 100.0).abs() < 1e-4);
        assert!((y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_output_layout_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(
            OutputLayout::resolve(&names),
            OutputLayout([(2, 0, 1), (5, 3, 4), (8, 6, 7)])
        );
    }

    #[test]
    fn test_output_layout_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(
            OutputLayout::resolve(&names),
            OutputLayout([(0, 3, 6), (1, 4, 7), (2, 5, 8)])
        );
    }

    #[test]
    fn test_decode_level_single_anchor() {
        // Stride 32 grid is 20x20 with 2 anchors per cell; light up anchor 3
        // (cell 1 → x = 32, y = 0).
        let stride = 32u32;
        let anchors = (INPUT_SIZE / stride).pow(2) as usize * ANCHORS_PER_CELL;
        let mut scores = vec![0.0; anchors];
        scores[3] = 0.9;
        let mut boxes = vec![0.0; anchors * 4];
        boxes[12..16].copy_from_slice(&[0.5, 0.0, 0.5, 1.0]);
        let keypoints = vec![0.0; anchors * 10];

        let identity = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let level = LevelOutputs {
            scores: &scores,
            boxes: &boxes,
            keypoints: &keypoints,
        };
        let dets = decode_level(&level, stride, &identity, SCORE_THRESHOLD);

        assert_eq!(dets.len(), 1);
        assert_eq!(
            dets[0],
            Detection {
                x1: 16.0,
                y1: 0.0,
                x2: 48.0,
                y2: 32.0,
                score: 0.9,
                landmarks: Some([(32.0, 0.0); 5]),
            }
        );
    }

    #[test]
    fn test_preprocess_pads_with_zero_and_normalises() {
        let image = RgbImage::from_pixel(64, 32, image::Rgb([255, 127, 0]));
        let (tensor, lb) = preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(lb.pad_y, 160.0);

        // Padding row.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        // Centre of the image area: channel order preserved.
        let (r, g, b) = (
            tensor[[0, 0, 320, 320]],
            tensor[[0, 1, 320, 320]],
            tensor[[0, 2, 320, 320]],
        );
        assert!((r - (255.0 - PIXEL_MEAN) / PIXEL_STD).abs() < 1e-6);
        assert!((g - (127.0 - PIXEL_MEAN) / PIXEL_STD).abs() < 1e-6);
        assert!((b - (0.0 - PIXEL_MEAN) / PIXEL_STD).abs() < 1e-6);
    }
}
