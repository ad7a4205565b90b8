//! Observational output for the daemon: a status feed for the control
//! interface and, optionally, periodic annotated snapshots on disk.

use crate::engine::{EngineState, EngineStatus};
use image::{Rgb, RgbImage};
use std::path::PathBuf;
use tokio::sync::watch;
use warden_core::{Annotation, DisplaySink, FrameOutcome, RunSummary};
use warden_hw::Frame;

const BOX_THICKNESS: u32 = 2;

pub struct DaemonDisplay {
    status: watch::Sender<EngineStatus>,
    snapshot_path: Option<PathBuf>,
    snapshot_every: u64,
    shown: u64,
}

impl DaemonDisplay {
    pub fn new(
        status: watch::Sender<EngineStatus>,
        snapshot_path: Option<PathBuf>,
        snapshot_every: u64,
    ) -> Self {
        Self {
            status,
            snapshot_path,
            snapshot_every: snapshot_every.max(1),
            shown: 0,
        }
    }

    pub fn running(&self) {
        self.status.send_modify(|s| s.state = EngineState::Running);
    }

    pub fn finish(&self, summary: RunSummary) {
        self.status.send_modify(|s| {
            s.state = EngineState::Stopped;
            s.stats = summary.stats;
            s.summary = Some(summary);
        });
    }

    pub fn fail(&self, error: String) {
        self.status.send_modify(|s| {
            s.state = EngineState::Failed;
            s.error = Some(error);
        });
    }

    fn publish(&self, outcome: &FrameOutcome) {
        self.status.send_modify(|s| {
            s.stats = outcome.stats;
            s.last_decision = Some(outcome.decision.clone());
        });
    }

    fn snapshot_due(&self) -> bool {
        self.snapshot_path.is_some() && self.shown % self.snapshot_every == 0
    }
}

impl DisplaySink<Frame> for DaemonDisplay {
    fn show(&mut self, frame: &Frame, outcome: &FrameOutcome) {
        self.shown += 1;
        self.publish(outcome);

        if !self.snapshot_due() {
            return;
        }
        let Some(path) = self.snapshot_path.as_ref() else {
            return;
        };

        let mut image = frame.to_rgb();
        draw_annotations(&mut image, &outcome.annotations);
        if let Err(e) = image.save(path) {
            tracing::warn!(error = %e, path = %path.display(), "failed to write snapshot");
        }
    }

    fn close(&mut self) {
        tracing::debug!(frames = self.shown, "display closed");
    }
}

/// Draw a hollow box per annotation in its decision colour. Boxes are clipped
/// to the image.
pub fn draw_annotations(image: &mut RgbImage, annotations: &[Annotation]) {
    for annotation in annotations {
        let r = &annotation.region;
        draw_rect(
            image,
            r.left,
            r.top,
            r.right,
            r.bottom,
            Rgb(annotation.color),
        );
    }
}

fn draw_rect(image: &mut RgbImage, left: f32, top: f32, right: f32, bottom: f32, color: Rgb<u8>) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let clamp_x = |v: f32| (v.round().max(0.0) as u32).min(w - 1);
    let clamp_y = |v: f32| (v.round().max(0.0) as u32).min(h - 1);
    let (x0, x1) = (clamp_x(left.min(right)), clamp_x(left.max(right)));
    let (y0, y1) = (clamp_y(top.min(bottom)), clamp_y(top.max(bottom)));

    for t in 0..BOX_THICKNESS {
        for x in x0..=x1 {
            image.put_pixel(x, (y0 + t).min(y1), color);
            image.put_pixel(x, y1.saturating_sub(t).max(y0), color);
        }
        for y in y0..=y1 {
            image.put_pixel((x0 + t).min(x1), y, color);
            image.put_pixel(x1.saturating_sub(t).max(x0), y, color);
        }
    }
}
