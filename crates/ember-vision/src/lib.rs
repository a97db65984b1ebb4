mod nms;
pub mod camera;
pub mod letterbox;
#[cfg(feature = "vision-tflite")]
pub mod tflite;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use letterbox::Letterbox;

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("empty input frame")]
    EmptyFrame,
    #[error("model output layout mismatch: {0}")]
    BadOutput(String),
}

/// One surviving detection, corner box in original-frame pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: i32,
    pub conf: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    pub enable: bool,
    pub model_path: String,

    pub input_size: u32,
    pub num_classes: usize,
    pub class_names: Vec<String>,

    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

/// Aim point in the detector's input square, normalized to [0,1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AimTarget {
    pub found: bool,
    pub cx: f32,
    pub cy: f32,
}

impl Default for AimTarget {
    fn default() -> Self {
        Self { found: false, cx: 0.5, cy: 0.5 }
    }
}

pub trait Detector: Send {
    fn input_size(&self) -> u32;
    fn detect(&mut self, frame: &camera::Frame) -> Result<Vec<Detection>>;
}

/// Decode a channel-major model output: rows 0..4 are cx/cy/w/h in padded
/// pixels, rows 4.. are per-class scores, one column per anchor. Anchors
/// survive only with max class score strictly above the threshold; boxes are
/// mapped back to frame coordinates through the letterbox transform.
pub fn postprocess(
    raw: &[f32],
    num_preds: usize,
    num_classes: usize,
    conf_th: f32,
    lb: &Letterbox,
) -> Vec<Detection> {
    let stride = 4 + num_classes;
    let mut out = Vec::new();
    if num_preds == 0 || raw.len() < stride * num_preds {
        return out;
    }
    let at = |c: usize, i: usize| raw[c * num_preds + i];

    for i in 0..num_preds {
        let mut best_c = 0usize;
        let mut best_p = 0.0f32;
        for c in 0..num_classes {
            let p = at(4 + c, i);
            if p > best_p {
                best_p = p;
                best_c = c;
            }
        }
        if best_p <= conf_th {
            continue;
        }
        let (cx, cy) = (at(0, i), at(1, i));
        let (w, h) = (at(2, i), at(3, i));
        let (x1, y1) = lb.to_frame(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = lb.to_frame(cx + w / 2.0, cy + h / 2.0);
        out.push(Detection { class_id: best_c as i32, conf: best_p, x1, y1, x2, y2 });
    }
    out
}

/// Greedy NMS: highest confidence first, drop anything overlapping a kept
/// box beyond the IoU threshold.
pub fn nms_filter(mut dets: Vec<Detection>, iou_th: f32, max_det: usize) -> Vec<Detection> {
    dets.sort_by(|a, b| b.conf.partial_cmp(&a.conf).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept: Vec<Detection> = Vec::new();

    'outer: for d in dets {
        for k in &kept {
            if nms::iou(&d, k) > iou_th {
                continue 'outer;
            }
        }
        kept.push(d);
        if kept.len() >= max_det {
            break;
        }
    }
    kept
}

/// Single-target policy: the most confident surviving detection is the aim
/// target. Its frame-space center is mapped forward into the padded square
/// and normalized by the square side.
pub fn select_target(dets: &[Detection], lb: &Letterbox) -> AimTarget {
    let Some(best) = dets.first() else {
        return AimTarget::default();
    };
    let fx = (best.x1 + best.x2) / 2.0;
    let fy = (best.y1 + best.y2) / 2.0;
    let (sx, sy) = lb.to_square(fx, fy);
    let s = lb.square as f32;
    AimTarget {
        found: true,
        cx: (sx / s).clamp(0.0, 1.0),
        cy: (sy / s).clamp(0.0, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, conf: f32) -> Detection {
        Detection { class_id: 0, conf, x1, y1, x2, y2 }
    }

    #[test]
    fn nms_drops_near_duplicate() {
        let dets = vec![
            det(10.0, 10.0, 50.0, 50.0, 0.9),
            det(12.0, 12.0, 52.0, 52.0, 0.85),
        ];
        let kept = nms_filter(dets, 0.45, 100);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].conf, 0.9);
    }

    #[test]
    fn nms_output_respects_iou_bound() {
        let dets = vec![
            det(0.0, 0.0, 100.0, 100.0, 0.9),
            det(10.0, 10.0, 110.0, 110.0, 0.8),
            det(200.0, 200.0, 260.0, 260.0, 0.7),
            det(205.0, 205.0, 265.0, 265.0, 0.6),
            det(50.0, 50.0, 150.0, 150.0, 0.5),
        ];
        let kept = nms_filter(dets, 0.45, 100);
        for i in 0..kept.len() {
            for j in (i + 1)..kept.len() {
                assert!(nms::iou(&kept[i], &kept[j]) <= 0.45);
            }
        }
        // ordered highest-confidence first
        for w in kept.windows(2) {
            assert!(w[0].conf >= w[1].conf);
        }
    }

    #[test]
    fn confidence_filter_is_strict() {
        // Two anchors, one class, identity letterbox. Scores land exactly at
        // and just above the threshold; only the latter may survive.
        let lb = Letterbox::new(320, 320, 320);
        let num_preds = 2;
        let mut raw = vec![0.0f32; 5 * num_preds];
        for i in 0..num_preds {
            raw[num_preds + i] = 160.0; // cy
            raw[i] = 160.0; // cx
            raw[2 * num_preds + i] = 20.0; // w
            raw[3 * num_preds + i] = 20.0; // h
        }
        raw[4 * num_preds] = 0.40; // == threshold, must be dropped
        raw[4 * num_preds + 1] = 0.41;

        let dets = postprocess(&raw, num_preds, 1, 0.40, &lb);
        assert_eq!(dets.len(), 1);
        assert!(dets.iter().all(|d| d.conf > 0.40));
    }

    #[test]
    fn target_is_most_confident_detection() {
        let lb = Letterbox::new(320, 320, 320);
        let dets = nms_filter(
            vec![
                det(0.0, 0.0, 40.0, 40.0, 0.6),
                det(280.0, 280.0, 320.0, 320.0, 0.95),
            ],
            0.45,
            100,
        );
        let t = select_target(&dets, &lb);
        assert!(t.found);
        assert!(t.cx > 0.5 && t.cy > 0.5);
    }

    #[test]
    fn no_detections_yields_centered_default() {
        let lb = Letterbox::new(640, 480, 320);
        let t = select_target(&[], &lb);
        assert!(!t.found);
        assert_eq!((t.cx, t.cy), (0.5, 0.5));
    }
}
