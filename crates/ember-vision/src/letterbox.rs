use image::{imageops, imageops::FilterType, RgbImage};

use crate::camera::Frame;
use crate::VisionError;

/// Pad fill the model was trained with.
const PAD_FILL: image::Rgb<u8> = image::Rgb([114, 114, 114]);

/// Geometry of one letterbox operation. Maps points between original-frame
/// pixels and the padded model square, exactly invertible up to the clamp at
/// the frame edge.
#[derive(Debug, Clone, Copy)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub square: u32,
    pub frame_w: u32,
    pub frame_h: u32,
}

impl Letterbox {
    pub fn new(frame_w: u32, frame_h: u32, square: u32) -> Self {
        let s = square as f32;
        let scale = (s / frame_h as f32).min(s / frame_w as f32);
        let nw = (frame_w as f32 * scale).round() as u32;
        let nh = (frame_h as f32 * scale).round() as u32;
        Self {
            scale,
            pad_x: ((square - nw.min(square)) / 2) as f32,
            pad_y: ((square - nh.min(square)) / 2) as f32,
            square,
            frame_w,
            frame_h,
        }
    }

    /// Padded-square pixel -> original-frame pixel, clamped to frame bounds.
    pub fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        let fx = ((x - self.pad_x) / self.scale).clamp(0.0, self.frame_w as f32 - 1.0);
        let fy = ((y - self.pad_y) / self.scale).clamp(0.0, self.frame_h as f32 - 1.0);
        (fx, fy)
    }

    /// Original-frame pixel -> padded-square pixel.
    pub fn to_square(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale + self.pad_x, y * self.scale + self.pad_y)
    }

    fn scaled_dims(&self) -> (u32, u32) {
        let nw = (self.frame_w as f32 * self.scale).round() as u32;
        let nh = (self.frame_h as f32 * self.scale).round() as u32;
        (nw.max(1), nh.max(1))
    }
}

/// Aspect-preserving resize into an exactly square-by-square canvas, padded
/// symmetrically with the training fill color.
pub fn letterbox(frame: &Frame, square: u32) -> Result<(RgbImage, Letterbox), VisionError> {
    if frame.w == 0 || frame.h == 0 || frame.rgb.is_empty() {
        return Err(VisionError::EmptyFrame);
    }
    let src = RgbImage::from_raw(frame.w, frame.h, frame.rgb.clone())
        .ok_or(VisionError::EmptyFrame)?;

    let lb = Letterbox::new(frame.w, frame.h, square);
    let (nw, nh) = lb.scaled_dims();
    let resized = imageops::resize(&src, nw, nh, FilterType::Triangle);

    let mut canvas = RgbImage::from_pixel(square, square, PAD_FILL);
    imageops::replace(&mut canvas, &resized, lb.pad_x as i64, lb.pad_y as i64);
    Ok((canvas, lb))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(w: u32, h: u32) -> Frame {
        Frame { w, h, rgb: vec![0u8; (w * h * 3) as usize] }
    }

    #[test]
    fn output_is_exactly_square() {
        for (w, h) in [(640, 480), (800, 450), (320, 320), (100, 900)] {
            let (img, _) = letterbox(&frame(w, h), 320).unwrap();
            assert_eq!((img.width(), img.height()), (320, 320));
        }
    }

    #[test]
    fn transform_round_trips_within_one_pixel() {
        for (w, h) in [(640u32, 480u32), (800, 450), (1280, 720), (317, 211)] {
            let lb = Letterbox::new(w, h, 320);
            for (x, y) in [
                (0.0f32, 0.0f32),
                (w as f32 / 2.0, h as f32 / 2.0),
                (w as f32 - 1.0, h as f32 - 1.0),
                (17.0, 3.0),
            ] {
                let (sx, sy) = lb.to_square(x, y);
                let (bx, by) = lb.to_frame(sx, sy);
                assert!((bx - x).abs() <= 1.0, "x {x} -> {bx} ({w}x{h})");
                assert!((by - y).abs() <= 1.0, "y {y} -> {by} ({w}x{h})");
            }
        }
    }

    #[test]
    fn inverse_clamps_to_frame_bounds() {
        let lb = Letterbox::new(640, 480, 320);
        // points inside the pad band map to the frame edge, not outside it
        let (x, y) = lb.to_frame(-50.0, -50.0);
        assert_eq!((x, y), (0.0, 0.0));
        let (x, y) = lb.to_frame(1000.0, 1000.0);
        assert_eq!((x, y), (639.0, 479.0));
    }

    #[test]
    fn empty_frame_is_rejected() {
        let f = Frame { w: 0, h: 0, rgb: vec![] };
        assert!(matches!(letterbox(&f, 320), Err(VisionError::EmptyFrame)));
    }
}
