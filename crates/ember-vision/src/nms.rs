use crate::Detection;

pub fn iou(a: &Detection, b: &Detection) -> f32 {
    let ix_a = a.x1.max(b.x1);
    let iy_a = a.y1.max(b.y1);
    let ix_b = a.x2.min(b.x2);
    let iy_b = a.y2.min(b.y2);

    let iw = (ix_b - ix_a).max(0.0);
    let ih = (iy_b - iy_a).max(0.0);
    let inter = iw * ih;
    let a1 = (a.x2 - a.x1).max(0.0) * (a.y2 - a.y1).max(0.0);
    let a2 = (b.x2 - b.x1).max(0.0) * (b.y2 - b.y1).max(0.0);
    let union = a1 + a2 - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}
