/// Intersection over union of two `[x1,y1,x2,y2]` boxes. Corner order is normalized first.
pub fn iou_xyxy(a: [f32; 4], b: [f32; 4]) -> f32 {
    let ax0 = a[0].min(a[2]);
    let ay0 = a[1].min(a[3]);
    let ax1 = a[0].max(a[2]);
    let ay1 = a[1].max(a[3]);
    let bx0 = b[0].min(b[2]);
    let by0 = b[1].min(b[3]);
    let bx1 = b[0].max(b[2]);
    let by1 = b[1].max(b[3]);

    let inter_w = (ax1.min(bx1) - ax0.max(bx0)).max(0.0);
    let inter_h = (ay1.min(by1) - ay0.max(by0)).max(0.0);
    let inter_area = inter_w * inter_h;

    let area_a = (ax1 - ax0).max(0.0) * (ay1 - ay0).max(0.0);
    let area_b = (bx1 - bx0).max(0.0) * (by1 - by0).max(0.0);
    let denom = area_a + area_b - inter_area;
    if denom <= 0.0 {
        0.0
    } else {
        inter_area / denom
    }
}

/// Clamp a box into `[0, width] x [0, height]`.
pub fn clip_xyxy(b: [f32; 4], width: f32, height: f32) -> [f32; 4] {
    [
        b[0].clamp(0.0, width),
        b[1].clamp(0.0, height),
        b[2].clamp(0.0, width),
        b[3].clamp(0.0, height),
    ]
}

/// Scale a box by independent x/y factors (e.g. model input size to original image size).
pub fn scale_xyxy(b: [f32; 4], sx: f32, sy: f32) -> [f32; 4] {
    [b[0] * sx, b[1] * sy, b[2] * sx, b[3] * sy]
}
