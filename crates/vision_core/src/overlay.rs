use image::{Rgba, RgbaImage};

use crate::interfaces::ImageDetections;

/// Convert an absolute `[x1,y1,x2,y2]` box into pixel coordinates, clamped to image bounds.
pub fn pixel_box(bbox: [f32; 4], dims: (u32, u32)) -> Option<[u32; 4]> {
    let (w, h) = dims;
    if w == 0 || h == 0 {
        return None;
    }
    let clamp = |v: f32, max: u32| -> u32 { v.max(0.0).min((max - 1) as f32) as u32 };
    let x0 = clamp(bbox[0], w);
    let y0 = clamp(bbox[1], h);
    let x1 = clamp(bbox[2], w);
    let y1 = clamp(bbox[3], h);
    if x0 > x1 || y0 > y1 {
        return None;
    }
    Some([x0, y0, x1, y1])
}

/// Draw a rectangle border with given thickness.
pub fn draw_rect(img: &mut RgbaImage, bbox_px: [u32; 4], color: Rgba<u8>, thickness: u32) {
    let (w, h) = img.dimensions();
    let [x0, y0, x1, y1] = bbox_px;
    for t in 0..thickness {
        let xx0 = x0.saturating_add(t);
        let yy0 = y0.saturating_add(t);
        let xx1 = x1.saturating_sub(t);
        let yy1 = y1.saturating_sub(t);
        if xx0 >= w || yy0 >= h || xx1 >= w || yy1 >= h || xx0 > xx1 || yy0 > yy1 {
            continue;
        }
        for x in xx0..=xx1 {
            img.put_pixel(x, yy0, color);
            img.put_pixel(x, yy1, color);
        }
        for y in yy0..=yy1 {
            img.put_pixel(xx0, y, color);
            img.put_pixel(xx1, y, color);
        }
    }
}

/// Stable per-class color so the same label is drawn the same way across images.
pub fn class_color(label: usize) -> Rgba<u8> {
    const PALETTE: [[u8; 3]; 8] = [
        [255, 64, 192],
        [64, 192, 255],
        [255, 196, 0],
        [0, 200, 120],
        [180, 90, 255],
        [255, 96, 64],
        [64, 255, 96],
        [240, 240, 240],
    ];
    let [r, g, b] = PALETTE[label % PALETTE.len()];
    Rgba([r, g, b, 255])
}

/// Draw every detection onto `img`. Boxes are multiplied by `(sx, sy)` first so detections
/// made at model resolution can be drawn on the original image.
pub fn draw_detections(img: &mut RgbaImage, dets: &ImageDetections, scale: (f32, f32)) -> usize {
    let dims = img.dimensions();
    let mut drawn = 0;
    for det in dets.iter() {
        let b = crate::boxes::scale_xyxy(det.bbox, scale.0, scale.1);
        if let Some(px) = pixel_box(b, dims) {
            draw_rect(img, px, class_color(det.label), 2);
            drawn += 1;
        }
    }
    drawn
}
