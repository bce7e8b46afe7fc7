use vision_core::interfaces::{Detection, ImageDetections};
use vision_core::overlay::{class_color, draw_detections, draw_rect, pixel_box};

#[test]
fn pixel_box_and_draw() {
    let bbox = pixel_box([10.0, 40.0, 30.0, 80.0], (100, 200)).expect("bbox");
    assert_eq!(bbox, [10, 40, 30, 80]);

    // Out-of-range coordinates are clamped to the last pixel.
    let clamped = pixel_box([-4.0, -4.0, 500.0, 500.0], (40, 40)).expect("bbox");
    assert_eq!(clamped, [0, 0, 39, 39]);

    let mut img = image::RgbaImage::new(40, 40);
    draw_rect(&mut img, [5, 5, 10, 10], image::Rgba([255, 0, 0, 255]), 2);
    // Expect the four corners to be colored.
    assert_eq!(img.get_pixel(5, 5), &image::Rgba([255, 0, 0, 255]));
    assert_eq!(img.get_pixel(10, 5), &image::Rgba([255, 0, 0, 255]));
    assert_eq!(img.get_pixel(5, 10), &image::Rgba([255, 0, 0, 255]));
    assert_eq!(img.get_pixel(10, 10), &image::Rgba([255, 0, 0, 255]));
    // Interior stays untouched.
    assert_eq!(img.get_pixel(8, 8), &image::Rgba([0, 0, 0, 0]));
}

#[test]
fn draw_detections_scales_boxes() {
    let dets = ImageDetections::from_unsorted(vec![
        Detection {
            bbox: [1.0, 1.0, 4.0, 4.0],
            label: 0,
            score: 0.2,
        },
        Detection {
            bbox: [5.0, 5.0, 9.0, 9.0],
            label: 3,
            score: 0.9,
        },
    ]);
    assert_eq!(dets.scores, vec![0.9, 0.2]);
    assert_eq!(dets.labels, vec![3, 0]);

    let mut img = image::RgbaImage::new(40, 40);
    let drawn = draw_detections(&mut img, &dets, (2.0, 2.0));
    assert_eq!(drawn, 2);
    assert_eq!(img.get_pixel(10, 10), &class_color(3));
    assert_eq!(img.get_pixel(2, 2), &class_color(0));
}
