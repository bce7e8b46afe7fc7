//! Square resize plus ImageNet normalization into a flat CHW buffer.

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// An image resized to the model input, with the factors mapping model pixels back
/// to source pixels.
#[derive(Debug, Clone)]
pub struct Prepared {
    /// `3 * size * size` values, channel-major.
    pub chw: Vec<f32>,
    pub size: u32,
    /// Source width / size, source height / size.
    pub scale_back: (f32, f32),
}

/// Resize without letterboxing; aspect ratio is not preserved.
pub fn resize_square(img: &RgbImage, size: u32) -> RgbImage {
    if img.dimensions() == (size, size) {
        return img.clone();
    }
    imageops::resize(img, size, size, FilterType::Triangle)
}

pub fn normalize_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let mut out = Vec::with_capacity((3 * width * height) as usize);
    for c in 0..3 {
        for y in 0..height {
            for x in 0..width {
                let v = img.get_pixel(x, y)[c] as f32 / 255.0;
                out.push((v - IMAGENET_MEAN[c]) / IMAGENET_STD[c]);
            }
        }
    }
    out
}

pub fn prepare(img: &DynamicImage, size: u32) -> Prepared {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let resized = resize_square(&rgb, size);
    Prepared {
        chw: normalize_chw(&resized),
        size,
        scale_back: (width as f32 / size as f32, height as f32 / size as f32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn prepare_resizes_and_normalizes() {
        let img = RgbImage::from_fn(64, 32, |_, _| Rgb([255, 255, 255]));
        let prepared = prepare(&DynamicImage::ImageRgb8(img), 16);
        assert_eq!(prepared.chw.len(), 3 * 16 * 16);
        assert_eq!(prepared.scale_back, (4.0, 2.0));
        let expected = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        assert!((prepared.chw[0] - expected).abs() < 1e-5);
        let blue = (1.0 - IMAGENET_MEAN[2]) / IMAGENET_STD[2];
        assert!((prepared.chw[2 * 256] - blue).abs() < 1e-5);
    }
}
