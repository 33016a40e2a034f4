//! Image preprocessing: fit, rotate, dim, encode.
//!
//! Frames are tiny fixed-size images, so PNG encoding uses the fastest
//! compression and no row filtering.

use std::fmt;

use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::protocol::constants::{DISPLAY_HEIGHT, DISPLAY_WIDTH};

#[derive(Error, Debug)]
pub enum RasterError {
    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid rotation {0}; expected 0, 90, 180 or 270")]
pub struct InvalidRotation(pub u16);

/// Mounting orientation of the panel, in clockwise degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub const fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

impl TryFrom<u16> for Rotation {
    type Error = InvalidRotation;

    fn try_from(degrees: u16) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(InvalidRotation(other)),
        }
    }
}

impl From<Rotation> for u16 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Resize to the panel resolution if needed and drop any alpha channel.
pub fn fit_to_display(image: &DynamicImage) -> RgbImage {
    let rgb = image.to_rgb8();
    if rgb.dimensions() == (DISPLAY_WIDTH, DISPLAY_HEIGHT) {
        return rgb;
    }
    debug!(
        width = rgb.width(),
        height = rgb.height(),
        "Resizing to display resolution"
    );
    imageops::resize(&rgb, DISPLAY_WIDTH, DISPLAY_HEIGHT, FilterType::Lanczos3)
}

/// Rotate by the negated mounting angle (clockwise), growing the canvas so
/// nothing is cropped.
pub fn rotate(image: RgbImage, rotation: Rotation) -> RgbImage {
    match rotation {
        Rotation::Deg0 => image,
        Rotation::Deg90 => imageops::rotate90(&image),
        Rotation::Deg180 => imageops::rotate180(&image),
        Rotation::Deg270 => imageops::rotate270(&image),
    }
}

/// Scale every channel linearly: `out = floor(c * factor)`.
///
/// Factors of 1.0 or more leave the image untouched.
pub fn scale_brightness(image: &mut RgbImage, factor: f32) {
    if factor >= 1.0 {
        return;
    }
    let factor = factor.max(0.0);
    for channel in image.iter_mut() {
        *channel = (*channel as f32 * factor) as u8;
    }
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, RasterError> {
    let mut buf = Vec::new();
    PngEncoder::new_with_quality(&mut buf, CompressionType::Fast, PngFilter::NoFilter).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buf)
}

/// Full pipeline from caller image to frame payload.
pub fn prepare(
    image: &DynamicImage,
    rotation: Rotation,
    brightness: f32,
) -> Result<Vec<u8>, RasterError> {
    let mut rgb = rotate(fit_to_display(image), rotation);
    scale_brightness(&mut rgb, brightness);
    let png = encode_png(&rgb)?;
    debug!(rotation = %rotation, brightness, bytes = png.len(), "Image encoded");
    Ok(png)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const RED: Rgb<u8> = Rgb([255, 0, 0]);
    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    fn gradient() -> RgbImage {
        RgbImage::from_fn(DISPLAY_WIDTH, DISPLAY_HEIGHT, |x, y| {
            Rgb([(x * 8) as u8, (y * 8) as u8, 200])
        })
    }

    fn marked(width: u32, height: u32) -> RgbImage {
        let mut image = RgbImage::from_pixel(width, height, BLACK);
        image.put_pixel(0, 0, RED);
        image
    }

    #[test]
    fn test_rotate_zero_is_identity() {
        let image = gradient();
        assert_eq!(rotate(image.clone(), Rotation::Deg0), image);
    }

    #[test]
    fn test_rotation_is_clockwise_and_expands() {
        let rotated = rotate(marked(4, 2), Rotation::Deg90);
        assert_eq!(rotated.dimensions(), (2, 4));
        assert_eq!(*rotated.get_pixel(1, 0), RED);

        let rotated = rotate(marked(4, 2), Rotation::Deg180);
        assert_eq!(rotated.dimensions(), (4, 2));
        assert_eq!(*rotated.get_pixel(3, 1), RED);

        let rotated = rotate(marked(4, 2), Rotation::Deg270);
        assert_eq!(rotated.dimensions(), (2, 4));
        assert_eq!(*rotated.get_pixel(0, 3), RED);
    }

    #[test]
    fn test_full_brightness_is_identity() {
        let original = gradient();
        let mut image = original.clone();
        scale_brightness(&mut image, 1.0);
        assert_eq!(image, original);
    }

    #[test]
    fn test_half_brightness_on_white() {
        let mut image = RgbImage::from_pixel(DISPLAY_WIDTH, DISPLAY_HEIGHT, Rgb([255, 255, 255]));
        scale_brightness(&mut image, 0.5);
        assert!(image.pixels().all(|p| *p == Rgb([127, 127, 127])));
    }

    #[test]
    fn test_brightness_scales_each_channel() {
        let mut image = RgbImage::from_pixel(1, 1, Rgb([200, 100, 10]));
        scale_brightness(&mut image, 0.25);
        assert_eq!(*image.get_pixel(0, 0), Rgb([50, 25, 2]));
    }

    #[test]
    fn test_fit_to_display() {
        let big = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, RED));
        let fitted = fit_to_display(&big);
        assert_eq!(fitted.dimensions(), (DISPLAY_WIDTH, DISPLAY_HEIGHT));

        let exact = DynamicImage::ImageRgb8(gradient());
        assert_eq!(fit_to_display(&exact), gradient());
    }

    #[test]
    fn test_fit_drops_alpha() {
        let rgba = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            DISPLAY_WIDTH,
            DISPLAY_HEIGHT,
            image::Rgba([10, 20, 30, 0]),
        ));
        let fitted = fit_to_display(&rgba);
        assert_eq!(*fitted.get_pixel(5, 5), Rgb([10, 20, 30]));
    }

    #[test]
    fn test_prepare_produces_display_png() {
        let source = DynamicImage::ImageRgb8(gradient());
        let png = prepare(&source, Rotation::Deg0, 1.0).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

        let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(decoded, gradient());
    }

    #[test]
    fn test_prepare_applies_rotation_then_brightness() {
        let mut source = RgbImage::from_pixel(DISPLAY_WIDTH, DISPLAY_HEIGHT, BLACK);
        source.put_pixel(0, 0, Rgb([255, 255, 255]));
        let png = prepare(&DynamicImage::ImageRgb8(source), Rotation::Deg90, 0.5).unwrap();

        let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(*decoded.get_pixel(DISPLAY_WIDTH - 1, 0), Rgb([127, 127, 127]));
        assert_eq!(*decoded.get_pixel(0, 0), BLACK);
    }

    #[test]
    fn test_rotation_conversions() {
        for degrees in [0u16, 90, 180, 270] {
            let rotation = Rotation::try_from(degrees).unwrap();
            assert_eq!(u16::from(rotation), degrees);
        }
        assert_eq!(Rotation::try_from(45), Err(InvalidRotation(45)));
        assert_eq!(Rotation::Deg180.to_string(), "180°");
    }
}
