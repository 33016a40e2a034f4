//! Text and clock rendering onto a 32×32 canvas.
//!
//! Text is drawn with the fixed-width ASCII fonts of `embedded-graphics`,
//! centred on the panel. The result is a plain `RgbImage` that goes through
//! the usual raster pipeline like any other picture.

use std::convert::Infallible;

use chrono::Timelike;
use embedded_graphics::mono_font::{MonoFont, MonoTextStyle, ascii};
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Alignment, Baseline, Text, TextStyleBuilder};
use image::{Rgb, RgbImage};
use tracing::debug;

use crate::protocol::constants::{DISPLAY_HEIGHT, DISPLAY_WIDTH};

pub const DEFAULT_TEXT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const DEFAULT_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
pub const DEFAULT_FONT_SIZE: u32 = 12;
pub const CLOCK_COLOR: Rgb<u8> = Rgb([226, 232, 255]);

/// Fonts ordered by glyph height.
const FONTS: [&MonoFont<'static>; 7] = [
    &ascii::FONT_4X6,
    &ascii::FONT_5X8,
    &ascii::FONT_6X10,
    &ascii::FONT_6X12,
    &ascii::FONT_7X13,
    &ascii::FONT_9X15,
    &ascii::FONT_10X20,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextStyle {
    pub color: Rgb<u8>,
    pub background: Rgb<u8>,
    /// Glyph height in pixels; the tallest font not above it is used.
    pub font_size: u32,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            color: DEFAULT_TEXT_COLOR,
            background: DEFAULT_BACKGROUND,
            font_size: DEFAULT_FONT_SIZE,
        }
    }
}

impl TextStyle {
    pub fn clock() -> Self {
        Self {
            color: CLOCK_COLOR,
            ..Self::default()
        }
    }
}

/// Tallest font whose glyphs fit in `font_size` rows, or the smallest one.
pub fn font_for_size(font_size: u32) -> &'static MonoFont<'static> {
    FONTS
        .iter()
        .rev()
        .find(|font| font.character_size.height <= font_size)
        .copied()
        .unwrap_or(FONTS[0])
}

struct Canvas<'a>(&'a mut RgbImage);

impl OriginDimensions for Canvas<'_> {
    fn size(&self) -> Size {
        Size::new(self.0.width(), self.0.height())
    }
}

impl DrawTarget for Canvas<'_> {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let (width, height) = self.0.dimensions();
        for Pixel(point, color) in pixels {
            let (Ok(x), Ok(y)) = (u32::try_from(point.x), u32::try_from(point.y)) else {
                continue;
            };
            if x < width && y < height {
                self.0.put_pixel(x, y, Rgb([color.r(), color.g(), color.b()]));
            }
        }
        Ok(())
    }
}

fn to_rgb888(color: Rgb<u8>) -> Rgb888 {
    let Rgb([r, g, b]) = color;
    Rgb888::new(r, g, b)
}

/// Renders `text` centred on a panel-sized canvas. Glyphs past the edge are
/// clipped.
pub fn render_text(text: &str, style: &TextStyle) -> RgbImage {
    let mut image = RgbImage::from_pixel(DISPLAY_WIDTH, DISPLAY_HEIGHT, style.background);
    let font = font_for_size(style.font_size);
    debug!(
        text,
        glyph_width = font.character_size.width,
        glyph_height = font.character_size.height,
        "Rendering text"
    );

    let character_style = MonoTextStyle::new(font, to_rgb888(style.color));
    let layout = TextStyleBuilder::new()
        .alignment(Alignment::Center)
        .baseline(Baseline::Middle)
        .build();
    let centre = Point::new(DISPLAY_WIDTH as i32 / 2, DISPLAY_HEIGHT as i32 / 2);

    let mut canvas = Canvas(&mut image);
    Text::with_text_style(text, centre, character_style, layout)
        .draw(&mut canvas)
        .unwrap_or_else(|never| match never {});
    image
}

/// `HH:MM` in the clock colour on black.
pub fn render_clock<T: Timelike>(time: &T) -> RgbImage {
    let label = format!("{:02}:{:02}", time.hour(), time.minute());
    render_text(&label, &TextStyle::clock())
}
