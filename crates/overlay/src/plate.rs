//! Text plate rendering
//!
//! A plate is an RGBA image holding one line of monospaced text on a
//! semi-transparent background. Glyphs are opaque; the background carries the
//! configured alpha so the video shows through around the text.

use crate::config::{FontSize, StyleConfig};
use embedded_graphics::{
    mono_font::{ascii::FONT_10X20, MonoFont, MonoTextStyle},
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{Circle, PrimitiveStyle},
    text::{Baseline, Text},
};
use image::{Rgba, RgbaImage};
use profont::PROFONT_24_POINT;
use std::convert::Infallible;

const OUTLINE_OFFSETS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Resolved plate appearance
#[derive(Clone, Copy)]
pub struct PlateStyle {
    pub font: &'static MonoFont<'static>,
    pub text: Rgb888,
    pub background: Rgba<u8>,
    pub outline: Option<Rgb888>,
    pub padding: u32,
}

fn rgb(c: [u8; 3]) -> Rgb888 {
    Rgb888::new(c[0], c[1], c[2])
}

impl PlateStyle {
    /// Resolve configured colours and the font for `size`
    pub fn new(style: &StyleConfig, size: FontSize) -> Self {
        let font: &'static MonoFont<'static> = match size {
            FontSize::Large => &PROFONT_24_POINT,
            FontSize::Small => &FONT_10X20,
        };
        let [r, g, b] = style.background_color;
        Self {
            font,
            text: rgb(style.text_color),
            background: Rgba([r, g, b, style.background_alpha]),
            outline: style.outline.then(|| rgb(style.outline_color)),
            padding: style.padding,
        }
    }

    /// Pixel size of `text` without padding
    pub fn text_size(&self, text: &str) -> Size {
        let chars = text.chars().count() as u32;
        let glyph = self.font.character_size;
        let width = if chars == 0 {
            0
        } else {
            chars * glyph.width + (chars - 1) * self.font.character_spacing
        };
        Size::new(width, glyph.height)
    }
}

/// Draw target over an RGBA plate; drawn pixels are opaque
struct Canvas<'a>(&'a mut RgbaImage);

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
            if point.x < 0 || point.y < 0 {
                continue;
            }
            let (x, y) = (point.x as u32, point.y as u32);
            if x < width && y < height {
                self.0.put_pixel(x, y, Rgba([color.r(), color.g(), color.b(), 255]));
            }
        }
        Ok(())
    }
}

/// Render one line of text onto a background plate.
///
/// `marker` draws a filled disc of that colour before the text, used by the
/// recording indicator.
pub fn render_plate(text: &str, style: &PlateStyle, marker: Option<Rgb888>) -> RgbaImage {
    let text_size = style.text_size(text);
    let border = if style.outline.is_some() { 1 } else { 0 };
    let marker_width = if marker.is_some() {
        text_size.height + style.padding
    } else {
        0
    };

    let width = style.padding * 2 + border * 2 + marker_width + text_size.width;
    let height = style.padding * 2 + border * 2 + text_size.height;
    let mut plate = RgbaImage::from_pixel(width, height, style.background);
    let mut canvas = Canvas(&mut plate);

    let inner = Point::new((style.padding + border) as i32, (style.padding + border) as i32);

    if let Some(color) = marker {
        let diameter = text_size.height * 3 / 4;
        let top_left = inner + Point::new(0, ((text_size.height - diameter) / 2) as i32);
        Circle::new(top_left, diameter)
            .into_styled(PrimitiveStyle::with_fill(color))
            .draw(&mut canvas)
            .ok();
    }

    let origin = inner + Point::new(marker_width as i32, 0);
    if let Some(outline) = style.outline {
        let outline_style = MonoTextStyle::new(style.font, outline);
        for (dx, dy) in OUTLINE_OFFSETS {
            Text::with_baseline(text, origin + Point::new(dx, dy), outline_style, Baseline::Top)
                .draw(&mut canvas)
                .ok();
        }
    }
    Text::with_baseline(text, origin, MonoTextStyle::new(style.font, style.text), Baseline::Top)
        .draw(&mut canvas)
        .ok();

    plate
}
