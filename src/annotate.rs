//! Crops post images to 16:9 and stamps a caption panel on them.
//!
//! The caption is derived from the post text, which is expected to look like
//! `Place name (lat, lon) 05 Jan 2023`. The panel coordinates are fixed and
//! assume the large renditions requested from the media host.

use crate::config::ConfigError;
use ab_glyph::{FontArc, PxScale};
use image::{DynamicImage, Pixel, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, Blend};
use log::warn;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

pub const DEFAULT_FONT_PATH: &str = "/usr/share/fonts/truetype/freefont/FreeMonoBold.ttf";

const ASPECT: f64 = 9.0 / 16.0;
const PIXELS_PER_CHAR: i32 = 12;
const RIGHT_MARGIN: i32 = 10;
const PANEL_PADDING: i32 = 25;
const PANEL_TOP: i32 = 1155;
const PANEL_BOTTOM: i32 = 1300;
const PANEL_RIGHT: i32 = 2300;
const PANEL_RADIUS: i32 = 20;
const TOP_LINE_Y: i32 = 1170;
const BOTTOM_LINE_Y: i32 = 1200;
const FONT_SIZE: f32 = 20.0;
const PANEL_FILL: Rgba<u8> = Rgba([255, 255, 255, 176]);
const TEXT_FILL: Rgba<u8> = Rgba([120, 120, 120, 196]);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnnotateError {
    #[error("No date like `05 Jan 2023` in {0:?}")]
    MissingDate(String),
    #[error("No parenthesized coordinates in {0:?}")]
    MissingCoordinates(String),
    #[error("Coordinates must precede the date in {0:?}")]
    Misordered(String),
}

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d\d\s\S\S\S\s\d\d\d\d").unwrap())
}

fn coordinates_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(.*\)").unwrap())
}

/// The two caption lines cut out of a post's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    /// Everything before the coordinates
    pub top_line: String,
    /// Coordinates through the end of the date, without commas
    pub bottom_line: String,
}

impl Label {
    pub fn parse(text: &str) -> Result<Self, AnnotateError> {
        let date = date_regex()
            .find(text)
            .ok_or_else(|| AnnotateError::MissingDate(text.to_string()))?;
        let coordinates = coordinates_regex()
            .find(text)
            .ok_or_else(|| AnnotateError::MissingCoordinates(text.to_string()))?;
        if date.end() < coordinates.start() {
            return Err(AnnotateError::Misordered(text.to_string()));
        }
        Ok(Self {
            top_line: text[..coordinates.start()].to_string(),
            bottom_line: text[coordinates.start()..date.end()].replace(',', ""),
        })
    }

    /// Left edge of both text lines, chosen so the longer line ends near the right border.
    pub fn anchor(&self, image_width: u32) -> i32 {
        let longest = self
            .top_line
            .chars()
            .count()
            .max(self.bottom_line.chars().count()) as i32;
        image_width as i32 - PIXELS_PER_CHAR * longest - RIGHT_MARGIN
    }
}

/// Keeps the full width and the vertically centered `width * 9 / 16` rows.
/// Images that are already wider than 16:9 keep their full height.
pub fn crop_16_9(image: &DynamicImage) -> RgbaImage {
    let (width, height) = (image.width(), image.height());
    let target = ((f64::from(width) * ASPECT).round() as u32).min(height);
    let top = (height - target) / 2;
    image.crop_imm(0, top, width, target).to_rgba8()
}

/// Alpha-blends a filled rounded rectangle spanning the inclusive box `(left, top)..=(right, bottom)`.
pub fn fill_rounded_rect(
    image: &mut RgbaImage,
    (left, top): (i32, i32),
    (right, bottom): (i32, i32),
    radius: i32,
    fill: Rgba<u8>,
) {
    let x_range = left.max(0)..=right.min(image.width() as i32 - 1);
    let y_range = top.max(0)..=bottom.min(image.height() as i32 - 1);
    if x_range.is_empty() || y_range.is_empty() {
        warn!(
            "Label panel ({left}, {top})..({right}, {bottom}) falls outside the {}x{} image",
            image.width(),
            image.height()
        );
        return;
    }
    let radius = radius.min((right - left) / 2).min((bottom - top) / 2).max(0);
    for y in y_range {
        for x in x_range.clone() {
            let cx = x.clamp(left + radius, right - radius);
            let cy = y.clamp(top + radius, bottom - radius);
            let (dx, dy) = (x - cx, y - cy);
            if dx * dx + dy * dy <= radius * radius {
                image.get_pixel_mut(x as u32, y as u32).blend(&fill);
            }
        }
    }
}

pub struct Annotator {
    font: FontArc,
}

impl Annotator {
    pub fn new(font: FontArc) -> Self {
        Self { font }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes =
            std::fs::read(path).map_err(|e| ConfigError::Font(path.to_path_buf(), e.to_string()))?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|e| ConfigError::Font(path.to_path_buf(), e.to_string()))?;
        Ok(Self::new(font))
    }

    /// Crops `image` to 16:9 and draws the caption parsed from `text` onto it.
    /// Text without coordinates and a date is an error; nothing is drawn in that case.
    pub fn annotate(&self, image: &DynamicImage, text: &str) -> Result<RgbaImage, AnnotateError> {
        let label = Label::parse(text)?;
        let mut cropped = crop_16_9(image);
        let anchor = label.anchor(cropped.width());
        fill_rounded_rect(
            &mut cropped,
            (anchor - PANEL_PADDING, PANEL_TOP),
            (PANEL_RIGHT, PANEL_BOTTOM),
            PANEL_RADIUS,
            PANEL_FILL,
        );
        let scale = PxScale::from(FONT_SIZE);
        let mut canvas = Blend(cropped);
        draw_text_mut(
            &mut canvas,
            TEXT_FILL,
            anchor,
            TOP_LINE_Y,
            scale,
            &self.font,
            &label.top_line,
        );
        draw_text_mut(
            &mut canvas,
            TEXT_FILL,
            anchor,
            BOTTOM_LINE_Y,
            scale,
            &self.font,
            &label.bottom_line,
        );
        Ok(canvas.0)
    }
}
