//! Overlay configuration

use crate::element::ElementKind;
use crate::OverlayError;
use chrono::format::{Item, StrftimeItems};
use serde::Deserialize;
use std::collections::HashSet;

/// Which corner of the plate `x`/`y` refer to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    /// `x` is the left edge
    TopLeft,
    /// `x` is the right edge
    TopRight,
}

/// Text size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FontSize {
    /// ProFont 24 pt
    Large,
    /// 10x20 fixed
    Small,
}

/// Unit for the speed read-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedUnit {
    /// Miles per hour
    Mph,
    /// Kilometres per hour
    Kph,
}

impl SpeedUnit {
    /// Suffix drawn after the number
    pub fn label(&self) -> &'static str {
        match self {
            SpeedUnit::Mph => "MPH",
            SpeedUnit::Kph => "KM/H",
        }
    }
}

/// Where the speed read-out comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedSource {
    /// Ground speed from the position fix
    Position,
    /// Vehicle speed from the bus
    Bus,
}

/// Unit for the fuel read-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuelUnit {
    /// US gallons
    Gallons,
    /// Litres
    Liters,
}

impl FuelUnit {
    /// Suffix drawn after the number
    pub fn label(&self) -> &'static str {
        match self {
            FuelUnit::Gallons => "gal",
            FuelUnit::Liters => "L",
        }
    }
}

/// One overlay element
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElementConfig {
    /// What the element shows
    pub kind: ElementKind,
    /// Horizontal position of the anchor corner (video pixels)
    pub x: i32,
    /// Vertical position of the top edge (video pixels)
    pub y: i32,
    /// Corner `x` refers to
    pub anchor: Anchor,
    /// Minimum change before a numeric element is re-rendered, in display
    /// units. Ignored by clock, date and recording.
    pub threshold: f64,
    /// Text size
    pub font: FontSize,
}

/// Plate appearance shared by all elements
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StyleConfig {
    /// Glyph colour (RGB)
    pub text_color: [u8; 3],
    /// Plate colour (RGB)
    pub background_color: [u8; 3],
    /// Plate opacity, 0 (clear) to 255 (solid)
    pub background_alpha: u8,
    /// Draw a 1 px outline around glyphs
    pub outline: bool,
    /// Outline colour (RGB)
    pub outline_color: [u8; 3],
    /// Recording disc colour
    pub recording_color: [u8; 3],
    /// Space between text and plate edge (pixels)
    pub padding: u32,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            text_color: [255, 255, 255],
            background_color: [0, 0, 0],
            background_alpha: 128,
            outline: true,
            outline_color: [0, 0, 0],
            recording_color: [255, 0, 0],
            padding: 5,
        }
    }
}

/// Overlay configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverlayConfig {
    /// Elements in z-order, later ones drawn over earlier ones
    pub elements: Vec<ElementConfig>,
    /// Plate appearance
    pub style: StyleConfig,
    /// strftime format for the clock
    pub time_format: String,
    /// strftime format for the date
    pub date_format: String,
    /// Unit for the speed read-out
    pub speed_unit: SpeedUnit,
    /// Position or bus speed
    pub speed_source: SpeedSource,
    /// Unit for the fuel read-out
    pub fuel_unit: FuelUnit,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        let element = |kind, x, y, anchor, threshold, font| ElementConfig {
            kind,
            x,
            y,
            anchor,
            threshold,
            font,
        };
        Self {
            elements: vec![
                element(ElementKind::Clock, 20, 20, Anchor::TopLeft, 0.0, FontSize::Large),
                element(ElementKind::Date, 20, 60, Anchor::TopLeft, 0.0, FontSize::Small),
                element(ElementKind::Speed, 20, 100, Anchor::TopLeft, 0.5, FontSize::Large),
                element(ElementKind::Position, 20, 140, Anchor::TopLeft, 0.000001, FontSize::Small),
                element(ElementKind::Fuel, 20, 180, Anchor::TopLeft, 0.001, FontSize::Large),
                element(ElementKind::Recording, 1900, 20, Anchor::TopRight, 0.0, FontSize::Large),
            ],
            style: StyleConfig::default(),
            time_format: "%H:%M:%S".to_string(),
            date_format: "%Y-%m-%d".to_string(),
            speed_unit: SpeedUnit::Mph,
            speed_source: SpeedSource::Position,
            fuel_unit: FuelUnit::Gallons,
        }
    }
}

fn invalid(field: &'static str, reason: String) -> OverlayError {
    OverlayError::InvalidConfig { field, reason }
}

fn check_strftime(field: &'static str, format: &str) -> Result<(), OverlayError> {
    if format.is_empty() {
        return Err(invalid(field, "empty format".to_string()));
    }
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(invalid(field, format!("bad strftime format {:?}", format)));
    }
    Ok(())
}

impl OverlayConfig {
    /// Check thresholds, formats and that every anchor lies on a
    /// `width` x `height` video frame
    pub fn validate(&self, width: u32, height: u32) -> Result<(), OverlayError> {
        let mut seen = HashSet::new();
        for (i, element) in self.elements.iter().enumerate() {
            if !seen.insert(element.kind) {
                return Err(invalid(
                    "overlay.elements",
                    format!("{} listed more than once", element.kind),
                ));
            }
            if !element.threshold.is_finite() || element.threshold < 0.0 {
                return Err(invalid(
                    "overlay.elements.threshold",
                    format!("element {} ({}): {} is negative or not finite", i, element.kind, element.threshold),
                ));
            }
            let on_screen = element.x >= 0
                && element.y >= 0
                && (element.x as u32) < width
                && (element.y as u32) < height;
            if !on_screen {
                return Err(invalid(
                    "overlay.elements.position",
                    format!(
                        "element {} ({}) at ({}, {}) is outside {}x{}",
                        i, element.kind, element.x, element.y, width, height
                    ),
                ));
            }
        }

        check_strftime("overlay.time_format", &self.time_format)?;
        check_strftime("overlay.date_format", &self.date_format)?;
        Ok(())
    }
}
