//! Overlay elements and dirty tracking

use crate::config::{Anchor, ElementConfig};
use image::RgbaImage;
use serde::Deserialize;
use std::fmt;

/// What an element shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    /// Wall-clock time
    Clock,
    /// Calendar date
    Date,
    /// Red disc and `REC` while recording
    Recording,
    /// Road speed in the configured unit
    Speed,
    /// Latitude and longitude
    Position,
    /// Fuel consumed since the last reset
    Fuel,
}

impl ElementKind {
    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Clock => "clock",
            ElementKind::Date => "date",
            ElementKind::Recording => "recording",
            ElementKind::Speed => "speed",
            ElementKind::Position => "position",
            ElementKind::Fuel => "fuel",
        }
    }

    /// Text elements compare exactly, numeric ones by threshold
    pub fn change_rule(&self, threshold: f64) -> ChangeRule {
        match self {
            ElementKind::Clock | ElementKind::Date | ElementKind::Recording => ChangeRule::Exact,
            ElementKind::Speed | ElementKind::Position | ElementKind::Fuel => {
                ChangeRule::Threshold(threshold)
            }
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current value of an element, in display units
#[derive(Debug, Clone, PartialEq)]
pub enum ElementValue {
    /// Formatted clock or date
    Text(String),
    /// Speed or fuel
    Scalar(f64),
    /// Position in degrees
    Coordinates { lat: f64, lon: f64 },
    /// Recording indicator
    Flag(bool),
}

/// When a cached plate is out of date
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChangeRule {
    /// Any difference
    Exact,
    /// Absolute difference strictly greater than the threshold
    Threshold(f64),
}

impl ChangeRule {
    /// Whether `current` should replace `cached`
    pub fn changed(&self, cached: &ElementValue, current: &ElementValue) -> bool {
        match (self, cached, current) {
            (ChangeRule::Threshold(t), ElementValue::Scalar(a), ElementValue::Scalar(b)) => {
                (a - b).abs() > *t
            }
            (
                ChangeRule::Threshold(t),
                ElementValue::Coordinates { lat: lat_a, lon: lon_a },
                ElementValue::Coordinates { lat: lat_b, lon: lon_b },
            ) => (lat_a - lat_b).abs() > *t || (lon_a - lon_b).abs() > *t,
            _ => cached != current,
        }
    }
}

/// One configured element with its render cache
pub struct OverlayElement {
    config: ElementConfig,
    rule: ChangeRule,
    cached: Option<ElementValue>,
    plate: Option<RgbaImage>,
    visible: bool,
    render_count: u64,
}

impl OverlayElement {
    /// Element with an empty cache; dirty until first rendered
    pub fn new(config: ElementConfig) -> Self {
        let rule = config.kind.change_rule(config.threshold);
        Self {
            config,
            rule,
            cached: None,
            plate: None,
            visible: false,
            render_count: 0,
        }
    }

    /// What the element shows
    pub fn kind(&self) -> ElementKind {
        self.config.kind
    }

    /// Placement and threshold
    pub fn config(&self) -> &ElementConfig {
        &self.config
    }

    /// Never rendered, or `current` differs from the cached value under the rule
    pub fn is_dirty(&self, current: &ElementValue) -> bool {
        match &self.cached {
            None => true,
            Some(cached) => self.rule.changed(cached, current),
        }
    }

    /// Replace the cache with a fresh render
    pub fn store(&mut self, value: ElementValue, plate: RgbaImage) {
        self.cached = Some(value);
        self.plate = Some(plate);
        self.render_count += 1;
    }

    /// Value the cached plate was rendered from
    pub fn cached_value(&self) -> Option<&ElementValue> {
        self.cached.as_ref()
    }

    /// Show or hide the cached plate without re-rendering it
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Plate to composite this tick, if any
    pub fn visible_plate(&self) -> Option<&RgbaImage> {
        if self.visible {
            self.plate.as_ref()
        } else {
            None
        }
    }

    /// Times the plate has been rendered
    pub fn render_count(&self) -> u64 {
        self.render_count
    }

    /// Top-left corner of a plate `width` pixels wide
    pub fn origin(&self, width: u32) -> (i32, i32) {
        match self.config.anchor {
            Anchor::TopLeft => (self.config.x, self.config.y),
            Anchor::TopRight => (self.config.x - width as i32, self.config.y),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FontSize;

    fn element(kind: ElementKind, threshold: f64) -> OverlayElement {
        OverlayElement::new(ElementConfig {
            kind,
            x: 100,
            y: 10,
            anchor: Anchor::TopRight,
            threshold,
            font: FontSize::Small,
        })
    }

    #[test]
    fn test_never_rendered_is_dirty() {
        let e = element(ElementKind::Fuel, 0.001);
        assert!(e.is_dirty(&ElementValue::Scalar(0.0)));
        assert_eq!(e.render_count(), 0);
    }

    #[test]
    fn test_fuel_threshold() {
        let mut e = element(ElementKind::Fuel, 0.001);
        e.store(ElementValue::Scalar(2.0005), RgbaImage::new(1, 1));
        assert!(!e.is_dirty(&ElementValue::Scalar(2.0008)));
        assert!(e.is_dirty(&ElementValue::Scalar(2.002)));
        assert!(e.is_dirty(&ElementValue::Scalar(1.999)));
    }

    #[test]
    fn test_exact_text() {
        let mut e = element(ElementKind::Clock, 5.0);
        e.store(ElementValue::Text("12:00:00".to_string()), RgbaImage::new(1, 1));
        assert!(!e.is_dirty(&ElementValue::Text("12:00:00".to_string())));
        assert!(e.is_dirty(&ElementValue::Text("12:00:01".to_string())));
    }

    #[test]
    fn test_coordinates_either_axis() {
        let rule = ChangeRule::Threshold(0.0001);
        let a = ElementValue::Coordinates { lat: 40.0, lon: -75.0 };
        let b = ElementValue::Coordinates { lat: 40.0, lon: -75.0002 };
        let c = ElementValue::Coordinates { lat: 40.00005, lon: -75.0 };
        assert!(rule.changed(&a, &b));
        assert!(!rule.changed(&a, &c));
    }

    #[test]
    fn test_visibility_and_anchor() {
        let mut e = element(ElementKind::Recording, 0.0);
        assert!(e.visible_plate().is_none());
        e.store(ElementValue::Flag(true), RgbaImage::new(30, 10));
        assert!(e.visible_plate().is_none());
        e.set_visible(true);
        assert_eq!(e.visible_plate().map(|p| p.width()), Some(30));
        assert_eq!(e.origin(30), (70, 10));
    }
}
