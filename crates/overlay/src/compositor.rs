//! Overlay Compositor
//!
//! One call per display tick: work out each element's value, re-render the
//! plates whose value moved, alpha-blend every visible plate onto the video
//! frame in z-order and pack the result into the display's back page.

use crate::config::{FuelUnit, OverlayConfig, SpeedSource, SpeedUnit};
use crate::element::{ElementKind, ElementValue, OverlayElement};
use crate::plate::{render_plate, PlateStyle};
use crate::OverlayError;
use chrono::{DateTime, Local};
use embedded_graphics::pixelcolor::Rgb888;
use image::RgbaImage;
use metrics::counter;
use position::PositionFix;
use present_buffer::PresentationBuffer;
use telemetry::{Margin, TelemetryState, MILES_PER_KM};
use tracing::debug;
use video_capture::VideoFrame;

/// Everything an overlay can show, sampled once per tick
#[derive(Debug, Clone, Copy)]
pub struct OverlayInputs {
    /// Telemetry snapshot
    pub telemetry: TelemetryState,
    /// Position snapshot; `None` when missing or stale
    pub position: Option<PositionFix>,
    /// Whether recording is active
    pub recording: bool,
    /// Wall-clock time for the clock and date
    pub now: DateTime<Local>,
}

/// Blend an RGBA plate onto an RGB24 frame with its top-left corner at
/// (`x`, `y`). Parts outside the frame are clipped.
pub fn blend_plate(frame: &mut VideoFrame, plate: &RgbaImage, x: i32, y: i32) {
    let (pw, ph) = plate.dimensions();
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + pw as i32).min(frame.width as i32);
    let y1 = (y + ph as i32).min(frame.height as i32);
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    for fy in y0..y1 {
        let row = frame.row_mut(fy as u32);
        let py = (fy - y) as u32;
        for fx in x0..x1 {
            let px = plate.get_pixel((fx - x) as u32, py).0;
            let a = px[3] as u32;
            if a == 0 {
                continue;
            }
            let idx = fx as usize * 3;
            for c in 0..3 {
                let f = row[idx + c] as u32;
                row[idx + c] = ((a * px[c] as u32 + (255 - a) * f + 127) / 255) as u8;
            }
        }
    }
}

/// Overlay state for one video output
pub struct Compositor {
    config: OverlayConfig,
    elements: Vec<OverlayElement>,
    mirror: bool,
}

impl Compositor {
    /// Build from a validated configuration. `mirror` flips the video left to
    /// right before the overlay is drawn, so text stays readable.
    pub fn new(config: OverlayConfig, mirror: bool) -> Self {
        let elements = config
            .elements
            .iter()
            .cloned()
            .map(OverlayElement::new)
            .collect();
        Self {
            config,
            elements,
            mirror,
        }
    }

    /// Recompute element values and re-render dirty plates. Returns how many
    /// plates were rendered.
    pub fn update(&mut self, inputs: &OverlayInputs) -> usize {
        let mut rendered = 0;
        for element in &mut self.elements {
            let Some(value) = current_value(element.kind(), inputs, &self.config) else {
                element.set_visible(false);
                continue;
            };

            if element.is_dirty(&value) {
                let text = label(element.kind(), &value, &self.config);
                let style = PlateStyle::new(&self.config.style, element.config().font);
                let marker = match element.kind() {
                    ElementKind::Recording => {
                        let [r, g, b] = self.config.style.recording_color;
                        Some(Rgb888::new(r, g, b))
                    }
                    _ => None,
                };
                let plate = render_plate(&text, &style, marker);
                debug!("Rendered {} overlay: {}", element.kind(), text);
                counter!("overlay_renders_total", "element" => element.kind().as_str()).increment(1);
                element.store(value, plate);
                rendered += 1;
            }
            element.set_visible(true);
        }
        rendered
    }

    /// Blend the visible plates onto `frame`, later elements over earlier ones
    pub fn blend_onto(&self, frame: &mut VideoFrame) {
        for element in &self.elements {
            if let Some(plate) = element.visible_plate() {
                let (x, y) = element.origin(plate.width());
                blend_plate(frame, plate, x, y);
            }
        }
    }

    /// Full tick: mirror, update, blend, then pack into `target`
    pub fn composite(
        &mut self,
        frame: &mut VideoFrame,
        inputs: &OverlayInputs,
        target: &mut PresentationBuffer<'_>,
    ) -> Result<usize, OverlayError> {
        if self.mirror {
            frame.mirror_horizontal();
        }
        let rendered = self.update(inputs);
        self.blend_onto(frame);
        target.write_rgb(&frame.data, frame.width, frame.height)?;
        Ok(rendered)
    }

    /// Times the element of `kind` has been rendered; `None` if not configured
    pub fn render_count(&self, kind: ElementKind) -> Option<u64> {
        self.elements
            .iter()
            .find(|e| e.kind() == kind)
            .map(|e| e.render_count())
    }
}

/// Value an element would show now, or `None` if its data is not valid
fn current_value(
    kind: ElementKind,
    inputs: &OverlayInputs,
    config: &OverlayConfig,
) -> Option<ElementValue> {
    let fix = inputs.position.filter(|p| p.has_fix());
    match kind {
        ElementKind::Clock => Some(ElementValue::Text(
            inputs.now.format(&config.time_format).to_string(),
        )),
        ElementKind::Date => Some(ElementValue::Text(
            inputs.now.format(&config.date_format).to_string(),
        )),
        ElementKind::Recording => inputs.recording.then_some(ElementValue::Flag(true)),
        ElementKind::Speed => {
            let kph = match config.speed_source {
                SpeedSource::Position => fix.map(|p| p.speed_kph()),
                SpeedSource::Bus => inputs.telemetry.speed_kph,
            }?;
            let speed = match config.speed_unit {
                SpeedUnit::Mph => kph * MILES_PER_KM,
                SpeedUnit::Kph => kph,
            };
            Some(ElementValue::Scalar(speed))
        }
        ElementKind::Position => fix.map(|p| ElementValue::Coordinates {
            lat: p.lat,
            lon: p.lon,
        }),
        ElementKind::Fuel => {
            if !inputs.telemetry.has_valid_fuel_data() {
                return None;
            }
            let consumed = match config.fuel_unit {
                FuelUnit::Gallons => inputs.telemetry.fuel_consumed_gallons(Margin::Applied),
                FuelUnit::Liters => inputs.telemetry.fuel_consumed_liters(Margin::Applied),
            };
            Some(ElementValue::Scalar(consumed))
        }
    }
}

fn label(kind: ElementKind, value: &ElementValue, config: &OverlayConfig) -> String {
    match (kind, value) {
        (_, ElementValue::Text(text)) => text.clone(),
        (ElementKind::Speed, ElementValue::Scalar(speed)) => {
            format!("{:.0} {}", speed, config.speed_unit.label())
        }
        (ElementKind::Fuel, ElementValue::Scalar(consumed)) => {
            format!("FUEL {:.3} {}", consumed, config.fuel_unit.label())
        }
        (_, ElementValue::Coordinates { lat, lon }) => format!("{:.6}, {:.6}", lat, lon),
        (_, ElementValue::Flag(_)) => "REC".to_string(),
        (_, ElementValue::Scalar(v)) => format!("{}", v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Anchor, ElementConfig, FontSize, StyleConfig};
    use chrono::TimeZone;
    use position::FixQuality;
    use present_buffer::{Display, MemoryDisplay, PixelFormat};
    use proptest::prelude::*;
    use std::time::{Duration, Instant};
    use telemetry::{FieldGroup, FuelConfig, SharedTelemetry};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, h, m, s).single().unwrap()
    }

    fn inputs(telemetry: TelemetryState) -> OverlayInputs {
        OverlayInputs {
            telemetry,
            position: None,
            recording: false,
            now: at(12, 0, 0),
        }
    }

    fn fix(speed_mps: f64) -> PositionFix {
        PositionFix {
            lat: 39.123456,
            lon: -84.654321,
            speed_mps,
            heading_deg: None,
            altitude_m: None,
            fix: FixQuality::Fix3d,
            satellites: Some(8),
            received_at: Instant::now(),
        }
    }

    fn only(kind: ElementKind, threshold: f64, fuel_unit: FuelUnit) -> OverlayConfig {
        OverlayConfig {
            elements: vec![ElementConfig {
                kind,
                x: 0,
                y: 0,
                anchor: Anchor::TopLeft,
                threshold,
                font: FontSize::Small,
            }],
            fuel_unit,
            ..Default::default()
        }
    }

    #[test]
    fn test_fuel_rerenders_only_past_threshold() {
        let shared = SharedTelemetry::new(FuelConfig {
            safety_margin: 1.0,
            ..Default::default()
        });
        let mut compositor = Compositor::new(only(ElementKind::Fuel, 0.001, FuelUnit::Liters), false);
        let fuel = FieldGroup::FuelSystem { level_pct: 50.0, flow_lph: 36.0 };

        let t0 = Instant::now();
        shared.apply(fuel, t0).unwrap();
        shared.apply(fuel, t0 + Duration::from_secs(100)).unwrap();
        // 36 L/h over 100 s is exactly 1 L
        assert_eq!(compositor.update(&inputs(shared.snapshot().unwrap())), 1);

        // 10 ms more adds 0.0001 L
        shared.apply(fuel, t0 + Duration::from_millis(100_010)).unwrap();
        assert_eq!(compositor.update(&inputs(shared.snapshot().unwrap())), 0);

        // Another 200 ms adds 0.002 L on top of the cached value
        shared.apply(fuel, t0 + Duration::from_millis(100_210)).unwrap();
        assert_eq!(compositor.update(&inputs(shared.snapshot().unwrap())), 1);
        assert_eq!(compositor.render_count(ElementKind::Fuel), Some(2));
    }

    #[test]
    fn test_invalid_data_is_omitted() {
        let mut compositor = Compositor::new(OverlayConfig::default(), false);
        let empty = TelemetryState::new(1.025);
        compositor.update(&inputs(empty));

        // Clock and date only: no fuel data, no fix, not recording
        assert_eq!(compositor.render_count(ElementKind::Clock), Some(1));
        assert_eq!(compositor.render_count(ElementKind::Date), Some(1));
        for kind in [ElementKind::Fuel, ElementKind::Speed, ElementKind::Position, ElementKind::Recording] {
            assert_eq!(compositor.render_count(kind), Some(0));
        }

        let mut frame = VideoFrame::filled(1920, 1080, [40, 40, 40]);
        compositor.blend_onto(&mut frame);
        // Fuel plate would sit at (20, 180)
        assert_eq!(frame.get_pixel(22, 182), Some([40, 40, 40]));
        // Clock plate background at (20, 20) is half black
        assert_eq!(frame.get_pixel(21, 21), Some([20, 20, 20]));
    }

    #[test]
    fn test_clock_exact_change() {
        let mut compositor = Compositor::new(only(ElementKind::Clock, 0.0, FuelUnit::Gallons), false);
        let state = TelemetryState::new(1.0);
        let mut input = inputs(state);
        assert_eq!(compositor.update(&input), 1);
        assert_eq!(compositor.update(&input), 0);
        input.now = at(12, 0, 1);
        assert_eq!(compositor.update(&input), 1);
    }

    #[test]
    fn test_recording_indicator_toggles_without_rerender() {
        let mut compositor = Compositor::new(only(ElementKind::Recording, 0.0, FuelUnit::Gallons), false);
        let mut input = inputs(TelemetryState::new(1.0));

        compositor.update(&input);
        assert_eq!(compositor.render_count(ElementKind::Recording), Some(0));

        input.recording = true;
        compositor.update(&input);
        input.recording = false;
        compositor.update(&input);
        input.recording = true;
        compositor.update(&input);
        assert_eq!(compositor.render_count(ElementKind::Recording), Some(1));
    }

    #[test]
    fn test_speed_from_position_or_bus() {
        let mut config = only(ElementKind::Speed, 0.5, FuelUnit::Gallons);
        let mut compositor = Compositor::new(config.clone(), false);
        let mut input = inputs(TelemetryState::new(1.0));
        assert_eq!(compositor.update(&input), 0);

        input.position = Some(PositionFix {
            fix: FixQuality::NoFix,
            ..fix(10.0)
        });
        assert_eq!(compositor.update(&input), 0);

        input.position = Some(fix(10.0));
        assert_eq!(compositor.update(&input), 1);
        // 10 m/s = 22.37 mph; 0.2 mph later is within threshold
        input.position = Some(fix(10.09));
        assert_eq!(compositor.update(&input), 0);

        config.speed_source = SpeedSource::Bus;
        let mut compositor = Compositor::new(config, false);
        assert_eq!(compositor.update(&input), 0);
        let shared = SharedTelemetry::new(FuelConfig::default());
        shared
            .apply(FieldGroup::EngineSpeed { rpm: 900.0, speed_kph: 50.0 }, Instant::now())
            .unwrap();
        input.telemetry = shared.snapshot().unwrap();
        assert_eq!(compositor.update(&input), 1);
    }

    #[test]
    fn test_labels() {
        let config = OverlayConfig::default();
        assert_eq!(label(ElementKind::Fuel, &ElementValue::Scalar(1.23456), &config), "FUEL 1.235 gal");
        assert_eq!(label(ElementKind::Speed, &ElementValue::Scalar(54.6), &config), "55 MPH");
        assert_eq!(
            label(ElementKind::Position, &ElementValue::Coordinates { lat: 1.5, lon: -2.25 }, &config),
            "1.500000, -2.250000"
        );
        assert_eq!(label(ElementKind::Recording, &ElementValue::Flag(true), &config), "REC");
    }

    #[test]
    fn test_blend_clips_and_respects_alpha() {
        let mut frame = VideoFrame::filled(4, 4, [100, 100, 100]);
        let mut plate = RgbaImage::new(3, 3);
        plate.put_pixel(0, 0, image::Rgba([255, 255, 255, 0]));
        plate.put_pixel(1, 0, image::Rgba([255, 255, 255, 255]));
        plate.put_pixel(2, 0, image::Rgba([0, 0, 0, 128]));
        plate.put_pixel(1, 1, image::Rgba([9, 9, 9, 255]));

        blend_plate(&mut frame, &plate, 2, -1);
        // Only plate row 1 and beyond land on the frame, at x = 2..4
        assert_eq!(frame.get_pixel(3, 0), Some([9, 9, 9]));
        assert_eq!(frame.get_pixel(2, 0), Some([100, 100, 100]));
        assert_eq!(frame.get_pixel(1, 0), Some([100, 100, 100]));

        let mut frame = VideoFrame::filled(4, 4, [100, 100, 100]);
        blend_plate(&mut frame, &plate, 0, 0);
        assert_eq!(frame.get_pixel(0, 0), Some([100, 100, 100]));
        assert_eq!(frame.get_pixel(1, 0), Some([255, 255, 255]));
        // (128 * 0 + 127 * 100 + 127) / 255 = 50
        assert_eq!(frame.get_pixel(2, 0), Some([50, 50, 50]));

        blend_plate(&mut frame, &plate, 10, 10);
        blend_plate(&mut frame, &plate, -3, 0);
    }

    #[test]
    fn test_composite_into_back_page() {
        let config = OverlayConfig {
            style: StyleConfig {
                background_alpha: 255,
                ..Default::default()
            },
            ..only(ElementKind::Clock, 0.0, FuelUnit::Gallons)
        };
        let mut compositor = Compositor::new(config, true);
        let mut display = MemoryDisplay::new(8, 4, PixelFormat::Xrgb8888);

        let mut frame = VideoFrame::filled(80, 80, [0, 0, 200]);
        // Rightmost source column turns red; mirroring moves it to x = 0
        for y in 0..80 {
            frame.row_mut(y)[79 * 3..80 * 3].copy_from_slice(&[200, 0, 0]);
        }
        {
            let mut back = display.back_buffer().unwrap();
            compositor
                .composite(&mut frame, &inputs(TelemetryState::new(1.0)), &mut back)
                .unwrap();
        }
        display.present().unwrap();

        // Solid black plate over the top-left corner after mirroring
        assert_eq!(frame.get_pixel(0, 0), Some([0, 0, 0]));
        assert_eq!(frame.get_pixel(0, 79), Some([200, 0, 0]));
        // Downscaled onto the page; row 3 samples source row 60, below the plate
        assert_eq!(display.front_pixel(0, 3), Some([200, 0, 0]));
        assert_eq!(display.front_pixel(7, 3), Some([0, 0, 200]));
    }

    proptest! {
        #[test]
        fn prop_blend_stays_between_inputs(o in any::<u8>(), f in any::<u8>(), a in any::<u8>()) {
            let mut frame = VideoFrame::filled(1, 1, [f, f, f]);
            let mut plate = RgbaImage::new(1, 1);
            plate.put_pixel(0, 0, image::Rgba([o, o, o, a]));
            blend_plate(&mut frame, &plate, 0, 0);
            let out = frame.get_pixel(0, 0).unwrap()[0];
            prop_assert!(out >= o.min(f) && out <= o.max(f));
        }
    }
}
