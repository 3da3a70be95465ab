// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Level-to-frame color model.
//!
//! Everything in here is a pure function of the level and the meter
//! configuration. Gradient positions run from `0.0` at the bottom edge of the
//! canvas to `1.0` at the top edge.

use crate::render::color::Rgb;
use std::ops::Range;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// How the filled part of the meter is colored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VisualStyle {
    /// Low → mid → peak gradient spanning the whole key.
    #[default]
    ThreeColorGradient,
    /// Single color picked from the level bucket.
    Solid,
    /// Meter color at the bottom fading into the background at the top.
    BackgroundGradient,
    /// Background at the bottom fading into the meter color at the top.
    BackgroundFlipped,
}

impl VisualStyle {
    /// Map the wire index. Unknown values fall back to the three-color gradient.
    pub fn from_index(index: i64) -> Self {
        match index {
            1 => VisualStyle::Solid,
            2 => VisualStyle::BackgroundGradient,
            3 => VisualStyle::BackgroundFlipped,
            _ => VisualStyle::ThreeColorGradient,
        }
    }

    pub fn index(self) -> i64 {
        match self {
            VisualStyle::ThreeColorGradient => 0,
            VisualStyle::Solid => 1,
            VisualStyle::BackgroundGradient => 2,
            VisualStyle::BackgroundFlipped => 3,
        }
    }
}

/// Validated meter configuration of one action.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterConfig {
    pub low_color: Rgb,
    pub mid_color: Rgb,
    pub peak_color: Rgb,
    pub background_color: Rgb,
    /// Mid threshold in percent of `max_threshold` (0..=100).
    pub mid_level_pct: u32,
    /// Peak threshold in percent of `max_threshold` (0..=100).
    pub peak_level_pct: u32,
    /// Level that fills the whole key (1..=device max).
    pub max_threshold: u32,
    pub visual_style: VisualStyle,
    pub show_level_as_text: bool,
}

impl MeterConfig {
    /// Default configuration for a device whose values top out at `device_max`.
    pub fn defaults(device_max: u32) -> Self {
        Self {
            low_color: Rgb::GREEN,
            mid_color: Rgb::YELLOW,
            peak_color: Rgb::RED,
            background_color: Rgb::BLACK,
            mid_level_pct: 75,
            peak_level_pct: 85,
            max_threshold: device_max.max(1),
            visual_style: VisualStyle::ThreeColorGradient,
            show_level_as_text: false,
        }
    }

    /// Mid threshold in level units.
    pub fn mid_level_absolute(&self) -> f64 {
        self.mid_level_pct as f64 / 100.0 * self.max_threshold as f64
    }

    /// Peak threshold in level units.
    pub fn peak_level_absolute(&self) -> f64 {
        self.peak_level_pct as f64 / 100.0 * self.max_threshold as f64
    }
}

// ============================================================================
// FRAME
// ============================================================================

/// Pixel dimensions of the target canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub const fn square(edge: u32) -> Self {
        Self {
            width: edge,
            height: edge,
        }
    }
}

/// A gradient stop; `position` is 0.0 at the bottom and 1.0 at the top.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStop {
    pub position: f32,
    pub color: Rgb,
}

impl ColorStop {
    pub fn new(position: f32, color: Rgb) -> Self {
        Self {
            position: position.clamp(0.0, 1.0),
            color,
        }
    }
}

/// Paint used for the filled rows of the meter.
#[derive(Debug, Clone, PartialEq)]
pub enum FillPattern {
    Solid(Rgb),
    /// Stops ordered by position, bottom first.
    Gradient(Vec<ColorStop>),
}

impl FillPattern {
    /// Build a gradient, ordering the stops bottom to top.
    pub fn gradient(mut stops: Vec<ColorStop>) -> Self {
        stops.sort_by(|a, b| a.position.total_cmp(&b.position));
        FillPattern::Gradient(stops)
    }

    /// Color at vertical position `t` (0.0 bottom, 1.0 top).
    pub fn color_at(&self, t: f32) -> Rgb {
        let stops = match self {
            FillPattern::Solid(color) => return *color,
            FillPattern::Gradient(stops) => stops,
        };

        let (first, last) = match (stops.first(), stops.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Rgb::BLACK,
        };
        if t <= first.position {
            return first.color;
        }
        if t >= last.position {
            return last.color;
        }

        for pair in stops.windows(2) {
            let (lower, upper) = (pair[0], pair[1]);
            if t <= upper.position {
                let span = upper.position - lower.position;
                if span <= f32::EPSILON {
                    return upper.color;
                }
                return lower.color.lerp(upper.color, (t - lower.position) / span);
            }
        }
        last.color
    }
}

/// Icons drawn on top of the meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Glyph {
    /// The endpoint is muted.
    Muted,
}

impl Glyph {
    /// Text form, used where the host draws the icon as a title.
    pub fn as_str(self) -> &'static str {
        match self {
            Glyph::Muted => "🔇",
        }
    }
}

/// Complete description of one meter image.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderFrame {
    pub width: u32,
    pub height: u32,
    pub background: Rgb,
    /// First row (from the top) painted with the fill.
    pub fill_start_row: u32,
    pub fill: FillPattern,
    pub overlay_text: Option<String>,
    pub overlay_icon: Option<Glyph>,
}

impl RenderFrame {
    /// Rows painted with the meter fill.
    pub fn fill_rows(&self) -> Range<u32> {
        self.fill_start_row.min(self.height)..self.height
    }

    pub fn with_overlay_text(mut self, text: impl Into<String>) -> Self {
        self.overlay_text = Some(text.into());
        self
    }
}

// ============================================================================
// MAPPING
// ============================================================================

/// Fraction of the key covered by `level`, clamped to `[0, 1]`.
pub fn fill_fraction(level: u32, max_threshold: u32) -> f64 {
    (level as f64 / max_threshold.max(1) as f64).clamp(0.0, 1.0)
}

/// First filled row for `level` on a canvas `height` rows tall.
pub fn fill_start_row(level: u32, max_threshold: u32, height: u32) -> u32 {
    let filled = (height as f64 * fill_fraction(level, max_threshold)).round() as u32;
    height - filled.min(height)
}

/// Bucket color for `level`: peak, mid or low.
pub fn meter_color(level: u32, config: &MeterConfig) -> Rgb {
    let level = level as f64;
    if level >= config.peak_level_absolute() {
        config.peak_color
    } else if level >= config.mid_level_absolute() {
        config.mid_color
    } else {
        config.low_color
    }
}

fn fill_pattern(level: u32, config: &MeterConfig) -> FillPattern {
    let meter = meter_color(level, config);
    match config.visual_style {
        VisualStyle::ThreeColorGradient => FillPattern::gradient(vec![
            ColorStop::new(0.0, config.low_color),
            ColorStop::new(config.mid_level_pct as f32 / 100.0, config.mid_color),
            ColorStop::new(config.peak_level_pct as f32 / 100.0, config.peak_color),
            ColorStop::new(1.0, config.peak_color),
        ]),
        VisualStyle::Solid => FillPattern::Solid(meter),
        VisualStyle::BackgroundGradient => FillPattern::gradient(vec![
            ColorStop::new(0.0, meter),
            ColorStop::new(1.0, config.background_color),
        ]),
        VisualStyle::BackgroundFlipped => FillPattern::gradient(vec![
            ColorStop::new(0.0, config.background_color),
            ColorStop::new(1.0, meter),
        ]),
    }
}

/// Render `level` with `config` onto a canvas of `size`.
pub fn render(level: u32, config: &MeterConfig, size: CanvasSize) -> RenderFrame {
    RenderFrame {
        width: size.width,
        height: size.height,
        background: config.background_color,
        fill_start_row: fill_start_row(level, config.max_threshold, size.height),
        fill: fill_pattern(level, config),
        overlay_text: None,
        overlay_icon: None,
    }
}

/// An empty meter carrying the mute glyph.
pub fn render_muted(config: &MeterConfig, size: CanvasSize) -> RenderFrame {
    RenderFrame {
        overlay_icon: Some(Glyph::Muted),
        ..render(0, config, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mid: u32, peak: u32, max: u32) -> MeterConfig {
        MeterConfig {
            mid_level_pct: mid,
            peak_level_pct: peak,
            max_threshold: max,
            ..MeterConfig::defaults(max)
        }
    }

    #[test]
    fn test_meter_color_buckets() {
        let cfg = config(75, 85, 100);
        assert_eq!(meter_color(90, &cfg), cfg.peak_color);
        assert_eq!(meter_color(85, &cfg), cfg.peak_color);
        assert_eq!(meter_color(80, &cfg), cfg.mid_color);
        assert_eq!(meter_color(50, &cfg), cfg.low_color);
    }

    #[test]
    fn test_meter_color_scales_with_threshold() {
        // 75% of 127 = 95.25, 85% of 127 = 107.95
        let cfg = config(75, 85, 127);
        assert_eq!(meter_color(95, &cfg), cfg.low_color);
        assert_eq!(meter_color(96, &cfg), cfg.mid_color);
        assert_eq!(meter_color(108, &cfg), cfg.peak_color);
    }

    #[test]
    fn test_fill_fraction_clamped() {
        assert_eq!(fill_fraction(0, 100), 0.0);
        assert_eq!(fill_fraction(50, 100), 0.5);
        assert_eq!(fill_fraction(250, 100), 1.0);
        assert_eq!(fill_fraction(5, 0), 1.0);
    }

    #[test]
    fn test_fill_start_row_monotonic_and_bounded() {
        for max in [1u32, 7, 100, 127] {
            let mut previous = u32::MAX;
            for level in 0..=max + 5 {
                let row = fill_start_row(level, max, 144);
                assert!(row <= 144);
                assert!(row <= previous, "row grew at level {} of {}", level, max);
                previous = row;
            }
            assert_eq!(fill_start_row(0, max, 144), 144);
            assert_eq!(fill_start_row(max, max, 144), 0);
        }
    }

    #[test]
    fn test_fill_start_row_rounds() {
        // 144 * 0.33 = 47.52 -> 48 filled rows
        assert_eq!(fill_start_row(33, 100, 144), 96);
    }

    #[test]
    fn test_three_color_gradient_stops() {
        let cfg = config(75, 85, 100);
        let frame = render(50, &cfg, CanvasSize::square(100));
        assert_eq!(frame.fill_start_row, 50);
        assert_eq!(frame.background, Rgb::BLACK);
        match &frame.fill {
            FillPattern::Gradient(stops) => {
                let positions: Vec<f32> = stops.iter().map(|s| s.position).collect();
                assert_eq!(positions, vec![0.0, 0.75, 0.85, 1.0]);
                assert_eq!(stops[0].color, cfg.low_color);
                assert_eq!(stops[1].color, cfg.mid_color);
                assert_eq!(stops[3].color, cfg.peak_color);
            }
            other => panic!("expected gradient, got {:?}", other),
        }
    }

    #[test]
    fn test_gradient_stops_sorted_when_mid_above_peak() {
        let cfg = config(90, 20, 100);
        match render(10, &cfg, CanvasSize::square(10)).fill {
            FillPattern::Gradient(stops) => {
                assert!(stops.windows(2).all(|w| w[0].position <= w[1].position));
            }
            other => panic!("expected gradient, got {:?}", other),
        }
    }

    #[test]
    fn test_solid_style_uses_meter_color() {
        let cfg = MeterConfig {
            visual_style: VisualStyle::Solid,
            ..config(75, 85, 100)
        };
        assert_eq!(
            render(90, &cfg, CanvasSize::square(72)).fill,
            FillPattern::Solid(cfg.peak_color)
        );
        assert_eq!(
            render(10, &cfg, CanvasSize::square(72)).fill,
            FillPattern::Solid(cfg.low_color)
        );
    }

    #[test]
    fn test_background_gradient_and_flipped() {
        let cfg = MeterConfig {
            visual_style: VisualStyle::BackgroundGradient,
            background_color: Rgb::new(10, 10, 10),
            ..config(75, 85, 100)
        };
        let normal = render(80, &cfg, CanvasSize::square(72)).fill;
        assert_eq!(normal.color_at(0.0), cfg.mid_color);
        assert_eq!(normal.color_at(1.0), cfg.background_color);

        let flipped_cfg = MeterConfig {
            visual_style: VisualStyle::BackgroundFlipped,
            ..cfg
        };
        let flipped = render(80, &flipped_cfg, CanvasSize::square(72)).fill;
        assert_eq!(flipped.color_at(0.0), flipped_cfg.background_color);
        assert_eq!(flipped.color_at(1.0), flipped_cfg.mid_color);
    }

    #[test]
    fn test_unknown_style_index_falls_back() {
        assert_eq!(VisualStyle::from_index(42), VisualStyle::ThreeColorGradient);
        assert_eq!(VisualStyle::from_index(-1), VisualStyle::ThreeColorGradient);
        for style in [
            VisualStyle::ThreeColorGradient,
            VisualStyle::Solid,
            VisualStyle::BackgroundGradient,
            VisualStyle::BackgroundFlipped,
        ] {
            assert_eq!(VisualStyle::from_index(style.index()), style);
        }
    }

    #[test]
    fn test_gradient_interpolates_between_stops() {
        let fill = FillPattern::gradient(vec![
            ColorStop::new(1.0, Rgb::new(200, 0, 0)),
            ColorStop::new(0.0, Rgb::new(0, 0, 0)),
        ]);
        assert_eq!(fill.color_at(0.5), Rgb::new(100, 0, 0));
        assert_eq!(fill.color_at(-1.0), Rgb::new(0, 0, 0));
    }

    #[test]
    fn test_muted_frame_is_empty_with_icon() {
        let cfg = config(75, 85, 100);
        let frame = render_muted(&cfg, CanvasSize::square(72));
        assert_eq!(frame.overlay_icon, Some(Glyph::Muted));
        assert_eq!(frame.fill_start_row, 72);
        assert!(frame.fill_rows().is_empty());
    }
}
