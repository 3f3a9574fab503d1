//! What the core hands the display driver. Pixel drawing itself lives
//! behind [`Renderer`]; this module only maps volts and samples to pixels.

use chrono::{DateTime, Utc};

use crate::{
    gain::{mid_scale_volts, raw_to_volts},
    menu::MenuState,
    settings::{Dirty, ScopeSettings, SettingsSnapshot},
    spectrum::Spectrum,
    trigger::{Frame, TriggerStats},
};

pub const SCREEN_WIDTH: u16 = 320;
pub const SCREEN_HEIGHT: u16 = 240;
pub const DIV_PIXELS_X: f32 = 32.0;
pub const DIV_PIXELS_Y: f32 = 30.0;

/// Pixel series for the waveform, left to right
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Trace {
    pub points: Vec<(u16, u16)>,
    pub frame_sequence: u64,
}

/// Per-settings-version scaling constants
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleCache {
    version: u64,
    sample_rate: f32,
    pixels_per_volt: f32,
    pixels_per_sample: f32,
}

impl ScaleCache {
    pub fn new(settings: &SettingsSnapshot, sample_rate: f32) -> Self {
        let s = &settings.value;
        let samples_per_div = s.time_per_div * 1e-6 * sample_rate;
        Self {
            version: settings.version,
            sample_rate,
            pixels_per_volt: DIV_PIXELS_Y / s.volts_per_div,
            pixels_per_sample: DIV_PIXELS_X / samples_per_div,
        }
    }

    /// Recompute if the settings moved on. True when the cache was invalidated.
    pub fn refresh(&mut self, settings: &SettingsSnapshot) -> bool {
        if settings.version == self.version {
            return false;
        }
        *self = Self::new(settings, self.sample_rate);
        true
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Screen row for a voltage relative to mid-scale, pinned to the screen edges
    pub fn volts_to_y(&self, volts: f32) -> u16 {
        let center = SCREEN_HEIGHT as f32 / 2.0;
        let y = center - volts * self.pixels_per_volt;
        y.round().clamp(0.0, (SCREEN_HEIGHT - 1) as f32) as u16
    }

    pub fn trace(&self, frame: &Frame) -> Trace {
        let dc = mid_scale_volts(frame.gain);
        let points = frame
            .samples
            .iter()
            .enumerate()
            .map(|(i, code)| (i as f32 * self.pixels_per_sample, *code))
            .take_while(|(x, _)| *x < SCREEN_WIDTH as f32)
            .map(|(x, code)| (x as u16, self.volts_to_y(raw_to_volts(code, frame.gain) - dc)))
            .collect();
        Trace {
            points,
            frame_sequence: frame.sequence,
        }
    }

    /// Bar height per bin, in pixels from the bottom edge
    pub fn spectrum_bars(&self, spectrum: &Spectrum) -> Vec<u16> {
        spectrum
            .magnitudes
            .iter()
            .map(|m| (m * self.pixels_per_volt).round().clamp(0.0, SCREEN_HEIGHT as f32) as u16)
            .collect()
    }

    pub fn peak_label(&self, spectrum: &Spectrum) -> String {
        let f = spectrum.peak_frequency();
        let freq = if f >= 1000.0 {
            format!("{:.2} kHz", f / 1000.0)
        } else {
            format!("{:.0} Hz", f)
        };
        format!("{} {:.2} V", freq, spectrum.peak_magnitude())
    }
}

/// Everything needed to draw one refresh
pub struct View<'a> {
    pub settings: &'a ScopeSettings,
    pub menu: &'a MenuState,
    pub dirty: Dirty,
    pub trace: Option<&'a Trace>,
    pub spectrum: Option<&'a Spectrum>,
    pub spectrum_bars: Option<&'a [u16]>,
    pub peak_label: Option<&'a str>,
    /// Rows of cursor 1 and 2 when cursors are on
    pub cursor_rows: Option<(u16, u16)>,
    pub trigger_row: u16,
    pub trigger_stats: TriggerStats,
    pub recording_since: Option<DateTime<Utc>>,
}

pub trait Renderer: Send {
    fn render(&mut self, view: &View<'_>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bus::Versioned, gain::GainSetting, MID_SCALE_CODE};

    fn snapshot(version: u64, volts_per_div: f32, time_per_div: f32) -> SettingsSnapshot {
        Versioned {
            version,
            value: ScopeSettings {
                volts_per_div,
                time_per_div,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_mid_scale_draws_on_center_line() {
        let cache = ScaleCache::new(&snapshot(1, 1.0, 64.0), 500_000.0);
        let frame = Frame {
            samples: [MID_SCALE_CODE; crate::CAPTURE_DEPTH],
            gain: GainSetting::High,
            ..Default::default()
        };
        let trace = cache.trace(&frame);
        // 64 us/div at 500 kS/s is 32 samples per 32 px division
        assert_eq!(trace.points.len(), SCREEN_WIDTH as usize);
        assert!(trace.points.iter().all(|(_, y)| *y == SCREEN_HEIGHT / 2));
    }

    #[test]
    fn test_volts_map_and_clamp() {
        let cache = ScaleCache::new(&snapshot(1, 0.5, 100.0), 500_000.0);
        assert_eq!(cache.volts_to_y(0.5), 90);
        assert_eq!(cache.volts_to_y(-1.0), 180);
        assert_eq!(cache.volts_to_y(100.0), 0);
        assert_eq!(cache.volts_to_y(-100.0), SCREEN_HEIGHT - 1);
    }

    #[test]
    fn test_refresh_only_on_new_version() {
        let mut cache = ScaleCache::new(&snapshot(1, 1.0, 100.0), 500_000.0);
        assert!(!cache.refresh(&snapshot(1, 2.0, 100.0)));
        assert_eq!(cache.volts_to_y(1.0), 90);
        assert!(cache.refresh(&snapshot(2, 2.0, 100.0)));
        assert_eq!(cache.volts_to_y(1.0), 105);
        assert_eq!(cache.version(), 2);
    }

    #[test]
    fn test_peak_label() {
        let cache = ScaleCache::new(&snapshot(1, 1.0, 100.0), 500_000.0);
        let mut magnitudes = vec![0.0; 160];
        magnitudes[20] = 1.25;
        let spectrum = Spectrum {
            magnitudes,
            peak_bin: 20,
            bin_width_hz: 1562.5,
            frame_sequence: 1,
        };
        assert_eq!(cache.peak_label(&spectrum), "31.25 kHz 1.25 V");
        let bars = cache.spectrum_bars(&spectrum);
        assert_eq!(bars[20], 38);
        assert_eq!(bars[0], 0);
    }
}
