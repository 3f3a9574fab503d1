//! Scope configuration and the table of menu-editable parameters

use std::ops::{BitOr, BitOrAssign};

use num_traits::clamp;

use crate::{bus::Versioned, gain::GainSetting};

pub const MIN_VOLTS_PER_DIV: f32 = 0.1;
pub const MIN_TIME_PER_DIV: f32 = 1.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DisplayMode {
    #[default]
    Scope,
    Spectrum,
    Diagnostic,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScopeSettings {
    pub volts_per_div: f32,
    /// Microseconds per horizontal division
    pub time_per_div: f32,
    pub cursor1_volts: f32,
    pub cursor2_volts: f32,
    /// Input volts relative to mid-scale
    pub trigger_level: f32,
    pub gain: GainSetting,
    pub running: bool,
    pub cursors_enabled: bool,
    pub recording: bool,
    pub display_mode: DisplayMode,
}

impl Default for ScopeSettings {
    fn default() -> Self {
        Self {
            volts_per_div: 0.5,
            time_per_div: 100.0,
            cursor1_volts: 0.5,
            cursor2_volts: -0.5,
            trigger_level: 0.0,
            gain: GainSetting::Low,
            running: true,
            cursors_enabled: false,
            recording: false,
            display_mode: DisplayMode::Scope,
        }
    }
}

/// What the cores pass around
pub type SettingsSnapshot = Versioned<ScopeSettings>;

/// Screen regions the renderer has to redraw
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Dirty(u8);

impl Dirty {
    pub const NONE: Dirty = Dirty(0);
    pub const WAVEFORM: Dirty = Dirty(1 << 0);
    pub const GRID: Dirty = Dirty(1 << 1);
    pub const MENU: Dirty = Dirty(1 << 2);
    pub const STATUS: Dirty = Dirty(1 << 3);
    pub const CURSORS: Dirty = Dirty(1 << 4);
    pub const SPECTRUM: Dirty = Dirty(1 << 5);
    pub const ALL: Dirty = Dirty(0x3F);

    pub fn contains(self, other: Dirty) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Dirty {
    type Output = Dirty;

    fn bitor(self, rhs: Dirty) -> Dirty {
        Dirty(self.0 | rhs.0)
    }
}

impl BitOrAssign for Dirty {
    fn bitor_assign(&mut self, rhs: Dirty) {
        self.0 |= rhs.0;
    }
}

pub enum ParamKind {
    /// Flipped directly from the menu
    Toggle {
        get: fn(&ScopeSettings) -> bool,
        set: fn(&mut ScopeSettings, bool),
    },
    /// Edited with the encoder, `step` per detent, clamped to `[min, max]`
    Scalar {
        get: fn(&ScopeSettings) -> f32,
        set: fn(&mut ScopeSettings, f32),
        step: f32,
        min: f32,
        max: f32,
        unit: &'static str,
    },
    /// Edited with the encoder, wrapping through `labels`
    Choice {
        get: fn(&ScopeSettings) -> usize,
        set: fn(&mut ScopeSettings, usize),
        labels: &'static [&'static str],
    },
}

pub struct Param {
    pub name: &'static str,
    pub kind: ParamKind,
    /// Regions to redraw when the value changes
    pub dirty: Dirty,
}

impl Param {
    /// Needs the edit sub-state rather than flipping on confirm
    pub fn is_editable(&self) -> bool {
        !matches!(self.kind, ParamKind::Toggle { .. })
    }

    /// Flip a toggle. No-op for other kinds.
    pub fn toggle(&self, settings: &mut ScopeSettings) -> bool {
        match self.kind {
            ParamKind::Toggle { get, set } => {
                set(settings, !get(settings));
                true
            }
            _ => false,
        }
    }

    /// Move by `detents` encoder steps. Returns true if the value changed.
    pub fn adjust(&self, settings: &mut ScopeSettings, detents: i32) -> bool {
        if detents == 0 {
            return false;
        }
        match self.kind {
            ParamKind::Toggle { .. } => false,
            ParamKind::Scalar {
                get,
                set,
                step,
                min,
                max,
                ..
            } => {
                let old = get(settings);
                let raw = old + step * detents as f32;
                // Keep repeated steps from drifting off the grid
                let rounded = (raw * 1000.0).round() / 1000.0;
                let new = clamp(rounded, min, max);
                set(settings, new);
                new != old
            }
            ParamKind::Choice { get, set, labels } => {
                let old = get(settings);
                let new = (old as i64 + detents as i64).rem_euclid(labels.len() as i64) as usize;
                set(settings, new);
                new != old
            }
        }
    }

    pub fn value_label(&self, settings: &ScopeSettings) -> String {
        match self.kind {
            ParamKind::Toggle { get, .. } => (if get(settings) { "on" } else { "off" }).to_owned(),
            ParamKind::Scalar { get, unit, .. } => format!("{:.2} {}", get(settings), unit),
            ParamKind::Choice { get, labels, .. } => labels[get(settings)].to_owned(),
        }
    }
}

/// Number of menu items
pub const MENU_COUNT: usize = 9;

pub static PARAMS: [Param; MENU_COUNT] = [
    Param {
        name: "Run",
        kind: ParamKind::Toggle {
            get: |s| s.running,
            set: |s, v| s.running = v,
        },
        dirty: Dirty::STATUS,
    },
    Param {
        name: "Volts/div",
        kind: ParamKind::Scalar {
            get: |s| s.volts_per_div,
            set: |s, v| s.volts_per_div = v,
            step: 0.1,
            min: MIN_VOLTS_PER_DIV,
            max: 10.0,
            unit: "V",
        },
        dirty: Dirty(Dirty::WAVEFORM.0 | Dirty::GRID.0 | Dirty::CURSORS.0 | Dirty::SPECTRUM.0),
    },
    Param {
        name: "Time/div",
        kind: ParamKind::Scalar {
            get: |s| s.time_per_div,
            set: |s, v| s.time_per_div = v,
            step: 10.0,
            min: MIN_TIME_PER_DIV,
            max: 10_000.0,
            unit: "us",
        },
        dirty: Dirty(Dirty::WAVEFORM.0 | Dirty::GRID.0),
    },
    Param {
        name: "Gain",
        kind: ParamKind::Choice {
            get: |s| s.gain.index(),
            set: |s, v| s.gain = GainSetting::from_index(v),
            labels: &["x1", "x2", "x4"],
        },
        dirty: Dirty(Dirty::WAVEFORM.0 | Dirty::STATUS.0 | Dirty::SPECTRUM.0),
    },
    Param {
        name: "Trigger",
        kind: ParamKind::Scalar {
            get: |s| s.trigger_level,
            set: |s, v| s.trigger_level = v,
            step: 0.05,
            min: -1.65,
            max: 1.65,
            unit: "V",
        },
        dirty: Dirty(Dirty::WAVEFORM.0 | Dirty::STATUS.0),
    },
    Param {
        name: "Cursors",
        kind: ParamKind::Toggle {
            get: |s| s.cursors_enabled,
            set: |s, v| s.cursors_enabled = v,
        },
        dirty: Dirty::CURSORS,
    },
    Param {
        name: "Cursor 1",
        kind: ParamKind::Scalar {
            get: |s| s.cursor1_volts,
            set: |s, v| s.cursor1_volts = v,
            step: 0.05,
            min: -20.0,
            max: 20.0,
            unit: "V",
        },
        dirty: Dirty::CURSORS,
    },
    Param {
        name: "Cursor 2",
        kind: ParamKind::Scalar {
            get: |s| s.cursor2_volts,
            set: |s, v| s.cursor2_volts = v,
            step: 0.05,
            min: -20.0,
            max: 20.0,
            unit: "V",
        },
        dirty: Dirty::CURSORS,
    },
    Param {
        name: "Display",
        kind: ParamKind::Choice {
            get: |s| match s.display_mode {
                DisplayMode::Spectrum => 1,
                _ => 0,
            },
            set: |s, v| {
                s.display_mode = if v == 1 {
                    DisplayMode::Spectrum
                } else {
                    DisplayMode::Scope
                }
            },
            labels: &["scope", "spectrum"],
        },
        dirty: Dirty::ALL,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str) -> &'static Param {
        PARAMS.iter().find(|p| p.name == name).unwrap()
    }

    #[test]
    fn test_volts_per_div_floor() {
        let mut s = ScopeSettings::default();
        assert!(param("Volts/div").adjust(&mut s, -1000));
        assert_eq!(s.volts_per_div, MIN_VOLTS_PER_DIV);
        assert!(!param("Volts/div").adjust(&mut s, -1));
    }

    #[test]
    fn test_time_per_div_floor() {
        let mut s = ScopeSettings::default();
        param("Time/div").adjust(&mut s, -50);
        assert_eq!(s.time_per_div, MIN_TIME_PER_DIV);
        param("Time/div").adjust(&mut s, 1);
        assert_eq!(s.time_per_div, 11.0);
    }

    #[test]
    fn test_steps_stay_on_grid() {
        let mut s = ScopeSettings::default();
        let p = param("Volts/div");
        for _ in 0..7 {
            p.adjust(&mut s, 1);
        }
        assert_eq!(s.volts_per_div, 1.2);
    }

    #[test]
    fn test_choice_wraps_both_ways() {
        let mut s = ScopeSettings::default();
        let gain = param("Gain");
        gain.adjust(&mut s, -1);
        assert_eq!(s.gain, GainSetting::High);
        gain.adjust(&mut s, 2);
        assert_eq!(s.gain, GainSetting::Med);
        assert_eq!(gain.value_label(&s), "x2");
    }

    #[test]
    fn test_toggle_only_flips_toggles() {
        let mut s = ScopeSettings::default();
        assert!(param("Cursors").toggle(&mut s));
        assert!(s.cursors_enabled);
        assert!(!param("Cursor 1").toggle(&mut s));
        assert!(!param("Run").is_editable());
        assert!(param("Display").is_editable());
    }

    #[test]
    fn test_dirty_flags() {
        let d = Dirty::MENU | Dirty::STATUS;
        assert!(d.contains(Dirty::MENU));
        assert!(!d.contains(Dirty::WAVEFORM));
        assert!(Dirty::ALL.contains(d));
        assert!(Dirty::NONE.is_empty());
    }
}
