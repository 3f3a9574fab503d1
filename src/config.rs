//! Start-up configuration for the scope core

use std::time::Duration;

use crate::{
    gain::GainSetting,
    settings::{DisplayMode, ScopeSettings, MIN_TIME_PER_DIV, MIN_VOLTS_PER_DIV},
    trigger::TriggerMode,
    Result, ScopeError,
};

#[derive(Clone, Debug)]
pub struct ScopeConfig {
    /// ADC clock divisor, 0 for full speed
    pub sample_rate_divisor: f32,
    pub trigger_mode: TriggerMode,
    /// Minimum time a held frame stays on screen before re-arming (hold-off mode)
    pub holdoff: Duration,
    /// Force a capture when no edge arrived for this long
    pub auto_trigger: Option<Duration>,
    pub ui_period: Duration,
    pub housekeeping_period: Duration,
    /// Cadence of the analysis task while the spectrum is on screen
    pub spectrum_period: Duration,
    /// Cadence of the analysis task otherwise
    pub spectrum_idle_period: Duration,
    pub initial: ScopeSettings,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            sample_rate_divisor: 0.0,
            trigger_mode: TriggerMode::Continuous,
            holdoff: Duration::from_millis(250),
            auto_trigger: Some(Duration::from_millis(500)),
            ui_period: Duration::from_micros(16_667),
            housekeeping_period: Duration::from_millis(200),
            spectrum_period: Duration::from_millis(50),
            spectrum_idle_period: Duration::from_millis(250),
            initial: ScopeSettings::default(),
        }
    }
}

impl ScopeConfig {
    pub fn with_gain(mut self, gain: GainSetting) -> Self {
        self.initial.gain = gain;
        self
    }

    pub fn with_display_mode(mut self, mode: DisplayMode) -> Self {
        self.initial.display_mode = mode;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("ui period", self.ui_period),
            ("housekeeping period", self.housekeeping_period),
            ("spectrum period", self.spectrum_period),
            ("spectrum idle period", self.spectrum_idle_period),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, p)| p.is_zero()) {
            return Err(ScopeError::InvalidConfig(format!("{} must be non-zero", name)));
        }
        if !(0.0..=65_535.0).contains(&self.sample_rate_divisor) {
            return Err(ScopeError::InvalidConfig(format!(
                "clock divisor {} out of range",
                self.sample_rate_divisor
            )));
        }
        if self.initial.volts_per_div < MIN_VOLTS_PER_DIV {
            return Err(ScopeError::InvalidConfig(format!(
                "volts/div {} below {}",
                self.initial.volts_per_div, MIN_VOLTS_PER_DIV
            )));
        }
        if self.initial.time_per_div < MIN_TIME_PER_DIV {
            return Err(ScopeError::InvalidConfig(format!(
                "time/div {} below {}",
                self.initial.time_per_div, MIN_TIME_PER_DIV
            )));
        }
        if self.initial.trigger_level.abs() > 1.65 {
            return Err(ScopeError::InvalidConfig(format!(
                "trigger level {} V outside ±1.65 V",
                self.initial.trigger_level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        ScopeConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_zero_period() {
        let config = ScopeConfig {
            ui_period: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ScopeError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_scale_below_floor() {
        let mut config = ScopeConfig::default();
        config.initial.volts_per_div = 0.05;
        assert!(config.validate().is_err());
        let mut config = ScopeConfig::default();
        config.initial.time_per_div = 0.5;
        assert!(config.validate().is_err());
    }
}
