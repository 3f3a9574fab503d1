//! Analog gain selection and raw code → voltage conversion

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Mutex,
};

use tracing::debug;

use crate::{Result, ScopeError, FULL_SCALE_CODE, MID_SCALE_CODE, REFERENCE_VOLTAGE};

/// Discrete front-end gain levels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum GainSetting {
    #[default]
    Low,
    Med,
    High,
}

impl GainSetting {
    pub const ALL: [GainSetting; 3] = [GainSetting::Low, GainSetting::Med, GainSetting::High];

    /// Divides ADC-side volts back down to input volts
    pub fn scale_factor(self) -> f32 {
        match self {
            GainSetting::Low => 1.0,
            GainSetting::Med => 2.0,
            GainSetting::High => 4.0,
        }
    }

    /// Selector output, bit 0 drives SEL_0 and bit 1 drives SEL_1
    pub fn selector_code(self) -> u8 {
        match self {
            GainSetting::Low => 0b00,
            GainSetting::Med => 0b10,
            GainSetting::High => 0b01,
        }
    }

    pub fn index(self) -> usize {
        match self {
            GainSetting::Low => 0,
            GainSetting::Med => 1,
            GainSetting::High => 2,
        }
    }

    /// Out of range indices fall back to low gain, like an unknown selector state
    pub fn from_index(idx: usize) -> Self {
        match idx {
            1 => GainSetting::Med,
            2 => GainSetting::High,
            _ => GainSetting::Low,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GainSetting::Low => "x1",
            GainSetting::Med => "x2",
            GainSetting::High => "x4",
        }
    }
}

/// Input volts for a raw sample code under a given gain
pub fn raw_to_volts(sample: u8, gain: GainSetting) -> f32 {
    (sample as f32 / FULL_SCALE_CODE) * REFERENCE_VOLTAGE / gain.scale_factor()
}

/// Input volts of the nominal mid-scale code, the DC level removed before analysis
pub fn mid_scale_volts(gain: GainSetting) -> f32 {
    raw_to_volts(MID_SCALE_CODE, gain)
}

/// Physical gain switch
pub trait GainSelector: Send {
    fn select(&mut self, code: u8) -> Result<()>;
}

/// Owns the active gain. Readers only ever see the atomic, which is written
/// after the selector has been switched, so a gain and its scale factor are
/// always observed together.
pub struct GainStage {
    selector: Mutex<Box<dyn GainSelector>>,
    active: AtomicU8,
}

impl GainStage {
    pub fn new(mut selector: Box<dyn GainSelector>, initial: GainSetting) -> Result<Self> {
        selector.select(initial.selector_code())?;
        Ok(Self {
            selector: Mutex::new(selector),
            active: AtomicU8::new(initial.index() as u8),
        })
    }

    pub fn current(&self) -> GainSetting {
        GainSetting::from_index(self.active.load(Ordering::Acquire) as usize)
    }

    pub fn set(&self, gain: GainSetting) -> Result<()> {
        let mut selector = self
            .selector
            .lock()
            .map_err(|_| ScopeError::Peripheral("gain selector lock poisoned".to_owned()))?;
        selector.select(gain.selector_code())?;
        self.active.store(gain.index() as u8, Ordering::Release);
        debug!(gain = gain.label(), code = gain.selector_code(), "Gain selected");
        Ok(())
    }

    pub fn raw_to_volts(&self, sample: u8) -> f32 {
        raw_to_volts(sample, self.current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Recorder(Arc<Mutex<Vec<u8>>>);

    impl GainSelector for Recorder {
        fn select(&mut self, code: u8) -> Result<()> {
            self.0.lock().unwrap().push(code);
            Ok(())
        }
    }

    #[test]
    fn test_selector_codes_match_switch_wiring() {
        let codes = Arc::new(Mutex::new(vec![]));
        let stage = GainStage::new(Box::new(Recorder(codes.clone())), GainSetting::Low).unwrap();
        stage.set(GainSetting::Med).unwrap();
        stage.set(GainSetting::High).unwrap();
        assert_eq!(*codes.lock().unwrap(), vec![0b00, 0b10, 0b01]);
        assert_eq!(stage.current(), GainSetting::High);
    }

    #[test]
    fn test_full_scale_at_low_gain() {
        assert!((raw_to_volts(255, GainSetting::Low) - 3.287).abs() < 1e-3);
        assert_eq!(raw_to_volts(0, GainSetting::High), 0.0);
        assert!((mid_scale_volts(GainSetting::Low) - 1.65).abs() < 1e-6);
    }

    #[test]
    fn test_high_gain_scales_against_med() {
        let med = raw_to_volts(128, GainSetting::Med);
        let high = raw_to_volts(128, GainSetting::High);
        let ratio = GainSetting::Med.scale_factor() / GainSetting::High.scale_factor();
        assert!((high / med - ratio).abs() < 1e-6);
    }
}
