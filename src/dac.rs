//! Trigger comparator bias and front-end offset through the 12-bit SPI DAC

use tracing::{debug, warn};

use crate::{
    gain::{mid_scale_volts, GainSetting},
    Result, ScopeError, REFERENCE_VOLTAGE,
};

const DAC_MAX_CODE: f32 = 4095.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DacChannel {
    /// VOUT_A, the trigger comparator threshold
    Trigger,
    /// VOUT_B, the front-end DC offset
    Offset,
}

impl DacChannel {
    fn config_bits(self) -> u16 {
        match self {
            DacChannel::Trigger => 0b0011_0000_0000_0000,
            DacChannel::Offset => 0b1011_0000_0000_0000,
        }
    }
}

/// The SPI link to the DAC, one 16-bit word per write
pub trait Dac: Send {
    fn write(&mut self, word: u16) -> Result<()>;
}

/// Build the 16-bit DAC command for a target voltage. Targets outside the
/// reference range are rejected rather than clamped.
pub fn dac_word(channel: DacChannel, volts: f32) -> Result<u16> {
    if !(0.0..=REFERENCE_VOLTAGE).contains(&volts) {
        return Err(ScopeError::VoltageOutOfRange {
            volts,
            min: 0.0,
            max: REFERENCE_VOLTAGE,
        });
    }
    let code = (volts * DAC_MAX_CODE / REFERENCE_VOLTAGE + 0.5) as u16;
    Ok(channel.config_bits() | (code & 0x0FFF))
}

/// Comparator threshold (ADC-side volts) for a trigger level given in input
/// volts relative to mid-scale
pub fn trigger_bias(level: f32, gain: GainSetting) -> f32 {
    let mid_adc = mid_scale_volts(GainSetting::Low);
    mid_adc + level * gain.scale_factor()
}

/// Largest trigger level magnitude whose bias stays inside the DAC range at `gain`
pub fn trigger_level_limit(gain: GainSetting) -> f32 {
    mid_scale_volts(GainSetting::Low) / gain.scale_factor()
}

/// Trigger level, in input volts, that a comparator bias stands for at `gain`
pub fn level_for_bias(bias: f32, gain: GainSetting) -> f32 {
    (bias - mid_scale_volts(GainSetting::Low)) / gain.scale_factor()
}

pub struct DacOutput {
    dac: Box<dyn Dac>,
    trigger_bias: Option<f32>,
}

impl DacOutput {
    pub fn new(dac: Box<dyn Dac>) -> Self {
        Self {
            dac,
            trigger_bias: None,
        }
    }

    pub fn set_voltage(&mut self, channel: DacChannel, volts: f32) -> Result<()> {
        let word = dac_word(channel, volts)?;
        self.dac.write(word)?;
        debug!(?channel, volts, word, "DAC updated");
        Ok(())
    }

    /// Center the front end
    pub fn center_offset(&mut self) -> Result<()> {
        self.set_voltage(DacChannel::Offset, mid_scale_volts(GainSetting::Low))
    }

    /// Recompute the comparator bias. On rejection the previous bias stays.
    pub fn apply_trigger_level(&mut self, level: f32, gain: GainSetting) -> Result<f32> {
        let bias = trigger_bias(level, gain);
        match self.set_voltage(DacChannel::Trigger, bias) {
            Ok(()) => {
                self.trigger_bias = Some(bias);
                Ok(bias)
            }
            Err(e) => {
                warn!(level, gain = gain.label(), "Trigger bias rejected: {}", e);
                Err(e)
            }
        }
    }

    /// Last bias the DAC accepted
    pub fn trigger_bias(&self) -> Option<f32> {
        self.trigger_bias
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Spi(Arc<Mutex<Vec<u16>>>);

    impl Dac for Spi {
        fn write(&mut self, word: u16) -> Result<()> {
            self.0.lock().unwrap().push(word);
            Ok(())
        }
    }

    #[test]
    fn test_word_encoding() {
        assert_eq!(dac_word(DacChannel::Trigger, 0.0).unwrap(), 0x3000);
        assert_eq!(dac_word(DacChannel::Trigger, 3.3).unwrap(), 0x3FFF);
        assert_eq!(dac_word(DacChannel::Offset, 0.825).unwrap(), 0xB000 | 1024);
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(matches!(
            dac_word(DacChannel::Trigger, 3.4),
            Err(ScopeError::VoltageOutOfRange { .. })
        ));
        assert!(dac_word(DacChannel::Offset, -0.01).is_err());
    }

    #[test]
    fn test_rejected_bias_keeps_previous() {
        let words = Arc::new(Mutex::new(vec![]));
        let mut out = DacOutput::new(Box::new(Spi(words.clone())));
        let bias = out.apply_trigger_level(0.25, GainSetting::Med).unwrap();
        assert!((bias - 2.15).abs() < 1e-5);
        // 0.5 V at x4 would need 3.65 V on the comparator
        assert!(out.apply_trigger_level(0.5, GainSetting::High).is_err());
        assert_eq!(out.trigger_bias(), Some(bias));
        assert_eq!(words.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_limit_keeps_bias_in_range() {
        for gain in [GainSetting::Low, GainSetting::Med, GainSetting::High] {
            let limit = trigger_level_limit(gain);
            assert!((trigger_bias(limit, gain) - 3.3).abs() < 1e-5);
            assert!(trigger_bias(-limit, gain).abs() < 1e-5);
            assert!((level_for_bias(trigger_bias(0.3, gain), gain) - 0.3).abs() < 1e-5);
        }
        assert!((trigger_level_limit(GainSetting::High) - 0.4125).abs() < 1e-6);
    }
}
